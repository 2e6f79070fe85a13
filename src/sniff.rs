//! Content sniffing from magic bytes.
//!
//! Classification looks only at the response body. Header claims and file
//! names are never consulted, so a PNG served as `payload.exe` is still an image.

use crate::types::MediaType;

/// Result of sniffing a body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sniffed {
    /// MIME type, e.g. `image/png`
    pub mime: &'static str,
    /// Top-level classification
    pub media_type: MediaType,
    /// Canonical extension with a leading dot
    pub extension: &'static str,
}

impl Sniffed {
    const fn new(mime: &'static str, media_type: MediaType, extension: &'static str) -> Self {
        Self {
            mime,
            media_type,
            extension,
        }
    }
}

const OCTET_STREAM: Sniffed = Sniffed::new("application/octet-stream", MediaType::Application, ".bin");

/// How many leading bytes are inspected for the text heuristic
const TEXT_SNIFF_LEN: usize = 512;

/// Classify a body by its leading bytes
pub fn sniff(body: &[u8]) -> Sniffed {
    sniff_binary(body)
        .or_else(|| sniff_markup(body))
        .or_else(|| sniff_text(body))
        .unwrap_or(OCTET_STREAM)
}

fn sniff_binary(body: &[u8]) -> Option<Sniffed> {
    use MediaType::*;

    // Images
    if body.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(Sniffed::new("image/png", Image, ".png"));
    }
    if body.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(Sniffed::new("image/jpeg", Image, ".jpg"));
    }
    if body.starts_with(b"GIF87a") || body.starts_with(b"GIF89a") {
        return Some(Sniffed::new("image/gif", Image, ".gif"));
    }
    if riff_kind(body) == Some(b"WEBP") {
        return Some(Sniffed::new("image/webp", Image, ".webp"));
    }
    if body.starts_with(b"BM") && body.len() >= 14 {
        return Some(Sniffed::new("image/bmp", Image, ".bmp"));
    }
    if body.starts_with(b"II*\0") || body.starts_with(b"MM\0*") {
        return Some(Sniffed::new("image/tiff", Image, ".tiff"));
    }
    if body.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some(Sniffed::new("image/x-icon", Image, ".ico"));
    }

    // ISO base media (mp4, mov, m4a, heic)
    if body.len() >= 12 && &body[4..8] == b"ftyp" {
        let brand = &body[8..12];
        return Some(match brand {
            b"qt  " => Sniffed::new("video/quicktime", Video, ".mov"),
            b"M4A " | b"M4B " => Sniffed::new("audio/mp4", Audio, ".m4a"),
            b"heic" | b"heix" | b"mif1" | b"msf1" => Sniffed::new("image/heic", Image, ".heic"),
            b"avif" => Sniffed::new("image/avif", Image, ".avif"),
            _ => Sniffed::new("video/mp4", Video, ".mp4"),
        });
    }

    // Video
    if body.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let head = &body[..body.len().min(64)];
        if contains(head, b"webm") {
            return Some(Sniffed::new("video/webm", Video, ".webm"));
        }
        return Some(Sniffed::new("video/x-matroska", Video, ".mkv"));
    }
    if riff_kind(body) == Some(b"AVI ") {
        return Some(Sniffed::new("video/x-msvideo", Video, ".avi"));
    }
    if body.starts_with(b"FLV\x01") {
        return Some(Sniffed::new("video/x-flv", Video, ".flv"));
    }

    // Audio
    if body.starts_with(b"ID3") || (body.len() >= 2 && body[0] == 0xFF && body[1] & 0xE0 == 0xE0)
    {
        return Some(Sniffed::new("audio/mpeg", Audio, ".mp3"));
    }
    if body.starts_with(b"OggS") {
        return Some(Sniffed::new("audio/ogg", Audio, ".ogg"));
    }
    if riff_kind(body) == Some(b"WAVE") {
        return Some(Sniffed::new("audio/wav", Audio, ".wav"));
    }
    if body.starts_with(b"fLaC") {
        return Some(Sniffed::new("audio/flac", Audio, ".flac"));
    }

    // Documents and archives
    if body.starts_with(b"%PDF-") {
        return Some(Sniffed::new("application/pdf", Application, ".pdf"));
    }
    if body.starts_with(b"PK\x03\x04") || body.starts_with(b"PK\x05\x06") {
        return Some(Sniffed::new("application/zip", Application, ".zip"));
    }
    if body.starts_with(&[0x1F, 0x8B]) {
        return Some(Sniffed::new("application/gzip", Application, ".gz"));
    }
    if body.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        return Some(Sniffed::new("application/x-7z-compressed", Application, ".7z"));
    }
    if body.starts_with(b"Rar!\x1a\x07") {
        return Some(Sniffed::new("application/vnd.rar", Application, ".rar"));
    }
    if body.starts_with(b"MZ") {
        return Some(Sniffed::new("application/x-msdownload", Application, ".exe"));
    }

    None
}

fn sniff_markup(body: &[u8]) -> Option<Sniffed> {
    let head = &body[..body.len().min(TEXT_SNIFF_LEN)];
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    let head = String::from_utf8_lossy(&head[start..]).to_lowercase();

    if head.starts_with("<!doctype html") || head.starts_with("<html") || head.starts_with("<head") {
        return Some(Sniffed::new("text/html", MediaType::Text, ".html"));
    }
    if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
        return Some(Sniffed::new("image/svg+xml", MediaType::Image, ".svg"));
    }
    if head.starts_with("<?xml") {
        return Some(Sniffed::new("text/xml", MediaType::Text, ".xml"));
    }
    None
}

fn sniff_text(body: &[u8]) -> Option<Sniffed> {
    if body.is_empty() {
        return None;
    }
    let head = &body[..body.len().min(TEXT_SNIFF_LEN)];
    if head.contains(&0) {
        return None;
    }
    // A multi-byte character may be cut at the sniff boundary
    let valid = match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && e.valid_up_to() > 0,
    };
    valid.then_some(Sniffed::new("text/plain", MediaType::Text, ".txt"))
}

fn riff_kind(body: &[u8]) -> Option<&[u8]> {
    (body.len() >= 12 && body.starts_with(b"RIFF")).then(|| &body[8..12])
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images() {
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").extension, ".png");
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]).mime, "image/jpeg");
        assert_eq!(sniff(b"GIF89a\x01\0\x01\0").media_type, MediaType::Image);
        assert_eq!(sniff(b"RIFF\0\0\0\0WEBPVP8 ").extension, ".webp");
    }

    #[test]
    fn iso_media_brands() {
        let mp4 = b"\0\0\0\x18ftypisom\0\0\x02\0";
        assert_eq!(sniff(mp4).media_type, MediaType::Video);
        assert_eq!(sniff(mp4).extension, ".mp4");

        let mov = b"\0\0\0\x14ftypqt  \0\0\x02\0";
        assert_eq!(sniff(mov).extension, ".mov");
        assert_eq!(sniff(mov).media_type, MediaType::Video);

        let m4a = b"\0\0\0\x1cftypM4A \0\0\0\0";
        assert_eq!(sniff(m4a).media_type, MediaType::Audio);
    }

    #[test]
    fn matroska_family() {
        let mut webm = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x82, 0x84];
        webm.extend_from_slice(b"webm");
        assert_eq!(sniff(&webm).extension, ".webm");
        assert_eq!(sniff(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]).extension, ".mkv");
    }

    #[test]
    fn audio() {
        assert_eq!(sniff(b"ID3\x04\0\0").media_type, MediaType::Audio);
        assert_eq!(sniff(b"OggS\0\x02").extension, ".ogg");
        assert_eq!(sniff(b"RIFF\0\0\0\0WAVEfmt ").extension, ".wav");
        assert_eq!(sniff(b"fLaC\0\0\0\x22").extension, ".flac");
    }

    #[test]
    fn documents_and_executables() {
        assert_eq!(sniff(b"%PDF-1.7\n").media_type, MediaType::Application);
        assert_eq!(sniff(b"PK\x03\x04\x14\0").extension, ".zip");
        assert_eq!(sniff(b"MZ\x90\0\x03\0").extension, ".exe");
    }

    #[test]
    fn markup_and_text() {
        assert_eq!(sniff(b"  <!DOCTYPE html><html>").extension, ".html");
        assert_eq!(sniff(b"<svg xmlns=\"http://www.w3.org/2000/svg\">").media_type, MediaType::Image);
        assert_eq!(sniff(b"hello, world\n").mime, "text/plain");
        assert_eq!(sniff("caf\u{e9}".as_bytes()).media_type, MediaType::Text);
    }

    #[test]
    fn unknown_binary_is_octet_stream() {
        assert_eq!(sniff(&[0x00, 0x01, 0x02, 0x03]), OCTET_STREAM);
        assert_eq!(sniff(b""), OCTET_STREAM);
    }
}
