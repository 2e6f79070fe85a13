use super::*;

async fn download(
    downloader: &MediaDownloader,
    channel: u64,
    candidate: &crate::types::MediaCandidate,
) -> DownloadOutcome {
    let origin = origin(channel);
    let policy = downloader.config.resolve(&origin).unwrap();
    let settings = downloader.get_config().download;
    downloader
        .pipeline
        .download(candidate, &policy, &origin, &settings)
        .await
}

#[tokio::test]
async fn test_image_only_policy_skips_video() {
    let server = MockServer::start().await;
    serve(&server, "/cat.png", PNG, 1).await;
    serve(&server, "/clip.webm", WEBM, 1).await;

    let platform = Arc::new(MockPlatform::default());
    let (downloader, temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "allow_videos": false, "allow_audio": false}]}"#,
        platform,
    )
    .await;

    let image = download(
        &downloader,
        1,
        &candidate(&format!("{}/cat.png", server.uri()), None),
    )
    .await;
    let video = download(
        &downloader,
        1,
        &candidate(&format!("{}/clip.webm", server.uri()), None),
    )
    .await;

    match image {
        DownloadOutcome::Success(file) => {
            assert_eq!(file.media_type, MediaType::Image);
            assert_eq!(file.path, temp_dir.path().join("downloads/images/cat.png"));
            assert_eq!(std::fs::read(&file.path).unwrap(), PNG);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(video, DownloadOutcome::Skipped(SkipReason::UnpermittedType));
    assert!(!temp_dir.path().join("downloads/videos").exists());
    assert_eq!(downloader.db.count_records().await.unwrap(), 1);
}

#[tokio::test]
async fn test_second_identical_url_rejected_as_duplicate() {
    let server = MockServer::start().await;
    serve(&server, "/cat.png", PNG, 1).await;

    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;
    let url = format!("{}/cat.png", server.uri());

    let first = download(&downloader, 1, &candidate(&url, None)).await;
    let second = download(&downloader, 1, &candidate(&url, None)).await;

    assert!(first.is_success());
    assert_eq!(second, DownloadOutcome::Skipped(SkipReason::Duplicate));
    assert_eq!(downloader.db.find_records_by_url(&url).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_existing_file_skipped_in_reject_mode() {
    let server = MockServer::start().await;
    serve(&server, "/a/cat.png", PNG, 1).await;
    serve(&server, "/b/cat.png", PNG, 1).await;

    let (downloader, temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let first = download(
        &downloader,
        1,
        &candidate(&format!("{}/a/cat.png", server.uri()), None),
    )
    .await;
    let second = download(
        &downloader,
        1,
        &candidate(&format!("{}/b/cat.png", server.uri()), None),
    )
    .await;

    assert!(first.is_success());
    assert_eq!(second, DownloadOutcome::Skipped(SkipReason::Duplicate));
    let files: Vec<_> = std::fs::read_dir(temp_dir.path().join("downloads/images"))
        .unwrap()
        .collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_preserve_mode_adds_numeric_suffix() {
    let server = MockServer::start().await;
    serve(&server, "/a/cat.png", PNG, 1).await;
    serve(&server, "/b/cat.png", PNG, 1).await;
    serve(&server, "/c/cat.png", PNG, 1).await;

    let (downloader, temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "save_possible_duplicates": true}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let mut names = Vec::new();
    for dir in ["a", "b", "c"] {
        match download(
            &downloader,
            1,
            &candidate(&format!("{}/{}/cat.png", server.uri(), dir), None),
        )
        .await
        {
            DownloadOutcome::Success(file) => names.push(file.filename),
            other => panic!("expected success, got {other:?}"),
        }
    }

    assert_eq!(names, vec!["cat.png", "cat (1).png", "cat (2).png"]);
    assert!(temp_dir.path().join("downloads/images/cat (2).png").exists());
}

#[tokio::test]
async fn test_concurrent_preserve_mode_never_overwrites() {
    let server = MockServer::start().await;
    for i in 0..16 {
        serve(&server, &format!("/{i}/cat.png"), PNG, 1).await;
    }

    let (downloader, temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "save_possible_duplicates": true}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let downloader = downloader.clone();
        let url = format!("{}/{i}/cat.png", server.uri());
        handles.push(tokio::spawn(async move {
            download(&downloader, 1, &candidate(&url, None)).await
        }));
    }

    let mut paths = std::collections::HashSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            DownloadOutcome::Success(file) => assert!(paths.insert(file.path)),
            other => panic!("expected success, got {other:?}"),
        }
    }

    let on_disk = std::fs::read_dir(temp_dir.path().join("downloads/images"))
        .unwrap()
        .count();
    assert_eq!(on_disk, 16);
    assert_eq!(downloader.db.count_records().await.unwrap(), 16);
}

#[tokio::test]
async fn test_classification_ignores_headers_and_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photo.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-msdownload")
                .set_body_bytes(PNG.to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fake.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_string("<!DOCTYPE html><html><body>login</body></html>"),
        )
        .mount(&server)
        .await;

    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let real = download(
        &downloader,
        1,
        &candidate(&format!("{}/photo.png", server.uri()), None),
    )
    .await;
    match real {
        DownloadOutcome::Success(file) => assert_eq!(file.media_type, MediaType::Image),
        other => panic!("expected success, got {other:?}"),
    }

    // An HTML error page served under an image name is text, which is not allowed by default
    let fake = download(
        &downloader,
        1,
        &candidate(&format!("{}/fake.png", server.uri()), None),
    )
    .await;
    assert_eq!(fake, DownloadOutcome::Skipped(SkipReason::UnpermittedType));
}

#[tokio::test]
async fn test_blocked_extensions() {
    let server = MockServer::start().await;
    serve(&server, "/payload.exe", PNG, 1).await;
    serve(&server, "/site.com", PNG, 1).await;

    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "blocked_extensions": []}],
            "servers": [{"id": 900, "blocked_extensions": ["EXE"]}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    // Channel 2 falls through to the server rule
    let exe = download(
        &downloader,
        2,
        &candidate(&format!("{}/payload.exe", server.uri()), None),
    )
    .await;
    assert_eq!(exe, DownloadOutcome::Skipped(SkipReason::UnpermittedExtension));

    // An empty list still refuses domain-like extensions
    let com = download(
        &downloader,
        1,
        &candidate(&format!("{}/site.com", server.uri()), None),
    )
    .await;
    assert_eq!(com, DownloadOutcome::Skipped(SkipReason::UnpermittedExtension));
}

#[tokio::test]
async fn test_filename_sources() {
    let server = MockServer::start().await;
    serve(&server, "/attachments/1/abc", PNG, 1).await;
    Mock::given(method("GET"))
        .and(path("/dl/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=\"report.png\"")
                .set_body_bytes(PNG.to_vec()),
        )
        .mount(&server)
        .await;
    serve(&server, "/raw/", PNG, 1).await;
    serve(&server, "/odd/", PNG, 1).await;

    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "save_possible_duplicates": true}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let mut names = Vec::new();
    for (route, filename) in [
        ("/attachments/1/abc", Some("holiday.png")),
        ("/dl/", None),
        ("/raw/", None),
        ("/odd/", Some("bad:name?.png")),
    ] {
        let url = format!("{}{}", server.uri(), route);
        match download(&downloader, 1, &candidate(&url, filename)).await {
            DownloadOutcome::Success(file) => names.push(file.filename),
            other => panic!("expected success for {url}, got {other:?}"),
        }
    }

    assert_eq!(
        names,
        vec![
            "holiday.png",
            "report.png",
            "download.png",
            "InvalidFilename.png"
        ]
    );
}

#[tokio::test]
async fn test_date_prefix_and_modified_time() {
    let server = MockServer::start().await;
    serve(&server, "/cat.png", PNG, 1).await;

    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "filename_date_format": "%Y-%m-%d", "divide_by_type": false}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let outcome = download(
        &downloader,
        1,
        &candidate(&format!("{}/cat.png", server.uri()), None),
    )
    .await;
    let DownloadOutcome::Success(file) = outcome else {
        panic!("expected success, got {outcome:?}");
    };

    assert_eq!(file.filename, "2023-07-01 cat.png");
    assert!(!file.path.parent().unwrap().ends_with("images"));

    let modified: chrono::DateTime<chrono::Utc> = std::fs::metadata(&file.path)
        .unwrap()
        .modified()
        .unwrap()
        .into();
    assert_eq!(modified, message_time(1));
}

#[tokio::test]
async fn test_error_status_retried_until_attempts_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "max_attempts": 2}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let outcome = download(
        &downloader,
        1,
        &candidate(&format!("{}/gone.png", server.uri()), None),
    )
    .await;
    match outcome {
        DownloadOutcome::Failed(failure) => {
            assert_eq!(failure.reason, FailureReason::Transfer);
            assert!(failure.message.contains("404"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transient_error_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.png"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    serve(&server, "/flaky.png", PNG, 1).await;

    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    let outcome = download(
        &downloader,
        1,
        &candidate(&format!("{}/flaky.png", server.uri()), None),
    )
    .await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_unreachable_host_is_request_failure() {
    let (downloader, _temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "max_attempts": 1}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;

    // Port 9 (discard) on localhost is not listening
    let outcome = download(&downloader, 1, &candidate("http://127.0.0.1:9/x.png", None)).await;
    match outcome {
        DownloadOutcome::Failed(failure) => assert_eq!(failure.reason, FailureReason::Request),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_record_write_failure_keeps_file_and_is_not_retried() {
    let server = MockServer::start().await;
    serve(&server, "/cat.png", PNG, 1).await;

    let (downloader, temp_dir) = create_downloader_with(
        r#"{"channels": [{"id": 1, "max_attempts": 3}]}"#,
        Arc::new(MockPlatform::default()),
    )
    .await;
    downloader.db.close().await;

    let outcome = download(
        &downloader,
        1,
        &candidate(&format!("{}/cat.png", server.uri()), None),
    )
    .await;
    match outcome {
        DownloadOutcome::Failed(failure) => assert_eq!(failure.reason, FailureReason::RecordWrite),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(temp_dir.path().join("downloads/images/cat.png").exists());
}

#[tokio::test]
async fn test_folder_creation_failure() {
    let temp = tempfile::tempdir().unwrap();
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let json = format!(
        r#"{{"channels": [{{"id": 1, "max_attempts": 1, "destination": {:?}}}]}}"#,
        blocker.join("downloads")
    );
    let (downloader, _temp_dir) =
        create_downloader_with(&json, Arc::new(MockPlatform::default())).await;

    let outcome = download(&downloader, 1, &candidate("http://127.0.0.1:9/x.png", None)).await;
    match outcome {
        DownloadOutcome::Failed(failure) => {
            assert_eq!(failure.reason, FailureReason::FolderCreation)
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
