use super::test_helpers::*;
use super::*;
use crate::error::{Error, HistoryError, PlatformError};
use crate::history::{HistoryJob, HistoryOrigin, HistoryStatus};
use crate::platform::{ChannelInfo, GuildEmoji, HistoryPage};
use crate::types::{
    ChannelId, DownloadOutcome, Event, FailureReason, MediaType, MessageId, MessageOrigin,
    RoleId, SkipReason, UserId,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod pipeline;

/// Serve `body` at `route` on `server`, expecting exactly `times` requests
async fn serve(server: &MockServer, route: &str, body: &[u8], times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(times)
        .mount(server)
        .await;
}

/// Origin of a test message in `channel`
fn origin(channel: u64) -> MessageOrigin {
    MessageOrigin {
        channel_id: ChannelId(channel),
        guild_id: Some(GUILD),
        author_id: AUTHOR,
        ..Default::default()
    }
}

/// Candidate for `url` posted by message 1
fn candidate(url: &str, filename: Option<&str>) -> crate::types::MediaCandidate {
    crate::types::MediaCandidate {
        url: url.to_string(),
        filename: filename.map(str::to_string),
        timestamp: message_time(1),
    }
}

/// Queue a job, promote it and wait for a terminal state
async fn run_job(
    downloader: &MediaDownloader,
    channel: u64,
    before: Option<u64>,
    since: Option<u64>,
) -> HistoryJob {
    downloader
        .start_history(
            ChannelId(channel),
            HistoryOrigin::User(AUTHOR),
            None,
            before.map(MessageId),
            since.map(MessageId),
        )
        .await
        .unwrap();
    assert_eq!(downloader.promote_waiting_jobs(), 1);
    wait_for_terminal(downloader, channel).await
}

async fn wait_for_terminal(downloader: &MediaDownloader, channel: u64) -> HistoryJob {
    let jobs = downloader.history.jobs.clone();
    assert!(
        wait_until(|| jobs
            .status(ChannelId(channel))
            .is_some_and(|status| status.is_terminal()))
        .await,
        "history job did not finish"
    );
    downloader.history_job(ChannelId(channel)).await.unwrap()
}
