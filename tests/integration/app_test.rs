use crate::common::builders::{fake_mp4, write_video};
use crate::common::mocks::MockDownloadApi;
use crate::common::{AppContext, SnapshotExt, WAIT, wait_for_async};
use reel_signage::models::{PlaybackMode, TriggerKind};
use serde_json::{Value, json};

fn download_command(ad_id: &str, filename: &str, trigger: &str, campaign_id: &str) -> Value {
    json!({
        "adId": ad_id,
        "filename": filename,
        "size": 64,
        "chunkSize": 16,
        "totalChunks": 4,
        "url": format!("https://cdn.example.com/{}", filename),
        "priority": "normal",
        "trigger": trigger,
        "campaignId": campaign_id,
    })
}

#[tokio::test]
async fn test_location_download_reports_progress_and_plays() {
    let api = MockDownloadApi::new().with_video("geo-1", "geo.mp4", fake_mp4(64));
    let ctx = AppContext::start(api).await;

    ctx.transport
        .inject(
            "download",
            download_command("geo-1", "geo.mp4", "location_based", "downtown"),
        )
        .await;

    assert!(ctx.wait_until(|s| s.is_playing("geo.mp4")).await);
    assert!(ctx.videos_dir.join("geo.mp4").is_file());

    let snapshot = ctx.snapshot().await;
    assert_eq!(snapshot.location_pool_len, 1);
    assert_eq!(
        snapshot.current.as_ref().map(|item| item.trigger()),
        Some(TriggerKind::LocationBased)
    );

    let transport = &ctx.transport;
    let reported = wait_for_async(WAIT, || async move {
        transport
            .sent_payloads("downloadStatus")
            .iter()
            .any(|status| status["status"] == "completed" && status["progress"] == 100)
    })
    .await;
    assert!(reported);
    let statuses = ctx.transport.sent_payloads("downloadStatus");
    assert!(statuses.iter().all(|status| status["adId"] == "geo-1"));

    assert!(ctx.wait_for_sent("playbackStarted", 1).await);
    let started = &ctx.transport.sent_payloads("playbackStarted")[0];
    assert_eq!(started["adId"], "geo-1");
    assert_eq!(started["trigger"], "location_based");
    assert_eq!(started["campaignId"], "downtown");
    assert_eq!(started["deviceId"], "test-device");

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_location_play_for_new_campaign_replaces_pool() {
    let api = MockDownloadApi::new().with_video("geo-a", "geo.mp4", fake_mp4(64));
    let ctx = AppContext::start(api).await;

    ctx.transport
        .inject("download", download_command("geo-a", "geo.mp4", "location_based", "A"))
        .await;
    assert!(
        ctx.wait_until(|s| s.is_playing("geo.mp4") && s.location_pool_len == 1)
            .await
    );

    write_video(&ctx.videos_dir, "b.mp4");
    ctx.transport
        .inject(
            "play",
            json!({
                "filename": "b.mp4",
                "adId": "geo-b",
                "trigger": "location_based",
                "campaignId": "B"
            }),
        )
        .await;

    assert!(
        ctx.wait_until(|s| {
            s.location_pool_len == 1
                && s.location_campaign_id.as_ref().map(|id| id.as_str()) == Some("B")
        })
        .await
    );
    assert_eq!(ctx.snapshot().await.general_queue_len, 0);

    ctx.player.finish();
    assert!(ctx.wait_until(|s| s.is_playing("b.mp4")).await);

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_missing_file_is_downloaded_and_played() {
    let api = MockDownloadApi::new().with_video("promo-7", "promo.mp4", fake_mp4(64));
    let ctx = AppContext::start(api).await;

    ctx.transport
        .inject("play", json!({ "filename": "promo.mp4", "adId": "promo-7" }))
        .await;

    assert!(ctx.wait_for_sent("playbackError", 1).await);
    assert!(ctx.wait_for_sent("downloadRequest", 1).await);
    let request = &ctx.transport.sent_payloads("downloadRequest")[0];
    assert_eq!(request["adId"], "promo-7");
    assert_eq!(request["deviceId"], "test-device");

    assert!(ctx.wait_until(|s| s.is_playing("promo.mp4")).await);
    assert_eq!(ctx.api.info_calls(), 1);

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_campaign_commands_switch_modes() {
    let ctx = AppContext::start(MockDownloadApi::new()).await;
    write_video(&ctx.videos_dir, "c0.mp4");
    write_video(&ctx.videos_dir, "c1.mp4");
    write_video(&ctx.videos_dir, "local.mp4");
    assert_eq!(ctx.app.refresh_library().await.unwrap(), 3);
    assert!(ctx.wait_until(|s| s.is_playing("c0.mp4")).await);

    ctx.transport
        .inject(
            "startCampaign",
            json!({
                "campaignId": "summer",
                "playlist": ["c1.mp4", { "filename": "c0.mp4", "adId": "ad-c0" }]
            }),
        )
        .await;

    assert!(ctx.wait_until(|s| s.is_playing("c1.mp4") && s.mode == PlaybackMode::Campaign).await);
    assert!(ctx.wait_for_sent("playbackModeChange", 1).await);
    let change = &ctx.transport.sent_payloads("playbackModeChange")[0];
    assert_eq!(change["mode"], "campaign");
    assert_eq!(change["campaignId"], "summer");

    ctx.player.finish();
    assert!(ctx.wait_until(|s| s.is_playing("c0.mp4")).await);
    let current = ctx.snapshot().await.current.unwrap();
    assert_eq!(current.ad_id().as_str(), "ad-c0");

    ctx.transport.inject("revertToLocal", Value::Null).await;
    assert!(ctx.wait_until(|s| s.mode == PlaybackMode::Local && s.is_playing("c0.mp4")).await);
    assert!(ctx.wait_for_sent("playbackModeChange", 2).await);
    assert_eq!(ctx.transport.sent_payloads("playbackModeChange")[1]["mode"], "local");

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_empty_location_ack_expires_stale_ads() {
    let api = MockDownloadApi::new().with_video("geo-1", "geo.mp4", fake_mp4(64));
    let ctx = AppContext::start_with(api, |builder| builder.with_liveness_window(0.2)).await;

    ctx.transport
        .inject(
            "download",
            download_command("geo-1", "geo.mp4", "location_based", "downtown"),
        )
        .await;
    assert!(
        ctx.wait_until(|s| s.is_playing("geo.mp4") && s.location_pool_len == 1)
            .await
    );

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    ctx.transport.inject("locationAck", json!({})).await;

    // The downloaded file stays in the ambient library, tagged with its ad
    assert!(
        ctx.wait_until(|s| {
            s.location_pool_len == 0
                && s.is_playing("geo.mp4")
                && s.current.as_ref().map(|item| item.trigger()) == Some(TriggerKind::AmbientLoop)
        })
        .await
    );
    let current = ctx.snapshot().await.current.unwrap();
    assert_eq!(current.ad_id().as_str(), "geo-1");
    assert_eq!(ctx.app.tracker().stats().await.acknowledged, 1);

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_sweep_expires_location_ads_without_acks() {
    let api = MockDownloadApi::new().with_video("geo-1", "geo.mp4", fake_mp4(64));
    let ctx = AppContext::start_with(api, |builder| {
        builder.with_liveness_window(0.2).with_sweep_interval(0.05)
    })
    .await;

    ctx.transport
        .inject(
            "download",
            download_command("geo-1", "geo.mp4", "location_based", "downtown"),
        )
        .await;
    assert!(ctx.wait_until(|s| s.is_playing("geo.mp4")).await);
    assert!(ctx.wait_until(|s| s.location_pool_len == 0).await);

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_playback_lifecycle_is_reported() {
    let ctx = AppContext::start(MockDownloadApi::new()).await;
    write_video(&ctx.videos_dir, "a.mp4");
    ctx.app.refresh_library().await.unwrap();

    assert!(ctx.wait_until(|s| s.is_playing("a.mp4")).await);
    assert!(ctx.wait_for_sent("playbackStarted", 1).await);
    let started = &ctx.transport.sent_payloads("playbackStarted")[0];
    assert_eq!(started["filename"], "a.mp4");
    assert_eq!(started["trigger"], "ambient_loop");

    ctx.player.finish();
    assert!(ctx.wait_for_sent("playbackCompleted", 1).await);
    assert_eq!(
        ctx.transport.sent_payloads("playbackCompleted")[0]["filename"],
        "a.mp4"
    );

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_location_reported_on_start() {
    let ctx = AppContext::start_with(MockDownloadApi::new(), |builder| {
        builder.with_sample_interval(0.1)
    })
    .await;

    assert!(ctx.wait_for_sent("locationUpdate", 1).await);
    let update = &ctx.transport.sent_payloads("locationUpdate")[0];
    assert_eq!(update["deviceId"], "test-device");
    assert_eq!(update["latitude"], 37.7749);

    ctx.positions.move_to(-122.30, 37.80);
    let transport = &ctx.transport;
    assert!(
        wait_for_async(WAIT, || async move {
            transport
                .sent_payloads("locationUpdate")
                .iter()
                .any(|update| update["longitude"] == -122.30)
        })
        .await
    );

    ctx.app.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let ctx = AppContext::start(MockDownloadApi::new()).await;
    write_video(&ctx.videos_dir, "a.mp4");
    ctx.app.refresh_library().await.unwrap();
    assert!(ctx.wait_until(|s| s.is_playing("a.mp4")).await);

    tokio::time::timeout(WAIT, ctx.app.shutdown())
        .await
        .expect("shutdown hung");

    assert!(!ctx.app.protocol().is_connected());
    assert!(ctx.app.orchestrator().is_closed());
    assert!(!ctx.app.downloads().start_download(&"late".into()).await);
    assert_eq!(
        ctx.player.current_status(),
        reel_signage::player::PlayerStatus::Idle
    );
}
