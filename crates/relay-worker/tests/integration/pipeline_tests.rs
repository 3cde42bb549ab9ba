//! Pipeline stages: cancellation, upload retries, normalization fallback,
//! captions and cleanup.

use relay_models::{MediaKind, Variant};
use relay_worker::Submission;

use super::fakes::{attachment, branded, user, FakeFetch, FakePlatform, FakeTools, Harness};

#[tokio::test]
async fn test_cancel_after_partial_download() {
    let h = Harness::with(
        FakePlatform::new().holding_downloads(),
        FakeTools::new(),
        FakeFetch::new(),
    )
    .await;
    let (u, chat) = user(1);

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "movie.mkv", "partial"))
        .await
        .unwrap();
    h.platform.download_started.notified().await;
    assert_eq!(h.work_files().len(), 1);

    let cancelled = h.relay.cancel(u, chat, None).await.unwrap();
    assert_eq!(cancelled, 1);
    h.relay.wait_idle().await;

    assert_eq!(h.platform.upload_attempts(), 0);
    assert!(h.work_files().is_empty());
    let status = h.platform.find_sent("Queue:").unwrap();
    assert_eq!(
        h.platform.last_edit(status).as_deref(),
        Some("Operation cancelled.")
    );
}

#[tokio::test]
async fn test_upload_succeeds_on_third_attempt() {
    let h = Harness::with(
        FakePlatform::new().failing_uploads(2),
        FakeTools::new(),
        FakeFetch::new(),
    )
    .await;
    let (u, chat) = user(1);

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "movie.mkv", "bytes"))
        .await
        .unwrap();
    h.relay.wait_idle().await;

    assert_eq!(h.platform.upload_attempts(), 3);
    assert_eq!(h.platform.uploads().len(), 1);
    let status = h.platform.find_sent("Queue:").unwrap();
    assert!(h.platform.deleted().contains(&status.message_id));
}

#[tokio::test]
async fn test_upload_gives_up_after_three_attempts() {
    let h = Harness::with(
        FakePlatform::new().failing_uploads(10),
        FakeTools::new(),
        FakeFetch::new(),
    )
    .await;
    let (u, chat) = user(1);

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "movie.mkv", "bytes"))
        .await
        .unwrap();
    h.relay.wait_idle().await;

    assert_eq!(h.platform.upload_attempts(), 3);
    assert!(h.platform.uploads().is_empty());
    let status = h.platform.find_sent("Queue:").unwrap();
    let report = h.platform.last_edit(status).unwrap();
    assert!(report.starts_with("Upload failed:"), "{}", report);
    assert!(h.work_files().is_empty());
}

#[tokio::test]
async fn test_normalized_file_is_uploaded_with_hints() {
    let h = Harness::new().await;
    let (u, chat) = user(1);

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "Show S01E01.mkv", "video"))
        .await
        .unwrap();
    h.relay.wait_idle().await;

    let uploads = h.platform.uploads();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.file_name, branded(".mkv"));
    assert_eq!(upload.content, b"video|norm");
    assert_eq!(upload.kind, MediaKind::Video);
    assert_eq!(upload.metadata.duration, 42);
    assert!(upload.thumbnail.is_some());
    assert_eq!(upload.caption, format!("**{}**", branded(".mkv")));
    assert!(h.work_files().is_empty());
}

#[tokio::test]
async fn test_normalize_failure_uploads_original() {
    let h = Harness::with(
        FakePlatform::new(),
        FakeTools::new().failing_normalize(),
        FakeFetch::new(),
    )
    .await;
    let (u, chat) = user(1);

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "movie.mkv", "original"))
        .await
        .unwrap();
    h.relay.wait_idle().await;

    let uploads = h.platform.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].content, b"original");
    assert_eq!(uploads[0].file_name, branded(".mkv"));
}

#[tokio::test]
async fn test_mp4_with_incompatible_audio_becomes_mkv() {
    let h = Harness::with(
        FakePlatform::new(),
        FakeTools::new().with_codecs(&["opus"]),
        FakeFetch::new(),
    )
    .await;
    let (u, chat) = user(1);

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "clip.mp4", "video"))
        .await
        .unwrap();
    h.relay.wait_idle().await;

    assert_eq!(h.platform.uploads()[0].file_name, branded(".mkv"));
}

#[tokio::test]
async fn test_caption_counter_advances_across_jobs() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    h.relay
        .settings()
        .save_template(u, "Episode [01] [re (480p, 720p)]")
        .await;

    for i in 0..3 {
        h.relay
            .submit_attachment(u, chat, attachment(chat, i, &format!("e{}.mkv", i), "v"))
            .await
            .unwrap();
    }
    h.relay.wait_idle().await;

    let captions: Vec<_> = h.platform.uploads().into_iter().map(|u| u.caption).collect();
    assert_eq!(
        captions,
        vec![
            "**Episode 01 480p**",
            "**Episode 01 720p**",
            "**Episode 02 480p**"
        ]
    );
}

#[tokio::test]
async fn test_oversized_attachment_is_rejected() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    let mut big = attachment(chat, 1, "huge.mkv", "x");
    big.size = Some(5 * 1024 * 1024 * 1024);

    h.relay.submit_attachment(u, chat, big).await.unwrap();
    h.relay.wait_idle().await;

    assert_eq!(h.platform.upload_attempts(), 0);
    let status = h.platform.find_sent("Queue:").unwrap();
    assert_eq!(
        h.platform.last_edit(status).as_deref(),
        Some("Error: file is larger than the 4GB limit.")
    );
}

#[tokio::test]
async fn test_custom_thumbnail_is_used() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    let photo = attachment(chat, 9, "cover.jpg", "image");
    let stored = h.relay.set_custom_thumbnail(u, chat, &photo).await.unwrap();

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "movie.mkv", "video"))
        .await
        .unwrap();
    h.relay.wait_idle().await;

    assert_eq!(h.platform.uploads()[0].thumbnail.as_deref(), Some(stored.as_path()));
    assert!(stored.exists());
}

#[tokio::test]
async fn test_plain_url_is_fetched_and_branded() {
    let h = Harness::new().await;
    let (u, chat) = user(1);

    let submitted = h
        .relay
        .submit_url(u, chat, "https://cdn.example.com/files/trailer.mkv")
        .await
        .unwrap();
    assert!(matches!(submitted, Submission::Queued { .. }));
    h.relay.wait_idle().await;

    assert_eq!(
        h.fetch.fetched(),
        vec!["https://cdn.example.com/files/trailer.mkv"]
    );
    assert_eq!(h.platform.uploads()[0].file_name, branded(".mkv"));
}

#[tokio::test]
async fn test_extracted_variant_keeps_title() {
    let variants = vec![Variant::best(), Variant::video("137", 1080, "mp4"), Variant::mp3()];
    let h = Harness::with(
        FakePlatform::new(),
        FakeTools::new(),
        FakeFetch::with_extractor("Launch: Day 1", variants),
    )
    .await;
    let (u, chat) = user(1);

    let offered = h
        .relay
        .submit_url(u, chat, "https://video.example.com/watch?v=1")
        .await
        .unwrap();
    let Submission::VariantsOffered(prompt) = offered else {
        panic!("expected a variant list, got {:?}", offered);
    };

    h.relay.choose_variant(u, chat, prompt, 3).await.unwrap();
    h.relay.wait_idle().await;

    let uploads = h.platform.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].file_name, "Launch_ Day 1.mp3");
    assert_eq!(uploads[0].kind, MediaKind::Audio);
    assert!(uploads[0].thumbnail.is_none());
    assert!(h.work_files().is_empty());
}

#[tokio::test]
async fn test_panicking_stage_still_removes_temp_files() {
    let h = Harness::with(
        FakePlatform::new(),
        FakeTools::new().panicking_normalize(),
        FakeFetch::new(),
    )
    .await;
    let (u, chat) = user(1);

    h.relay
        .submit_attachment(u, chat, attachment(chat, 1, "movie.mkv", "bytes"))
        .await
        .unwrap();
    let mut notes = attachment(chat, 2, "notes.txt", "text");
    notes.kind = MediaKind::Document;
    h.relay.submit_attachment(u, chat, notes).await.unwrap();
    h.relay.wait_idle().await;

    assert!(h.work_files().is_empty());
    let status = h.platform.find_sent("Queue: Processing started for `movie.mkv`").unwrap();
    let report = h.platform.last_edit(status).unwrap();
    assert!(report.starts_with("Error: internal failure"), "{}", report);

    // The worker keeps going after the panic.
    assert_eq!(h.platform.uploads().len(), 1);
    assert_eq!(h.relay.tasks().active(u), 0);
}
