//! Settings, caption-only mode, batches and saved channels.

use relay_models::{MediaKind, MessageRef, VideoMetadata};
use relay_worker::settings::ThumbnailChoice;
use relay_worker::Submission;

use super::fakes::{attachment, user, Harness};

#[tokio::test]
async fn test_template_saved_from_next_message() {
    let h = Harness::new().await;
    let (u, chat) = user(1);

    h.relay.begin_template(u, chat).await.unwrap();
    let handled = h
        .relay
        .handle_text(u, MessageRef::new(chat, 10), None, "Ep [01]")
        .await
        .unwrap();
    assert_eq!(handled, Submission::Replied);
    assert_eq!(
        h.relay.view_template(u, chat).await.unwrap().as_deref(),
        Some("Ep [01]")
    );

    // Later plain text is no longer taken as a template.
    let ignored = h
        .relay
        .handle_text(u, MessageRef::new(chat, 11), None, "hello")
        .await
        .unwrap();
    assert_eq!(ignored, Submission::Ignored);

    assert!(h.relay.delete_template(u, chat).await.unwrap());
    assert!(!h.relay.delete_template(u, chat).await.unwrap());
}

#[tokio::test]
async fn test_caption_only_resends_without_download() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    h.relay.settings().save_template(u, "Clip [1]").await;
    h.relay.set_caption_only(u, chat, true).await.unwrap();

    let mut doc = attachment(chat, 1, "clip.bin", "data");
    doc.kind = MediaKind::Document;
    doc.metadata = VideoMetadata {
        duration: 12,
        width: 0,
        height: 0,
    };
    let submitted = h.relay.submit_attachment(u, chat, doc).await.unwrap();
    assert!(matches!(submitted, Submission::Resent(_)));

    let resends = h.platform.resends();
    assert_eq!(resends.len(), 1);
    assert_eq!(resends[0].caption, "**Clip 1**");
    assert!(resends[0].as_video);
    assert!(h.work_files().is_empty());
    assert_eq!(h.platform.upload_attempts(), 0);
}

#[tokio::test]
async fn test_caption_only_requires_template() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    h.relay.set_caption_only(u, chat, true).await.unwrap();

    let submitted = h
        .relay
        .submit_attachment(u, chat, attachment(chat, 1, "a.mkv", "x"))
        .await
        .unwrap();
    assert_eq!(submitted, Submission::Replied);
    assert!(h.platform.resends().is_empty());
}

#[tokio::test]
async fn test_batch_resends_in_order() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    h.relay.settings().save_template(u, "Part [01]").await;
    h.relay.set_caption_only(u, chat, true).await.unwrap();

    h.relay
        .handle_text(u, MessageRef::new(chat, 1), None, "on")
        .await
        .unwrap();
    for id in 2..5 {
        let submitted = h
            .relay
            .submit_attachment(u, chat, attachment(chat, id, "a.mkv", "x"))
            .await
            .unwrap();
        assert_eq!(submitted, Submission::Collected((id - 1) as usize));
    }
    assert!(h.platform.resends().is_empty());

    h.relay
        .handle_text(u, MessageRef::new(chat, 9), None, "OK")
        .await
        .unwrap();

    let resends = h.platform.resends();
    let order: Vec<_> = resends.iter().map(|r| r.attachment.message.message_id).collect();
    let captions: Vec<_> = resends.iter().map(|r| r.caption.as_str()).collect();
    assert_eq!(order, vec![2, 3, 4]);
    assert_eq!(captions, vec!["**Part 01**", "**Part 02**", "**Part 03**"]);

    let texts = h.platform.sent_texts();
    assert!(texts.contains(&"Processing started for 3 items...".to_string()));
    assert_eq!(texts.last().map(String::as_str), Some("Batch processing complete."));
    let status = h.platform.find_sent("Collected 1 files").unwrap();
    assert!(h.platform.deleted().contains(&status.message_id));
}

#[tokio::test]
async fn test_caption_only_off_discards_batch() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    h.relay.settings().save_template(u, "[01]").await;
    h.relay.set_caption_only(u, chat, true).await.unwrap();
    h.relay
        .handle_text(u, MessageRef::new(chat, 1), None, "on")
        .await
        .unwrap();
    h.relay
        .submit_attachment(u, chat, attachment(chat, 2, "a.mkv", "x"))
        .await
        .unwrap();

    h.relay.set_caption_only(u, chat, false).await.unwrap();
    h.relay.set_caption_only(u, chat, true).await.unwrap();

    let submitted = h
        .relay
        .submit_attachment(u, chat, attachment(chat, 3, "b.mkv", "x"))
        .await
        .unwrap();
    assert!(matches!(submitted, Submission::Resent(_)));
}

#[tokio::test]
async fn test_cancel_with_nothing_running() {
    let h = Harness::new().await;
    let (u, chat) = user(1);

    assert_eq!(h.relay.cancel(u, chat, None).await.unwrap(), 0);
    assert_eq!(
        h.platform.sent_texts().last().map(String::as_str),
        Some("No active tasks to cancel.")
    );
}

#[tokio::test]
async fn test_thumbnail_offset_settings() {
    let h = Harness::new().await;
    let (u, chat) = user(1);

    assert_eq!(
        h.relay.set_thumbnail_offset(u, chat, "1m 30s").await.unwrap(),
        Some(90)
    );
    assert_eq!(
        h.relay.settings().thumbnail_choice(u).await,
        ThumbnailChoice::Frame {
            offset_secs: Some(90)
        }
    );

    assert_eq!(h.relay.set_thumbnail_offset(u, chat, "0s").await.unwrap(), None);
    assert_eq!(h.relay.set_thumbnail_offset(u, chat, "soon").await.unwrap(), None);

    let photo = attachment(chat, 5, "cover.jpg", "img");
    let stored = h.relay.set_custom_thumbnail(u, chat, &photo).await.unwrap();
    assert_eq!(
        h.relay.settings().thumbnail_choice(u).await,
        ThumbnailChoice::Custom(stored.clone())
    );

    h.relay.delete_thumbnail(u, chat).await.unwrap();
    assert!(!stored.exists());
    assert_eq!(
        h.relay.settings().thumbnail_choice(u).await,
        ThumbnailChoice::Frame { offset_secs: None }
    );
}

#[tokio::test]
async fn test_rename_uses_given_name() {
    let h = Harness::new().await;
    let (u, chat) = user(1);

    h.relay
        .rename(u, chat, attachment(chat, 1, "raw.MKV", "v"), "Finale: Part 2")
        .await
        .unwrap();
    h.relay.wait_idle().await;

    assert_eq!(h.platform.uploads()[0].file_name, "Finale_ Part 2.mkv");
}

#[tokio::test]
async fn test_saved_channels_persist() {
    let h = Harness::new().await;
    let (_, chat) = user(1);

    h.relay.save_channel(chat, "-1001", "Main").await.unwrap();
    h.relay.save_channel(chat, "-1002", "Backup").await.unwrap();
    assert!(h.relay.remove_channel(chat, "-1002").await.unwrap());
    assert!(!h.relay.remove_channel(chat, "-1003").await.unwrap());

    assert_eq!(
        h.relay.list_channels().await,
        vec![("-1001".to_string(), "Main".to_string())]
    );
    let saved = tokio::fs::read_to_string(h.work_dir().join("channels.json"))
        .await
        .unwrap();
    assert!(saved.contains("Main"));
}
