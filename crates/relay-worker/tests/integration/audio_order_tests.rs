//! The two-step audio track reorder exchange.

use relay_models::{ChatId, MessageRef};
use relay_worker::{JobOutcome, ProbeOutcome, ReplyOutcome, Submission, TrackSelectionError};

use super::fakes::{attachment, branded, track, user, FakeFetch, FakePlatform, FakeTools, Harness};

async fn three_track_harness() -> Harness {
    let tools = FakeTools::new().with_tracks(vec![
        track(1, "jpn", "Japanese"),
        track(2, "eng", "English"),
        track(3, "spa", ""),
    ]);
    Harness::with(FakePlatform::new(), tools, FakeFetch::new()).await
}

/// Enable audio-change mode, send a file and return the prompt message.
async fn open_prompt(h: &Harness, owner: i64) -> MessageRef {
    let (u, chat) = user(owner);
    h.relay.settings().set_audio_change(u, true).await;
    let submitted = h
        .relay
        .submit_attachment(u, chat, attachment(chat, 1, "Show.mkv", "multi"))
        .await
        .unwrap();
    match submitted {
        Submission::AudioOrder(ProbeOutcome::AwaitingOrder { prompt, tracks }) => {
            assert_eq!(tracks.len(), 3);
            prompt
        }
        other => panic!("expected an open prompt, got {:?}", other),
    }
}

fn reply(chat: ChatId, id: i64) -> MessageRef {
    MessageRef::new(chat, id)
}

#[tokio::test]
async fn test_reply_reorders_tracks() {
    let h = three_track_harness().await;
    let (u, chat) = user(1);
    let prompt = open_prompt(&h, 1).await;

    let prompt_text = h.platform.last_edit(prompt).unwrap();
    assert!(prompt_text.contains("1. Stream 1 (jpn) - Japanese"));
    assert!(prompt_text.contains("3. Stream 3 (spa)"));

    let answer = h
        .relay
        .handle_text(u, reply(chat, 50), Some(prompt), "2,1")
        .await
        .unwrap();
    assert!(matches!(
        answer,
        Submission::AudioReply(ReplyOutcome::Accepted(_))
    ));
    h.relay.wait_idle().await;

    assert_eq!(h.tools.reorders(), vec![vec![2, 1]]);
    let uploads = h.platform.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].file_name, branded(".mkv"));
    assert_eq!(uploads[0].content, b"multi");

    let deleted = h.platform.deleted();
    assert!(deleted.contains(&prompt.message_id));
    assert!(deleted.contains(&50));
    assert!(!h.relay.audio().is_pending(prompt).await);
    assert!(h.work_files().is_empty());
}

#[tokio::test]
async fn test_out_of_range_reply_keeps_prompt_open() {
    let h = three_track_harness().await;
    let (u, chat) = user(1);
    let prompt = open_prompt(&h, 1).await;

    let answer = h
        .relay
        .handle_text(u, reply(chat, 50), Some(prompt), "5")
        .await
        .unwrap();
    assert_eq!(
        answer,
        Submission::AudioReply(ReplyOutcome::Rejected(TrackSelectionError::OutOfRange {
            value: 5,
            max: 3
        }))
    );
    assert!(h
        .platform
        .sent_texts()
        .contains(&"Invalid track number: 5. Valid track numbers: 1, 2, 3".to_string()));
    assert!(h.relay.audio().is_pending(prompt).await);
    assert!(h.tools.reorders().is_empty());

    h.relay
        .handle_text(u, reply(chat, 51), Some(prompt), "3")
        .await
        .unwrap();
    h.relay.wait_idle().await;
    assert_eq!(h.tools.reorders(), vec![vec![3]]);
}

#[tokio::test]
async fn test_other_user_cannot_answer() {
    let h = three_track_harness().await;
    let prompt = open_prompt(&h, 1).await;
    let (intruder, intruder_chat) = user(2);

    let answer = h
        .relay
        .audio()
        .handle_reply(intruder, prompt, reply(intruder_chat, 60), "1")
        .await
        .unwrap();
    assert_eq!(answer, ReplyOutcome::NotOwner);
    assert!(h.relay.audio().is_pending(prompt).await);
    assert_eq!(h.relay.audio().cancel(intruder, prompt).await, None);
    assert!(h.relay.audio().is_pending(prompt).await);
}

#[tokio::test]
async fn test_cancel_discards_pending_order() {
    let h = three_track_harness().await;
    let (u, chat) = user(1);
    let prompt = open_prompt(&h, 1).await;
    assert_eq!(h.work_files().len(), 1);

    let cancelled = h.relay.cancel(u, chat, Some(prompt)).await.unwrap();
    assert_eq!(cancelled, 1);
    assert!(!h.relay.audio().is_pending(prompt).await);
    assert!(h.work_files().is_empty());
    assert!(h.platform.deleted().contains(&prompt.message_id));
    assert_eq!(h.relay.tasks().active(u), 0);
    assert_eq!(h.relay.audio().pending_count(u).await, 0);
}

#[tokio::test]
async fn test_file_without_audio() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    h.relay.settings().set_audio_change(u, true).await;

    let submitted = h
        .relay
        .submit_attachment(u, chat, attachment(chat, 1, "silent.mkv", "mute"))
        .await
        .unwrap();
    assert_eq!(submitted, Submission::AudioOrder(ProbeOutcome::NoAudio));

    let status = h
        .platform
        .find_sent("Downloading file to analyze")
        .unwrap();
    assert_eq!(
        h.platform.last_edit(status).as_deref(),
        Some("No audio track found in this file.")
    );
    assert!(h.work_files().is_empty());
    assert_eq!(h.relay.tasks().active(u), 0);
}

#[tokio::test]
async fn test_single_track_remuxes_without_prompt() {
    let tools = FakeTools::new().with_tracks(vec![track(4, "eng", "")]);
    let h = Harness::with(FakePlatform::new(), tools, FakeFetch::new()).await;
    let (u, chat) = user(1);
    h.relay.settings().set_audio_change(u, true).await;

    let submitted = h
        .relay
        .submit_attachment(u, chat, attachment(chat, 1, "single", "one"))
        .await
        .unwrap();
    assert!(matches!(
        submitted,
        Submission::AudioOrder(ProbeOutcome::AutoRemux(_))
    ));
    let outcomes = h.relay.wait_idle().await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(h.tools.reorders(), vec![vec![4]]);
    assert_eq!(h.platform.uploads()[0].file_name, branded(".mkv"));
}

#[tokio::test]
async fn test_pending_orders_appear_in_mode_summary() {
    let h = three_track_harness().await;
    let (u, _) = user(1);
    open_prompt(&h, 1).await;

    let summary = h.relay.mode_summary(u).await;
    assert!(summary.contains("Audio change mode: ON"));
    assert!(summary.contains("Pending audio orders: 1"));
}

#[tokio::test]
async fn test_failed_reorder_is_reported_and_cleaned_up() {
    let tools = FakeTools::new()
        .with_tracks(vec![track(1, "jpn", ""), track(2, "eng", "")])
        .failing_reorder();
    let h = Harness::with(FakePlatform::new(), tools, FakeFetch::new()).await;
    let (u, chat) = user(1);
    h.relay.settings().set_audio_change(u, true).await;
    let Submission::AudioOrder(ProbeOutcome::AwaitingOrder { prompt, .. }) = h
        .relay
        .submit_attachment(u, chat, attachment(chat, 1, "Show.mkv", "multi"))
        .await
        .unwrap()
    else {
        panic!("expected an open prompt");
    };

    h.relay
        .handle_text(u, reply(chat, 50), Some(prompt), "2,1")
        .await
        .unwrap();
    let outcomes = h.relay.wait_idle().await;

    assert!(matches!(outcomes.as_slice(), [JobOutcome::Failed(_)]));
    assert_eq!(h.tools.reorders(), vec![vec![2, 1]]);
    assert_eq!(h.platform.upload_attempts(), 0);
    let status = h.platform.find_sent("Changing audio order").unwrap();
    assert_eq!(
        h.platform.last_edit(status).as_deref(),
        Some("Error: Remux failed: audio map rejected")
    );
    assert!(h.work_files().is_empty());
    assert_eq!(h.relay.tasks().active(u), 0);
}

#[tokio::test]
async fn test_prompt_accepts_only_one_reply() {
    let h = three_track_harness().await;
    let (u, chat) = user(1);
    let prompt = open_prompt(&h, 1).await;

    let first = h
        .relay
        .handle_text(u, reply(chat, 50), Some(prompt), "2,1")
        .await
        .unwrap();
    let second = h
        .relay
        .handle_text(u, reply(chat, 51), Some(prompt), "3")
        .await
        .unwrap();
    h.relay.wait_idle().await;

    assert!(matches!(
        first,
        Submission::AudioReply(ReplyOutcome::Accepted(_))
    ));
    assert_eq!(second, Submission::Ignored);
    assert_eq!(h.tools.reorders(), vec![vec![2, 1]]);
    assert_eq!(h.platform.uploads().len(), 1);
}
