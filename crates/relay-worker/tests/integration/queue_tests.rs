//! Per-user ordering and upload serialization.

use std::time::Duration;

use relay_worker::Submission;

use super::fakes::{attachment, track, user, FakeFetch, FakePlatform, FakeTools, Harness};

/// A slow first job still uploads before a fast second one.
#[tokio::test]
async fn test_jobs_upload_in_submission_order() {
    let h = Harness::new().await;
    let (u, chat) = user(1);
    let slow = h.input_file("slow_first.mkv", b"first").await;
    let fast = h.input_file("second.mkv", b"second").await;

    let first = h
        .relay
        .submit_local_file(u, chat, slow, Some("o1"))
        .await
        .unwrap();
    let second = h
        .relay
        .submit_local_file(u, chat, fast, Some("o2"))
        .await
        .unwrap();
    assert!(matches!(first, Submission::Queued { .. }));
    assert!(matches!(second, Submission::Queued { .. }));

    h.relay.wait_idle().await;

    let names: Vec<_> = h.platform.uploads().into_iter().map(|u| u.file_name).collect();
    assert_eq!(names, vec!["o1.mkv", "o2.mkv"]);
    assert!(!h.relay.queue().is_active(u));
}

/// A queued job and an audio remux for the same user never upload at the
/// same time, while another user's upload runs alongside.
#[tokio::test]
async fn test_upload_windows_per_user() {
    let platform = FakePlatform::new().with_upload_delay(Duration::from_millis(150));
    let tools = FakeTools::new().with_tracks(vec![track(1, "jpn", "")]);
    let h = Harness::with(platform, tools, FakeFetch::new()).await;
    let (alice, alice_chat) = user(1);
    let (bob, bob_chat) = user(2);

    h.relay.settings().set_audio_change(alice, true).await;
    let remux = h
        .relay
        .submit_attachment(alice, alice_chat, attachment(alice_chat, 1, "a.mkv", "remux"))
        .await
        .unwrap();
    assert!(matches!(remux, Submission::AudioOrder(_)));
    h.relay.settings().set_audio_change(alice, false).await;

    h.relay
        .submit_attachment(alice, alice_chat, attachment(alice_chat, 2, "b.mkv", "queued"))
        .await
        .unwrap();
    h.relay
        .submit_attachment(bob, bob_chat, attachment(bob_chat, 3, "c.mkv", "other"))
        .await
        .unwrap();

    h.relay.wait_idle().await;

    let uploads = h.platform.uploads();
    assert_eq!(uploads.len(), 3);

    let alice_uploads: Vec<_> = uploads.iter().filter(|u| u.chat == alice_chat).collect();
    let bob_upload = uploads.iter().find(|u| u.chat == bob_chat).unwrap();
    assert_eq!(alice_uploads.len(), 2);

    let (a, b) = (alice_uploads[0], alice_uploads[1]);
    assert!(
        a.finished <= b.started || b.finished <= a.started,
        "uploads for one user overlapped"
    );

    let overlaps_bob = alice_uploads
        .iter()
        .any(|a| a.started < bob_upload.finished && bob_upload.started < a.finished);
    assert!(overlaps_bob, "different users should upload concurrently");
}

#[tokio::test]
async fn test_queue_drains_and_forgets_user() {
    let h = Harness::new().await;
    let (u, chat) = user(7);
    for i in 0..3 {
        let input = h.input_file(&format!("clip{}.mkv", i), b"data").await;
        h.relay.submit_local_file(u, chat, input, None).await.unwrap();
    }

    h.relay.wait_idle().await;

    assert_eq!(h.platform.uploads().len(), 3);
    assert_eq!(h.relay.queue().pending_count(u), 0);
    assert_eq!(h.relay.queue().total_pending(), 0);
    assert_eq!(h.relay.tasks().active(u), 0);
}
