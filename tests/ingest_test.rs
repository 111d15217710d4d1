//! End-to-end ingestion against a fake registration API and object store.

mod common;

use std::time::Duration;

use common::*;
use popoff_core::events::IngestEvent;
use popoff_core::{Error, PostRef};
use popoff_pipeline::state::{TRANSIENT_MESSAGE, UNSUPPORTED_MESSAGE};
use popoff_pipeline::{FailureReason, Outcome, PipelineState};

#[tokio::test]
async fn happy_path_publishes_post() {
    let h = TestHarness::new(vec![Attempt::ok(3)]).await;
    let handle = h.start();

    let outcome = outcome(&handle).await;
    assert_eq!(outcome, Outcome::Completed(PostRef("42".into())));
    assert_eq!(handle.state(), PipelineState::Completed);
    assert!(approx_eq(handle.progress(), 1.0));

    // One registration naming every package file.
    let regs = h.backend.registrations();
    assert_eq!(regs.len(), 1);
    assert_eq!(regs[0]["base_name"], "clip");
    assert_eq!(regs[0]["type"], "application/x-mpegURL");
    assert_eq!(
        regs[0]["files"],
        serde_json::json!(["playlist.m3u8", "segment_000.ts", "segment_001.ts", "segment_002.ts"])
    );

    // Package files in manifest order, thumbnail last.
    let objects = h.backend.objects();
    let names: Vec<_> = objects.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(
        names,
        ["playlist.m3u8", "segment_000.ts", "segment_001.ts", "segment_002.ts", "thumbnail"]
    );
    assert_eq!(objects[0].content_type, "application/x-mpegURL");
    assert!(String::from_utf8_lossy(&objects[0].bytes).starts_with("#EXTM3U"));
    assert_eq!(objects[1].content_type, "video/MP2T");
    assert_eq!(objects[1].bytes.len(), 188);
    assert_eq!(objects[4].content_type, "image/jpeg");
    assert_eq!(objects[4].bytes, b"\xFF\xD8\xFFthumb");

    // Commit carries the registered paths and the source metadata.
    let commits = h.backend.commits();
    assert_eq!(commits.len(), 1);
    let c = &commits[0];
    assert_eq!(c["file_path"], "hls/clip/playlist.m3u8");
    assert_eq!(c["thumbnail_path"], "thumbs/clip.jpg");
    assert_eq!(c["file_size"], 4096);
    assert_eq!(c["length"], 10_000);
    assert_eq!(c["width"], 720);
    assert_eq!(c["height"], 1280);
    assert_eq!(c["description"], "first post");
    assert_eq!(c["tags"], "cats,funny");
}

#[tokio::test]
async fn progress_is_monotonic_and_steps_per_file() {
    let h = TestHarness::new(vec![Attempt::ok(3)]).await;
    let handle = h.start();
    outcome(&handle).await;

    let values = h.progress_values(&handle);
    assert!(!values.is_empty());
    for pair in values.windows(2) {
        assert!(pair[1] > pair[0], "progress regressed: {values:?}");
    }
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));

    // Four package files plus the thumbnail: each transfer adds 0.45 / 5.
    let uploads: Vec<f64> = values.iter().copied().filter(|v| *v > 0.5 && *v < 1.0).collect();
    let expected = [0.59, 0.68, 0.77, 0.86, 0.95];
    assert_eq!(uploads.len(), expected.len(), "{uploads:?}");
    for (got, want) in uploads.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{got} != {want}");
    }
    assert!(approx_eq(*values.last().unwrap(), 1.0));
}

#[tokio::test]
async fn scratch_removed_after_success() {
    let h = TestHarness::new(vec![Attempt::ok(1)]).await;
    let handle = h.start();
    outcome(&handle).await;

    let job_dir = h.scratch_root().join(handle.id().to_string());
    assert!(!job_dir.exists());
}

#[tokio::test]
async fn falls_back_to_secondary_profile() {
    let h = TestHarness::new(vec![Attempt::fail(), Attempt::ok(2)]).await;
    let handle = h.start();

    let outcome = outcome(&handle).await;
    assert!(matches!(outcome, Outcome::Completed(_)));

    let calls = h.engine.invocations();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].iter().any(|a| a == "libopenh264"));
    assert!(calls[1].iter().any(|a| a == "libopenh264"));
    // Same output location for both attempts.
    assert_eq!(calls[0].last(), calls[1].last());

    // Nothing left over from the failed attempt.
    assert_eq!(h.backend.objects().len(), 4);
}

#[tokio::test]
async fn error_in_primary_log_triggers_fallback() {
    let primary = Attempt {
        log: "[h264_videotoolbox] Error: cannot create compression session".into(),
        ..Attempt::ok(1)
    };
    let h = TestHarness::new(vec![primary, Attempt::ok(1)]).await;
    let handle = h.start();

    assert!(matches!(outcome(&handle).await, Outcome::Completed(_)));
    assert_eq!(h.engine.invocations().len(), 2);
}

#[tokio::test]
async fn both_profiles_failing_is_unsupported_without_network() {
    let h = TestHarness::new(vec![Attempt::fail(), Attempt::fail()]).await;
    let handle = h.start();

    let outcome = outcome(&handle).await;
    assert_eq!(outcome, Outcome::Failed(FailureReason::Unsupported));
    assert_eq!(outcome.user_message(), Some(UNSUPPORTED_MESSAGE));
    assert_eq!(h.engine.invocations().len(), 2);
    assert_eq!(h.backend.request_count(), 0);

    let history = h.events.job_history(handle.id());
    let last = history.last().unwrap();
    assert!(matches!(
        &last.payload,
        IngestEvent::JobFailed { reason, message, .. }
            if reason == "unsupported" && message == UNSUPPORTED_MESSAGE
    ));
}

#[tokio::test]
async fn cancel_during_transcode() {
    let h = TestHarness::new(vec![Attempt::stalled()]).await;
    let handle = h.start();

    wait_for_state(&handle, "transcoding").await;
    handle.cancel();

    assert_eq!(outcome(&handle).await, Outcome::Cancelled);
    assert_eq!(handle.state(), PipelineState::Cancelled);
    assert_eq!(h.engine.invocations().len(), 1);
    assert_eq!(h.backend.request_count(), 0);
    assert!(handle.progress() < 0.5);

    // Cancellation is silent: no failure event.
    let history = h.events.job_history(handle.id());
    assert!(matches!(history.last().unwrap().payload, IngestEvent::JobCancelled { .. }));
    assert!(!history
        .iter()
        .any(|e| matches!(e.payload, IngestEvent::JobFailed { .. })));
}

#[tokio::test]
async fn cancel_during_upload_keeps_completed_transfers() {
    let behavior = BackendBehavior {
        stall_puts_after: Some(2),
        ..Default::default()
    };
    let h = TestHarness::with_behavior(vec![Attempt::ok(3)], behavior).await;
    let handle = h.start();

    h.backend.wait_for_objects(2).await;
    // The third transfer stalls; wait until the client has seen the second succeed.
    tokio::time::timeout(WAIT, async {
        while handle.progress() < 0.68 - 1e-9 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second transfer was not acknowledged");
    assert_eq!(handle.state(), PipelineState::Uploading);
    handle.cancel();

    assert_eq!(outcome(&handle).await, Outcome::Cancelled);
    assert_eq!(h.backend.objects().len(), 2);
    assert!(h.backend.commits().is_empty());
    // Two of five transfers: 0.5 + 2 * 0.09.
    assert!((handle.progress() - 0.68).abs() < 1e-9);

    // Scratch is kept for a job that did not complete.
    assert!(h.scratch_root().join(handle.id().to_string()).exists());
}

#[tokio::test]
async fn cancel_is_idempotent_after_completion() {
    let h = TestHarness::new(vec![Attempt::ok(1)]).await;
    let handle = h.start();
    let first = outcome(&handle).await;

    handle.cancel();
    handle.cancel();
    assert_eq!(outcome(&handle).await, first);
    assert_eq!(handle.state(), PipelineState::Completed);
}

#[tokio::test]
async fn transfer_failure_stops_remaining_uploads() {
    let behavior = BackendBehavior {
        fail_put_at: Some(3),
        ..Default::default()
    };
    let h = TestHarness::with_behavior(vec![Attempt::ok(3)], behavior).await;
    let handle = h.start();

    let outcome = outcome(&handle).await;
    match &outcome {
        Outcome::Failed(FailureReason::TransferFailed { file, detail }) => {
            assert_eq!(file, "segment_001.ts");
            assert!(detail.contains("500"), "{detail}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(outcome.user_message(), Some(TRANSIENT_MESSAGE));

    let names: Vec<_> = h.backend.objects().into_iter().map(|o| o.name).collect();
    assert_eq!(names, ["playlist.m3u8", "segment_000.ts"]);
    assert!(h.backend.commits().is_empty());
}

#[tokio::test]
async fn registration_failure() {
    let behavior = BackendBehavior {
        fail_register: true,
        ..Default::default()
    };
    let h = TestHarness::with_behavior(vec![Attempt::ok(2)], behavior).await;
    let handle = h.start();

    match outcome(&handle).await {
        Outcome::Failed(FailureReason::Registration(detail)) => {
            assert!(detail.contains("registration unavailable"), "{detail}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.backend.objects().is_empty());
    assert!(approx_eq(handle.progress(), 0.5));
}

#[tokio::test]
async fn missing_slot_fails_before_any_upload() {
    let behavior = BackendBehavior {
        omit_slot: Some("segment_001.ts".into()),
        ..Default::default()
    };
    let h = TestHarness::with_behavior(vec![Attempt::ok(2)], behavior).await;
    let handle = h.start();

    assert_eq!(
        outcome(&handle).await,
        Outcome::Failed(FailureReason::MissingSlot("segment_001.ts".into()))
    );
    assert!(h.backend.objects().is_empty());
}

#[tokio::test]
async fn commit_failure_after_all_uploads() {
    let behavior = BackendBehavior {
        fail_commit: true,
        ..Default::default()
    };
    let h = TestHarness::with_behavior(vec![Attempt::ok(1)], behavior).await;
    let handle = h.start();

    assert!(matches!(
        outcome(&handle).await,
        Outcome::Failed(FailureReason::CommitFailed(_))
    ));
    assert_eq!(h.backend.objects().len(), 3);
    assert_eq!(h.backend.commits().len(), 1);
    assert!(approx_eq(handle.progress(), 0.95));
}

#[tokio::test]
async fn too_long_source_is_rejected_without_a_job() {
    let h = TestHarness::new(vec![Attempt::ok(1)]).await;

    let err = h
        .service
        .start(h.source_with_duration(Duration::from_millis(60_001)), h.draft())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(h.events.recent_events(10).is_empty());
    assert!(h.engine.invocations().is_empty());
    assert_eq!(h.backend.request_count(), 0);
}

#[tokio::test]
async fn source_at_the_limit_is_accepted() {
    let h = TestHarness::new(vec![Attempt::ok(1)]).await;
    let handle = h
        .service
        .start(h.source_with_duration(Duration::from_secs(60)), h.draft())
        .unwrap();
    assert!(matches!(outcome(&handle).await, Outcome::Completed(_)));
}

#[tokio::test]
async fn missing_thumbnail_is_rejected() {
    let h = TestHarness::new(vec![Attempt::ok(1)]).await;
    let mut draft = h.draft();
    draft.thumbnail = h.dir.path().join("nope.jpg");

    let err = h.service.start(h.source(), draft).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn events_follow_the_state_machine() {
    let h = TestHarness::new(vec![Attempt::fail(), Attempt::ok(1)]).await;
    let handle = h.start();
    outcome(&handle).await;

    let history = h.events.job_history(handle.id());
    assert!(matches!(
        &history[0].payload,
        IngestEvent::JobStarted { base_name, .. } if base_name == "clip"
    ));
    let states: Vec<String> = history
        .iter()
        .filter_map(|e| match &e.payload {
            IngestEvent::StateChanged { to, .. } => Some(to.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        ["transcoding", "discovering", "uploading", "committing", "completed"]
    );
    assert!(matches!(
        &history.last().unwrap().payload,
        IngestEvent::JobCompleted { post, .. } if post == "42"
    ));
}

#[tokio::test]
async fn concurrent_jobs_use_separate_scratch() {
    let h = TestHarness::new(vec![Attempt::ok(1), Attempt::ok(1)]).await;
    let a = h.start();
    let b = h.start();

    assert!(matches!(outcome(&a).await, Outcome::Completed(_)));
    assert!(matches!(outcome(&b).await, Outcome::Completed(_)));

    let outputs: Vec<_> = h
        .engine
        .invocations()
        .into_iter()
        .filter_map(|args| args.last().cloned())
        .collect();
    assert_eq!(outputs.len(), 2);
    assert_ne!(outputs[0], outputs[1]);
    assert_eq!(h.backend.registrations().len(), 2);
}
