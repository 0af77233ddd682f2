//! Corrective closes: the user can talk the coach out of one during the
//! grace period; otherwise it happens exactly once.

use std::time::Duration;

use serde_json::json;
use tama::config::GraceConfig;
use tama::platform::CloseMode;
use tama::session::CloseCancelReason;
use tama::{SessionCommand, SessionEvent};

use crate::helpers::{FakeDesktop, FakeMics, Harness, quiet_config};

fn close_request(target: &str) -> serde_json::Value {
    json!({"reason": "off task", "target_window": target})
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn speech_cancels_then_silence_closes_once() {
    let mut config = quiet_config();
    config.grace = GraceConfig {
        utterance_wait_ms: 50,
        utterance_max_wait_ms: 200,
        interrupt_window_ms: 500,
        force_speak_hold_ms: 1_000,
    };
    let desktop = FakeDesktop::with_windows(&[("YouTube - Firefox", 7), ("Notes", 2)]);
    let mut h = Harness::start(config, desktop, FakeMics::single(), &[]);

    h.send(SessionCommand::StartWork);
    let mut side = h.accepted().await;
    h.expect_event(|e| matches!(e, SessionEvent::Microphone { active: Some(0) }))
        .await;

    side.call("close-1", "close_distracting_tab", close_request("YouTube"))
        .await;
    h.expect_event(|e| matches!(e, SessionEvent::CloseScheduled { target } if target == "YouTube - Firefox"))
        .await;
    h.mics.talk(true);

    let answer = side.response("close-1").await;
    assert_eq!(answer.response["status"], "cancelled");
    h.expect_event(|e| {
        matches!(
            e,
            SessionEvent::CloseCancelled {
                reason: CloseCancelReason::UserSpoke,
                ..
            }
        )
    })
    .await;
    assert!(h.desktop.closed().is_empty());

    h.mics.talk(false);
    tokio::time::sleep(Duration::from_millis(100)).await;

    side.call("close-2", "close_distracting_tab", close_request("YouTube"))
        .await;
    let answer = side.response("close-2").await;
    assert_eq!(answer.response["status"], "success");
    assert_eq!(
        answer.response["message"],
        "Closing 'YouTube - Firefox' via tab close: off task"
    );
    h.expect_event(|e| matches!(e, SessionEvent::ClosePerformed { .. }))
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.desktop.closed(), vec![(7, CloseMode::CloseTab)]);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn protected_and_unknown_targets_are_refused() {
    let desktop = FakeDesktop::with_windows(&[("Visual Studio Code", 3), ("Reddit - Chrome", 4)]);
    let mut h = Harness::start(quiet_config(), desktop, FakeMics::none(), &[]);

    h.send(SessionCommand::StartWork);
    let mut side = h.accepted().await;

    side.call("p1", "close_distracting_tab", close_request("Visual Studio Code"))
        .await;
    let answer = side.response("p1").await;
    assert_eq!(answer.response["status"], "error");
    assert_eq!(
        answer.response["message"],
        "Did not close. 'Visual Studio Code' is a protected app."
    );

    side.call("p2", "close_distracting_tab", close_request("Netflix"))
        .await;
    let answer = side.response("p2").await;
    assert_eq!(
        answer.response["message"],
        "Could not find window matching 'Netflix'. Provide the exact title from open_windows list."
    );

    assert!(h.desktop.closed().is_empty());
    assert!(!h.handle.snapshot().close_pending);

    h.shutdown().await;
}
