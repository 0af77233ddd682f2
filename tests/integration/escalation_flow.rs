//! Monitored work end to end: classifications drive the score, ticks drive
//! the stage.

use tama::escalation::{Engagement, EngagementStage};
use tama::link::ClientEvent;
use tama::{SessionCommand, SessionEvent, SessionMode};

use crate::helpers::{FakeDesktop, FakeMics, Harness, classify, quiet_config};

#[tokio::test(start_paused = true)]
async fn banned_streak_reaches_warning() {
    let mut config = quiet_config();
    config.scoring.banned_misaligned_delta = 2.0;
    let desktop = FakeDesktop::with_windows(&[("YouTube - Firefox", 7), ("Code", 2)]);
    let mut h = Harness::start(config, desktop, FakeMics::none(), &[]);

    h.send(SessionCommand::StartWork);
    h.expect_event(|e| *e == SessionEvent::ModeChanged(SessionMode::MonitoredWork))
        .await;
    let mut side = h.accepted().await;

    let first = side.directive().await;
    assert!(first.contains("active_window: YouTube - Firefox"));
    assert!(first.contains("S: 0.0"));
    assert!(first.ends_with("ONLY call classify_screen."));

    for (n, expected) in [2.0, 4.0, 6.0].into_iter().enumerate() {
        let id = format!("classify-{n}");
        side.call(&id, "classify_screen", classify("BANNED", 0.0)).await;
        let answer = side.response(&id).await;
        assert_eq!(answer.response["status"], "updated");
        assert_eq!(answer.response["S"], expected);
        assert_eq!(answer.response["cat"], "BANNED");
    }
    let _service = side.drain();

    h.expect_event(|e| *e == SessionEvent::Engagement(Engagement::Stage(EngagementStage::Suspicious)))
        .await;
    h.expect_event(|e| *e == SessionEvent::Engagement(Engagement::Stage(EngagementStage::Warning)))
        .await;

    let snapshot = h.handle.snapshot();
    assert!((snapshot.score - 6.0).abs() < 1e-9);
    assert_eq!(
        snapshot.engagement,
        Engagement::Stage(EngagementStage::Warning)
    );
    assert!(!snapshot.close_pending);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn classification_outside_work_is_refused() {
    let desktop = FakeDesktop::with_windows(&[("Notes", 1)]);
    let mut h = Harness::start(quiet_config(), desktop, FakeMics::none(), &[]);

    h.send(SessionCommand::StartChat);
    let mut side = h.accepted().await;
    side.call("c1", "classify_screen", classify("BANNED", 0.0)).await;
    let answer = side.response("c1").await;
    assert_eq!(answer.response["status"], "error");
    assert!((h.handle.snapshot().score).abs() < 1e-9);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn task_and_mood_are_acknowledged() {
    let desktop = FakeDesktop::with_windows(&[("Code", 2)]);
    let mut h = Harness::start(quiet_config(), desktop, FakeMics::none(), &[]);

    h.send(SessionCommand::StartWork);
    let mut side = h.accepted().await;

    side.call("t1", "set_current_task", serde_json::json!({"task": " thesis "}))
        .await;
    let answer = side.response("t1").await;
    assert_eq!(answer.response["status"], "task_set");
    assert_eq!(answer.response["current_task"], "thesis");
    h.expect_event(|e| *e == SessionEvent::TaskSet("thesis".into()))
        .await;

    side.call("m1", "report_mood", serde_json::json!({"mood": "Proud", "intensity": 2.0}))
        .await;
    let answer = side.response("m1").await;
    assert_eq!(answer.response["status"], "mood_reported");
    assert_eq!(answer.response["mood"], "proud");
    assert_eq!(answer.response["intensity"], 1.0);

    let mut directive = side.directive().await;
    while !directive.contains("scheduled_task: thesis") {
        assert!(directive.contains("scheduled_task: NOT SET"));
        directive = side.directive().await;
    }

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_chat_greets_then_ends() {
    let desktop = FakeDesktop::with_windows(&[]);
    let mut h = Harness::start(quiet_config(), desktop, FakeMics::none(), &[]);

    h.send(SessionCommand::StartChat);
    let mut side = h.accepted().await;

    let greeting = loop {
        match side.from_client.recv().await {
            Some(ClientEvent::Text(text)) => break text,
            Some(_) => {}
            None => panic!("chat connection closed"),
        }
    };
    assert!(greeting.starts_with("Greet the user!"));

    h.expect_event(|e| *e == SessionEvent::ModeChanged(SessionMode::Idle))
        .await;
    assert_eq!(h.handle.snapshot().mode, SessionMode::Idle);

    h.shutdown().await;
}
