//! Reconnects: a rejected resumption handle is dropped and retried fast.

use std::time::Duration;

use tama::link::ServiceEvent;
use tama::session::LinkStatus;
use tama::{CoachError, SessionCommand, SessionEvent};

use crate::helpers::{Attempt, FakeDesktop, FakeMics, Harness, quiet_config};

#[tokio::test(start_paused = true)]
async fn stale_handle_is_cleared_and_retried_fast() {
    let desktop = FakeDesktop::with_windows(&[("Code", 1)]);
    let mut h = Harness::start(
        quiet_config(),
        desktop,
        FakeMics::none(),
        &[Attempt::Accept, Attempt::RejectHandle, Attempt::Accept],
    );

    h.send(SessionCommand::StartWork);
    let side = h.accepted().await;
    side.push(ServiceEvent::ResumptionUpdate {
        handle: Some("handle-1".into()),
        resumable: true,
    })
    .await;
    side.to_client
        .send(Err(CoachError::Transport("connection reset".into())))
        .await
        .unwrap();

    let first = h
        .expect_event(|e| matches!(e, SessionEvent::Link(LinkStatus::Retrying { .. })))
        .await;
    let SessionEvent::Link(LinkStatus::Retrying { attempt, delay }) = first else {
        unreachable!()
    };
    assert_eq!(attempt, 1);
    assert!(delay >= Duration::from_secs(3) && delay <= Duration::from_millis(3_300));

    let second = h
        .expect_event(|e| matches!(e, SessionEvent::Link(LinkStatus::Retrying { .. })))
        .await;
    assert_eq!(
        second,
        SessionEvent::Link(LinkStatus::Retrying {
            attempt: 1,
            delay: Duration::from_millis(500),
        })
    );

    let _resumed = h.accepted().await;
    h.expect_event(|e| *e == SessionEvent::Link(LinkStatus::Connected))
        .await;

    let handles: Vec<Option<String>> = h
        .service
        .setups()
        .into_iter()
        .map(|s| s.resume_handle)
        .collect();
    assert_eq!(handles, vec![None, Some("handle-1".to_owned()), None]);
    assert!(!h.handle.snapshot().resumable);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unreachable_service_backs_off_until_stopped() {
    let desktop = FakeDesktop::with_windows(&[]);
    let mut h = Harness::start(
        quiet_config(),
        desktop,
        FakeMics::none(),
        &[Attempt::Unreachable, Attempt::Unreachable],
    );

    h.send(SessionCommand::StartWork);
    for expected in [1, 2] {
        let event = h
            .expect_event(|e| matches!(e, SessionEvent::Link(LinkStatus::Retrying { .. })))
            .await;
        let SessionEvent::Link(LinkStatus::Retrying { attempt, .. }) = event else {
            unreachable!()
        };
        assert_eq!(attempt, expected);
    }

    h.send(SessionCommand::Stop);
    h.expect_event(|e| *e == SessionEvent::ModeChanged(tama::SessionMode::Idle))
        .await;

    h.shutdown().await;
}
