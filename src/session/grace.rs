//! Grace period before a corrective close.
//!
//! A close request first lets the coach finish its current line, then holds
//! an interruptible window: user speech inside that window cancels the close.
//! The wait is owned by a [`PendingClose`] so replacing or abandoning a close
//! cancels it explicitly.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GraceConfig;

/// How a grace period ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceOutcome {
    /// No speech in the window; go ahead.
    Proceed,
    /// The user spoke inside the window.
    CancelledBySpeech,
    /// Replaced by another close or the session went away.
    Aborted,
}

/// Where a close request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOrigin {
    /// `close_distracting_tab`; answered with the call's id.
    ToolCall { id: String },
    /// Chosen locally at the strike stage.
    AutoStrike,
}

impl CloseOrigin {
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall { id } => Some(id),
            Self::AutoStrike => None,
        }
    }
}

/// Run the grace period.
///
/// Waits at least the minimum utterance time, then until playback is idle
/// (bounded by the maximum utterance wait), then holds the interrupt window.
/// Speech detected at or after the window opens cancels the close.
pub async fn wait_for_grace(
    config: &GraceConfig,
    mut speaking: watch::Receiver<bool>,
    mut speech: watch::Receiver<Option<Instant>>,
    cancel: &CancellationToken,
) -> GraceOutcome {
    let started = Instant::now();

    tokio::select! {
        _ = cancel.cancelled() => return GraceOutcome::Aborted,
        _ = tokio::time::sleep(config.utterance_wait()) => {}
    }

    let remaining = config.utterance_max_wait().saturating_sub(started.elapsed());
    tokio::select! {
        _ = cancel.cancelled() => return GraceOutcome::Aborted,
        _ = tokio::time::timeout(remaining, speaking.wait_for(|s| !*s)) => {}
    }

    let window_start = Instant::now();
    speech.borrow_and_update();
    let deadline = tokio::time::sleep(config.interrupt_window());
    tokio::pin!(deadline);
    let mut speech_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return GraceOutcome::Aborted,
            () = &mut deadline => return GraceOutcome::Proceed,
            changed = speech.changed(), if speech_open => {
                if changed.is_err() {
                    speech_open = false;
                    continue;
                }
                let spoke = *speech.borrow_and_update();
                if spoke.is_some_and(|at| at >= window_start) {
                    return GraceOutcome::CancelledBySpeech;
                }
            }
        }
    }
}

/// A scheduled close: the grace task and the token that stops it.
#[derive(Debug)]
pub struct PendingClose {
    pub origin: CloseOrigin,
    /// Title of the window that will be closed.
    pub target: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PendingClose {
    pub fn new(
        origin: CloseOrigin,
        target: String,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            origin,
            target,
            cancel,
            task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the grace period. The task still runs to report the outcome.
    pub fn cancel(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.task
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::vad::SpeechClock;
    use std::time::Duration;

    fn config() -> GraceConfig {
        GraceConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn silence_proceeds_after_full_grace() {
        let (_speaking_tx, speaking) = watch::channel(false);
        let clock = SpeechClock::new();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let outcome = wait_for_grace(&config(), speaking, clock.subscribe(), &cancel).await;
        assert_eq!(outcome, GraceOutcome::Proceed);
        // 3 s utterance wait + 4 s window.
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn speech_in_window_cancels() {
        let (_speaking_tx, speaking) = watch::channel(false);
        let clock = SpeechClock::new();
        let cancel = CancellationToken::new();
        let rx = clock.subscribe();

        let task = tokio::spawn(async move { wait_for_grace(&config(), speaking, rx, &cancel).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        clock.mark(Instant::now());
        assert_eq!(task.await.unwrap(), GraceOutcome::CancelledBySpeech);
    }

    #[tokio::test(start_paused = true)]
    async fn speech_before_window_does_not_cancel() {
        let (_speaking_tx, speaking) = watch::channel(false);
        let clock = SpeechClock::new();
        let cancel = CancellationToken::new();
        let rx = clock.subscribe();

        let task = tokio::spawn(async move { wait_for_grace(&config(), speaking, rx, &cancel).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.mark(Instant::now());
        assert_eq!(task.await.unwrap(), GraceOutcome::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_playback_but_not_forever() {
        let (speaking_tx, speaking) = watch::channel(true);
        let clock = SpeechClock::new();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let outcome = wait_for_grace(&config(), speaking, clock.subscribe(), &cancel).await;
        assert_eq!(outcome, GraceOutcome::Proceed);
        // Bounded by the 8 s maximum, then the 4 s window.
        assert_eq!(start.elapsed(), Duration::from_secs(12));
        drop(speaking_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_close_cancel_aborts() {
        let (_speaking_tx, speaking) = watch::channel(false);
        let clock = SpeechClock::new();
        let token = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let task_token = token.clone();
        let speech = clock.subscribe();
        let task = tokio::spawn(async move {
            let outcome = wait_for_grace(&config(), speaking, speech, &task_token).await;
            let _ = tx.send(outcome);
        });
        let pending = PendingClose::new(CloseOrigin::AutoStrike, "Reddit".into(), token, task);
        assert_eq!(pending.origin.tool_call_id(), None);
        pending.cancel().await.unwrap();
        assert_eq!(rx.await.unwrap(), GraceOutcome::Aborted);
    }
}
