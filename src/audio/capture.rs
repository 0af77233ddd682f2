//! Microphone capture task.
//!
//! Reads PCM frames from the resolved device on the blocking pool, marks the
//! [`SpeechClock`] when a frame is speech, and forwards frames through a small
//! bounded channel. When the channel is full the frame is dropped: a stalled
//! link must not grow memory or latency.
//!
//! The wanted device is read from a `watch` channel on every frame, so a
//! selection change swaps the stream without restarting the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::devices::{HotSwap, InputStream, MicResolver};
use crate::error::{CoachError, Result};
use crate::vad::{EnergyVad, SpeechClock};

/// Pause after a read failure before reopening, so a flapping device does
/// not spin.
const REOPEN_DELAY: Duration = Duration::from_millis(500);

/// Microphone capture with hot-swap.
pub struct MicCapture {
    resolver: Arc<MicResolver>,
    vad: EnergyVad,
    speech: SpeechClock,
    selection: watch::Receiver<Option<usize>>,
    active: watch::Sender<Option<usize>>,
}

impl MicCapture {
    /// `selection` carries the wanted device (None = automatic); `active`
    /// receives the index actually streaming.
    pub fn new(
        resolver: Arc<MicResolver>,
        vad: EnergyVad,
        speech: SpeechClock,
        selection: watch::Receiver<Option<usize>>,
        active: watch::Sender<Option<usize>>,
    ) -> Self {
        Self {
            resolver,
            vad,
            speech,
            selection,
            active,
        }
    }

    /// Run until cancelled or the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::NoMicrophone`] when no device can be opened at
    /// all; the audio pipeline for this connection ends there.
    pub async fn run(mut self, tx: mpsc::Sender<Vec<u8>>, cancel: CancellationToken) -> Result<()> {
        let mut swap = HotSwap::default();
        let mut stream: Option<Box<dyn InputStream>> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wanted = *self.selection.borrow_and_update();
            let mut current = match stream.take() {
                Some(s) if !swap.needs_switch(wanted) => s,
                old => {
                    // Close the old stream before opening the new one.
                    drop(old);
                    match self.open(wanted).await? {
                        Some(opened) => {
                            swap.record_opened(wanted, &opened);
                            self.active.send_replace(opened.index);
                            opened.stream
                        }
                        None => {
                            swap.record_failed(wanted);
                            self.active.send_replace(None);
                            return Err(CoachError::NoMicrophone);
                        }
                    }
                }
            };

            let read = tokio::task::spawn_blocking(move || {
                let frame = current.read_frame();
                (current, frame)
            });
            let (returned, frame) = tokio::select! {
                _ = cancel.cancelled() => break,
                joined = read => joined.map_err(|e| CoachError::Audio(format!("capture read task failed: {e}")))?,
            };

            match frame {
                Ok(frame) => {
                    stream = Some(returned);
                    if self.vad.is_speech(&frame) {
                        self.speech.mark(Instant::now());
                    }
                    match tx.try_send(frame) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!("audio channel full, dropping frame");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Err(e) => {
                    warn!("microphone read failed, reopening: {e}");
                    drop(returned);
                    self.resolver.invalidate();
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(REOPEN_DELAY) => {}
                    }
                }
            }
        }

        self.active.send_replace(None);
        info!("microphone capture stopped");
        Ok(())
    }

    async fn open(&self, wanted: Option<usize>) -> Result<Option<super::devices::OpenedMic>> {
        let resolver = Arc::clone(&self.resolver);
        let opened = tokio::task::spawn_blocking(move || {
            let target = resolver.resolve_default(wanted)?;
            resolver.open_with_fallback(target)
        })
        .await
        .map_err(|e| CoachError::Audio(format!("capture open task failed: {e}")))?;

        match opened {
            Ok(opened) => {
                info!(wanted = ?wanted, index = ?opened.index, tier = ?opened.tier, "microphone streaming");
                Ok(Some(opened))
            }
            Err(e) => {
                warn!(wanted = ?wanted, "no microphone could be opened: {e}");
                Ok(None)
            }
        }
    }
}
