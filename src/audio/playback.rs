//! Response audio playback.
//!
//! Incoming response chunks go through an unbounded queue to the playback
//! task, which feeds an [`AudioSink`]. Every chunk carries the generation it
//! was queued under; [`PlaybackHandle::interrupt`] bumps the generation and
//! flushes the sink so nothing queued before the interruption is heard.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// How often the sink is polled to update the speaking flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Output device seam. Chunks are 16-bit little-endian mono PCM at the
/// service's response rate.
pub trait AudioSink: Send + Sync {
    /// Queue samples for output.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejected the samples.
    fn enqueue(&self, pcm: &[u8]) -> Result<()>;

    /// Drop everything not yet played.
    fn clear(&self);

    /// Samples queued but not yet played.
    fn pending_samples(&self) -> usize;
}

/// Sink that discards audio, used when no output device is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn enqueue(&self, _pcm: &[u8]) -> Result<()> {
        Ok(())
    }

    fn clear(&self) {}

    fn pending_samples(&self) -> usize {
        0
    }
}

#[derive(Debug)]
enum PlaybackCommand {
    Chunk { generation: u64, pcm: Vec<u8> },
    Flush,
}

/// Cloneable handle to a running playback task.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    generation: Arc<AtomicU64>,
    speaking: watch::Receiver<bool>,
}

impl PlaybackHandle {
    /// Queue a chunk under the current generation.
    pub fn play(&self, pcm: Vec<u8>) {
        let generation = self.generation.load(Ordering::Acquire);
        if self.tx.send(PlaybackCommand::Chunk { generation, pcm }).is_err() {
            debug!("playback task gone, dropping chunk");
        }
    }

    /// Discard everything queued or playing.
    pub fn interrupt(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let _ = self.tx.send(PlaybackCommand::Flush);
    }

    /// Whether audio is currently being played.
    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    /// Watch the speaking flag.
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }

    /// Wait until playback is idle or `max` elapses. Returns whether it went idle.
    pub async fn wait_idle(&self, max: Duration) -> bool {
        let mut rx = self.speaking.clone();
        tokio::time::timeout(max, rx.wait_for(|speaking| !*speaking))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

/// Spawn the playback task. It runs until `cancel` fires or every handle is
/// dropped.
pub fn spawn_playback(
    sink: Arc<dyn AudioSink>,
    cancel: CancellationToken,
) -> (PlaybackHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (speaking_tx, speaking_rx) = watch::channel(false);
    let generation = Arc::new(AtomicU64::new(0));
    let handle = PlaybackHandle {
        tx,
        generation: Arc::clone(&generation),
        speaking: speaking_rx,
    };
    let task = tokio::spawn(run_playback(sink, rx, generation, speaking_tx, cancel));
    (handle, task)
}

async fn run_playback(
    sink: Arc<dyn AudioSink>,
    mut rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    generation: Arc<AtomicU64>,
    speaking: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    info!("playback started");
    let mut poll = tokio::time::interval(IDLE_POLL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(PlaybackCommand::Chunk { generation: chunk_gen, pcm }) => {
                    if chunk_gen != generation.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Err(e) = sink.enqueue(&pcm) {
                        warn!("playback enqueue failed: {e}");
                        continue;
                    }
                    speaking.send_if_modified(|s| !std::mem::replace(s, true));
                }
                Some(PlaybackCommand::Flush) => {
                    sink.clear();
                    speaking.send_if_modified(|s| std::mem::replace(s, false));
                }
                None => break,
            },
            _ = poll.tick() => {
                let busy = sink.pending_samples() > 0;
                speaking.send_if_modified(|s| std::mem::replace(s, busy) != busy);
            }
        }
    }

    sink.clear();
    speaking.send_replace(false);
    info!("playback stopped");
}
