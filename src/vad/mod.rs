//! Voice activity detection using energy-based analysis.
//!
//! Frames are 16-bit little-endian mono PCM as captured for the perception
//! service. A frame is speech when its RMS energy exceeds a fixed threshold.
//! This is a best-effort heuristic: malformed input is silence, never an error.

use tokio::sync::watch;
use tokio::time::Instant;

/// Default RMS threshold on raw 16-bit sample values.
pub const DEFAULT_THRESHOLD: f64 = 500.0;

/// Energy-threshold voice activity detector.
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f64,
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl EnergyVad {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify one PCM frame.
    pub fn is_speech(&self, frame: &[u8]) -> bool {
        is_speech(frame, self.threshold)
    }
}

/// Returns true when the frame's RMS energy is above `threshold`.
///
/// Empty frames and frames with a dangling odd byte are treated as silence.
pub fn is_speech(frame: &[u8], threshold: f64) -> bool {
    pcm16_rms(frame).is_some_and(|rms| rms > threshold)
}

/// RMS energy of a 16-bit little-endian PCM frame, or `None` if the frame is
/// empty or not a whole number of samples.
pub fn pcm16_rms(frame: &[u8]) -> Option<f64> {
    if frame.is_empty() || frame.len() % 2 != 0 {
        return None;
    }
    let n = frame.len() / 2;
    let sum_sq: f64 = frame
        .chunks_exact(2)
        .map(|b| {
            let s = f64::from(i16::from_le_bytes([b[0], b[1]]));
            s * s
        })
        .sum();
    Some((sum_sq / n as f64).sqrt())
}

/// Most recent moment user speech was detected.
///
/// Written by the capture task, read by the stage derivation and watched by
/// the grace-period close so speech can cancel it immediately.
#[derive(Debug, Clone)]
pub struct SpeechClock {
    tx: watch::Sender<Option<Instant>>,
}

impl Default for SpeechClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechClock {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Record speech at `at`.
    pub fn mark(&self, at: Instant) {
        self.tx.send_replace(Some(at));
    }

    /// When speech was last detected.
    pub fn last(&self) -> Option<Instant> {
        *self.tx.borrow()
    }

    /// Whether speech was detected within `window` before `now`.
    pub fn spoke_within(&self, window: std::time::Duration, now: Instant) -> bool {
        self.last()
            .is_some_and(|at| now.saturating_duration_since(at) < window)
    }

    /// Subscribe to speech updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<Instant>> {
        self.tx.subscribe()
    }
}
