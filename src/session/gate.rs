//! Per-turn speech gate for response audio.
//!
//! Response audio is held back until the current engagement permits speech.
//! The first permitted chunk releases everything buffered so far in the turn,
//! and from then on the turn plays through: permission is never withdrawn
//! mid-turn. Audio from a turn that never got permission is discarded when
//! the turn completes.

use std::collections::VecDeque;

/// Upper bound on audio held back in one turn (30 s at 24 kHz, 16-bit).
pub const MAX_BUFFERED_BYTES: usize = 24_000 * 2 * 30;

#[derive(Debug, Default)]
pub struct SpeechGate {
    granted: bool,
    pending: VecDeque<Vec<u8>>,
    pending_bytes: usize,
}

impl SpeechGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the current turn has been granted speech.
    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Bytes currently held back.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Offer one chunk. `permitted` is only consulted until the turn is
    /// granted. Returns the chunks to play now, in order.
    pub fn offer(&mut self, chunk: Vec<u8>, permitted: bool) -> Vec<Vec<u8>> {
        if self.granted {
            return vec![chunk];
        }
        if permitted {
            self.granted = true;
            let mut out: Vec<Vec<u8>> = self.pending.drain(..).collect();
            self.pending_bytes = 0;
            out.push(chunk);
            return out;
        }

        self.pending_bytes += chunk.len();
        self.pending.push_back(chunk);
        while self.pending_bytes > MAX_BUFFERED_BYTES {
            match self.pending.pop_front() {
                Some(old) => self.pending_bytes -= old.len(),
                None => break,
            }
        }
        Vec::new()
    }

    /// End of turn: drop held-back audio and re-arm the gate. Returns the
    /// number of bytes discarded.
    pub fn turn_complete(&mut self) -> usize {
        let dropped = self.pending_bytes;
        self.pending.clear();
        self.pending_bytes = 0;
        self.granted = false;
        dropped
    }

    /// The user barged in; the turn is over.
    pub fn interrupt(&mut self) -> usize {
        self.turn_complete()
    }
}
