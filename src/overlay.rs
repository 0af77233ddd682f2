//! One-way event sink toward the mascot overlay.
//!
//! The session never reads overlay state back. Events serialize to the
//! overlay bridge's JSON commands (`TAMA_ANIM`, `TAMA_MOOD`).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Overlay animation clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Animation {
    Hello,
    Peek,
    Suspicious,
    Angry,
    Strike,
    #[serde(rename = "bye")]
    Bye,
}

impl Animation {
    /// One-shot clips; everything else loops.
    pub fn loops(self) -> bool {
        !matches!(self, Self::Strike | Self::Bye | Self::Peek)
    }
}

/// Message to the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum OverlayEvent {
    #[serde(rename = "TAMA_ANIM")]
    Animation {
        anim: Animation,
        #[serde(rename = "loop")]
        looped: bool,
    },
    #[serde(rename = "TAMA_MOOD")]
    Mood { mood: String, intensity: f64 },
}

impl OverlayEvent {
    pub fn animation(anim: Animation) -> Self {
        Self::Animation {
            anim,
            looped: anim.loops(),
        }
    }
}

/// Receives overlay events. Implementations must not block.
pub trait OverlaySink: Send + Sync {
    fn send(&self, event: OverlayEvent);
}

/// Fans overlay events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastOverlay {
    tx: broadcast::Sender<OverlayEvent>,
}

impl BroadcastOverlay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.tx.subscribe()
    }
}

impl OverlaySink for BroadcastOverlay {
    fn send(&self, event: OverlayEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// Animation for a reported mood at a given intensity (`< 0.4` low,
/// `< 0.7` mid, else high). Unknown moods use a generic ramp.
pub fn animation_for_mood(mood: &str, intensity: f64) -> Animation {
    use Animation::{Angry, Hello, Peek, Strike, Suspicious};

    let (low, mid, high) = match mood {
        "calm" | "amused" | "proud" => (Hello, Hello, Hello),
        "curious" => (Peek, Suspicious, Suspicious),
        "disappointed" | "sarcastic" => (Suspicious, Suspicious, Angry),
        "annoyed" => (Suspicious, Angry, Angry),
        "angry" => (Angry, Angry, Angry),
        "furious" => (Angry, Angry, Strike),
        _ => (Hello, Suspicious, Angry),
    };
    if intensity < 0.4 {
        low
    } else if intensity < 0.7 {
        mid
    } else {
        high
    }
}

/// Both overlay messages for a `report_mood` invocation.
pub fn mood_events(mood: &str, intensity: f64) -> [OverlayEvent; 2] {
    [
        OverlayEvent::animation(animation_for_mood(mood, intensity)),
        OverlayEvent::Mood {
            mood: mood.to_owned(),
            intensity,
        },
    ]
}
