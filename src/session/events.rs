//! Commands into the session and events out of it.

use std::time::Duration;

use crate::audio::MicDevice;
use crate::escalation::Engagement;
use crate::link::TranscriptSource;
use crate::scoring::{Alignment, Category};

use super::state::SessionMode;

/// User intent and device control, sent by the host (tray, CLI, UI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    StartWork,
    StartChat,
    /// Back to idle.
    Stop,
    /// Switch microphone (None = automatic).
    SelectMic(Option<usize>),
    /// Re-probe microphones and report the list.
    RefreshMics,
    AcceptBreak,
    RefuseBreak,
}

/// State of the perception link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    /// The link is unavailable; the next attempt starts after `delay`.
    Retrying { attempt: u32, delay: Duration },
    Closed,
}

/// Why a scheduled close did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCancelReason {
    UserSpoke,
    Superseded,
}

/// Runtime events for UIs and observability.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModeChanged(SessionMode),
    Link(LinkStatus),
    Classified {
        category: Category,
        alignment: Alignment,
        delta: f64,
        score: f64,
    },
    Engagement(Engagement),
    TaskSet(String),
    CloseScheduled {
        target: String,
    },
    CloseCancelled {
        target: String,
        reason: CloseCancelReason,
    },
    ClosePerformed {
        target: String,
    },
    CloseRejected {
        target: Option<String>,
        message: String,
    },
    Mood {
        mood: String,
        intensity: f64,
    },
    BreakReminder {
        tier: usize,
        session_minutes: u64,
    },
    BreakStarted {
        length: Duration,
    },
    BreakEnded {
        tier: usize,
    },
    BreakSkipped {
        tier: usize,
    },
    /// Index of the streaming microphone, None when nothing is open.
    Microphone {
        active: Option<usize>,
    },
    /// No compatible microphone; the audio pipeline for this connection ended.
    MicrophoneUnavailable,
    Microphones(Vec<MicDevice>),
    Transcript {
        source: TranscriptSource,
        text: String,
    },
}

/// Point-in-time view of the session record.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    pub score: f64,
    pub alignment: Alignment,
    pub category: Option<Category>,
    pub task: Option<String>,
    pub engagement: Engagement,
    pub mood_bias: f64,
    pub break_reminder: bool,
    pub on_break: bool,
    pub close_pending: bool,
    pub resumable: bool,
}
