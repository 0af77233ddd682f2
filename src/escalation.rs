//! Time-windowed escalation of verbal engagement.
//!
//! Three timers record how long the suspicion score has stayed at or above
//! 3, 6 and 9. Each perception tick updates the timers, then
//! [`derive_engagement`] maps them (plus speech/override context) to the
//! permitted level of engagement. Rules are evaluated in strict priority
//! order; the first match wins.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{EscalationConfig, TimerMode};
use crate::scoring::{Alignment, Category};

/// Score thresholds for the three escalation timers.
pub const THRESHOLDS: [f64; 3] = [3.0, 6.0, 9.0];

/// When the score crossed each threshold, if it is still above it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationWindow {
    above_3: Option<Instant>,
    above_6: Option<Instant>,
    above_9: Option<Instant>,
}

impl EscalationWindow {
    /// Update timers for the current score.
    ///
    /// Reaching a threshold arms its timer (and any lower timer not yet
    /// armed); falling below a threshold clears that timer and every higher
    /// one. In [`TimerMode::Nested`] arming a higher timer additionally
    /// clears the lower ones.
    pub fn update(&mut self, score: f64, now: Instant, mode: TimerMode) {
        if score >= THRESHOLDS[0] {
            self.above_3.get_or_insert(now);
        } else {
            self.clear();
            return;
        }

        if score >= THRESHOLDS[1] {
            self.above_6.get_or_insert(now);
        } else {
            self.above_6 = None;
            self.above_9 = None;
            return;
        }

        if score >= THRESHOLDS[2] {
            self.above_9.get_or_insert(now);
        } else {
            self.above_9 = None;
        }

        if mode == TimerMode::Nested {
            if self.above_9.is_some() {
                self.above_6 = None;
                self.above_3 = None;
            } else if self.above_6.is_some() {
                self.above_3 = None;
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_clear(&self) -> bool {
        self.above_3.is_none() && self.above_6.is_none() && self.above_9.is_none()
    }

    pub fn above_3_since(&self) -> Option<Instant> {
        self.above_3
    }

    pub fn above_6_since(&self) -> Option<Instant> {
        self.above_6
    }

    pub fn above_9_since(&self) -> Option<Instant> {
        self.above_9
    }

    fn elapsed(since: Option<Instant>, now: Instant) -> Option<Duration> {
        since.map(|t| now.saturating_duration_since(t))
    }

    pub fn above_3_elapsed(&self, now: Instant) -> Option<Duration> {
        Self::elapsed(self.above_3, now)
    }

    pub fn above_6_elapsed(&self, now: Instant) -> Option<Duration> {
        Self::elapsed(self.above_6, now)
    }

    pub fn above_9_elapsed(&self, now: Instant) -> Option<Duration> {
        Self::elapsed(self.above_9, now)
    }
}

/// Punitive / observational engagement stages, mildest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStage {
    /// Silent; classification only.
    Muzzled,
    /// One short question allowed.
    Curious,
    /// One contextual remark allowed.
    Suspicious,
    /// Direct verbal warning.
    Warning,
    /// Final verbal warning.
    Ultimatum,
    /// Closing line plus the corrective action.
    Strike,
}

impl EngagementStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Muzzled => "muzzled",
            Self::Curious => "curious",
            Self::Suspicious => "suspicious",
            Self::Warning => "warning",
            Self::Ultimatum => "ultimatum",
            Self::Strike => "strike",
        }
    }
}

/// Why speech is permitted outside the escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeSpeechReason {
    CasualChat,
    Greeting,
    ForceSpeak,
    BreakReminder,
    UserSpeaking,
}

/// Result of stage derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Engagement {
    /// Non-punitive free speech.
    Free(FreeSpeechReason),
    Stage(EngagementStage),
}

impl Engagement {
    pub const MUZZLED: Self = Self::Stage(EngagementStage::Muzzled);

    /// Whether response audio may be played this turn.
    pub fn permits_speech(self) -> bool {
        !matches!(self, Self::Stage(EngagementStage::Muzzled))
    }

    /// Whether this engagement calls for the corrective close.
    pub fn requires_close(self) -> bool {
        matches!(self, Self::Stage(EngagementStage::Strike))
    }

    pub fn stage(self) -> Option<EngagementStage> {
        match self {
            Self::Stage(stage) => Some(stage),
            Self::Free(_) => None,
        }
    }
}

/// Per-tick inputs to [`derive_engagement`].
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    pub now: Instant,
    pub window: &'a EscalationWindow,
    pub alignment: Alignment,
    pub category: Option<Category>,
    /// How long the current focus target has been in front.
    pub dwell: Duration,
    pub user_spoke_recently: bool,
    pub force_speak: bool,
    pub break_reminder: bool,
    pub casual_chat: bool,
    /// Inside the greeting window at session start.
    pub greeting: bool,
}

fn exceeds(elapsed: Option<Duration>, secs: u64) -> bool {
    elapsed.is_some_and(|e| e > Duration::from_secs(secs))
}

/// Derive the permitted engagement for this tick.
pub fn derive_engagement(inputs: &StageInputs<'_>, config: &EscalationConfig) -> Engagement {
    if inputs.casual_chat {
        return Engagement::Free(FreeSpeechReason::CasualChat);
    }
    if inputs.greeting {
        return Engagement::Free(FreeSpeechReason::Greeting);
    }
    if inputs.force_speak {
        return Engagement::Free(FreeSpeechReason::ForceSpeak);
    }
    if inputs.break_reminder {
        return Engagement::Free(FreeSpeechReason::BreakReminder);
    }
    if inputs.user_spoke_recently {
        return Engagement::Free(FreeSpeechReason::UserSpeaking);
    }

    let now = inputs.now;
    let window = inputs.window;
    let above_9 = window.above_9_elapsed(now);

    let stage = if exceeds(above_9, config.strike_after_secs) {
        EngagementStage::Strike
    } else if exceeds(above_9, config.ultimatum_after_secs) {
        EngagementStage::Ultimatum
    } else if exceeds(window.above_6_elapsed(now), config.warning_after_secs) {
        EngagementStage::Warning
    } else if exceeds(window.above_3_elapsed(now), config.suspicious_after_secs) {
        EngagementStage::Suspicious
    } else if inputs.alignment <= Alignment::Ambiguous
        && inputs.category.is_some_and(Category::is_ambiguous)
        && inputs.dwell > Duration::from_secs(config.curiosity_dwell_secs)
    {
        EngagementStage::Curious
    } else {
        EngagementStage::Muzzled
    };
    Engagement::Stage(stage)
}
