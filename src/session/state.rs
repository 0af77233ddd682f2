//! The session record.
//!
//! Every mutable field of a coaching session lives in [`SessionState`]. The
//! orchestrator owns the only instance; helpers take it by reference and
//! return what changed.

use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::breaks::BreakSchedule;
use crate::config::CoachConfig;
use crate::escalation::{Engagement, EscalationWindow, StageInputs, derive_engagement};
use crate::mood::MoodState;
use crate::scoring::{Alignment, Category, ScoringPolicy, SuspicionScore};

/// What the session is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Idle,
    CasualChat,
    MonitoredWork,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CasualChat => "casual_chat",
            Self::MonitoredWork => "monitored_work",
        }
    }
}

/// Tracks which window is in front and since when.
#[derive(Debug, Clone, Default)]
pub struct FocusTracker {
    title: Option<String>,
    since: Option<Instant>,
}

impl FocusTracker {
    /// Record the current focus target. Returns the dwell on it.
    pub fn observe(&mut self, title: Option<&str>, now: Instant) -> Duration {
        if self.title.as_deref() != title || self.since.is_none() {
            self.title = title.map(str::to_owned);
            self.since = Some(now);
        }
        self.dwell(now)
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn dwell(&self, now: Instant) -> Duration {
        self.since
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }
}

/// Result of applying one classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified {
    pub delta: f64,
    pub score: SuspicionScore,
}

/// Mutable session record.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub mode: SessionMode,
    pub score: SuspicionScore,
    pub alignment: Alignment,
    pub category: Option<Category>,
    /// Declared task; interpreted by the service, not locally.
    pub task: Option<String>,
    pub window: EscalationWindow,
    pub engagement: Engagement,
    pub focus: FocusTracker,
    pub mood: MoodState,
    pub breaks: BreakSchedule,
    /// Monitored-work start.
    pub work_started: Option<Instant>,
    pub work_started_at: Option<DateTime<Local>>,
    /// The opening greeting directive has been sent.
    pub greeted: bool,
    /// Casual chat start.
    pub chat_started: Option<Instant>,
    /// The coach may speak freely until then (set after a close).
    pub force_speak_until: Option<Instant>,
    /// Resumption handle from the last connection.
    pub resume_handle: Option<String>,
}

impl SessionState {
    pub fn new(config: &CoachConfig) -> Self {
        Self {
            mode: SessionMode::Idle,
            score: SuspicionScore::default(),
            alignment: Alignment::Aligned,
            category: None,
            task: None,
            window: EscalationWindow::default(),
            engagement: Engagement::MUZZLED,
            focus: FocusTracker::default(),
            mood: MoodState::default(),
            breaks: BreakSchedule::new(&config.breaks),
            work_started: None,
            work_started_at: None,
            greeted: false,
            chat_started: None,
            force_speak_until: None,
            resume_handle: None,
        }
    }

    /// Begin a fresh monitored-work session. This is the only place the
    /// score is reset.
    pub fn start_work(&mut self, now: Instant, wall: DateTime<Local>) {
        self.mode = SessionMode::MonitoredWork;
        self.score = SuspicionScore::default();
        self.alignment = Alignment::Aligned;
        self.category = None;
        self.task = None;
        self.window.clear();
        self.engagement = Engagement::MUZZLED;
        self.focus = FocusTracker::default();
        self.mood = MoodState::default();
        self.breaks.reset();
        self.work_started = Some(now);
        self.work_started_at = Some(wall);
        self.greeted = false;
        self.chat_started = None;
        self.force_speak_until = None;
        self.resume_handle = None;
    }

    pub fn start_chat(&mut self, now: Instant) {
        self.mode = SessionMode::CasualChat;
        self.chat_started = Some(now);
        self.engagement = Engagement::MUZZLED;
        self.force_speak_until = None;
        self.resume_handle = None;
    }

    /// Back to idle. Monitored-work fields are kept until the next start.
    pub fn end(&mut self) {
        self.mode = SessionMode::Idle;
        self.chat_started = None;
        self.force_speak_until = None;
        self.resume_handle = None;
        self.engagement = Engagement::MUZZLED;
    }

    /// Apply a classification: score delta, timers and mood hooks.
    pub fn apply_classification(
        &mut self,
        category: Category,
        alignment: Alignment,
        policy: &ScoringPolicy,
        config: &CoachConfig,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Classified {
        let delta = policy.delta(alignment, category);
        self.alignment = alignment;
        self.category = Some(category);
        self.score = self.score.apply(delta);
        self.window
            .update(self.score.value(), now, config.escalation.timer_mode);

        match alignment {
            Alignment::Misaligned => self.mood.track_infraction(wall),
            Alignment::Aligned => self.mood.track_compliance(wall),
            Alignment::Ambiguous => {}
        }
        self.mood.bias = self.mood.compute_bias(wall, self.work_started_at);

        Classified {
            delta,
            score: self.score,
        }
    }

    /// Refresh the timers against the held score.
    pub fn refresh_timers(&mut self, config: &CoachConfig, now: Instant) {
        self.window
            .update(self.score.value(), now, config.escalation.timer_mode);
    }

    pub fn force_speak_active(&self, now: Instant) -> bool {
        self.force_speak_until.is_some_and(|until| now < until)
    }

    pub fn hold_force_speak(&mut self, now: Instant, hold: Duration) {
        self.force_speak_until = Some(now + hold);
    }

    /// Monitored-work time so far.
    pub fn work_elapsed(&self, now: Instant) -> Duration {
        self.work_started
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    pub fn chat_elapsed(&self, now: Instant) -> Duration {
        self.chat_started
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    /// Whether the session is inside its opening greeting window.
    pub fn in_greeting_window(&self, config: &CoachConfig, now: Instant) -> bool {
        self.mode == SessionMode::MonitoredWork
            && self.work_started.is_some()
            && self.work_elapsed(now) < Duration::from_secs(config.escalation.greeting_window_secs)
    }

    /// Derive and store the engagement for `now`.
    pub fn derive(&mut self, config: &CoachConfig, user_spoke_recently: bool, now: Instant) -> Engagement {
        let inputs = StageInputs {
            now,
            window: &self.window,
            alignment: self.alignment,
            category: self.category,
            dwell: self.focus.dwell(now),
            user_spoke_recently,
            force_speak: self.force_speak_active(now),
            break_reminder: self.breaks.reminder_active(),
            casual_chat: self.mode == SessionMode::CasualChat,
            greeting: self.in_greeting_window(config, now),
        };
        self.engagement = derive_engagement(&inputs, &config.escalation);
        self.engagement
    }
}
