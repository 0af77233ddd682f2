//! Break reminder schedule.
//!
//! Each tier has a checkpoint (session minutes) and a break length. Reaching
//! the current checkpoint raises a reminder; the user either accepts (a break
//! of the tier's length starts, and the tier advances when it ends) or refuses
//! (the tier advances immediately). Past the last tier no further reminders
//! are raised.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::BreakConfig;

/// Something the schedule wants the session to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakEvent {
    /// The checkpoint for `tier` was reached.
    ReminderRaised { tier: usize, session_minutes: u64 },
    /// The break for `tier` is over.
    BreakEnded { tier: usize },
}

#[derive(Debug, Clone)]
pub struct BreakSchedule {
    checkpoints: Vec<Duration>,
    durations: Vec<Duration>,
    tier: usize,
    reminder: bool,
    break_until: Option<Instant>,
}

impl BreakSchedule {
    pub fn new(config: &BreakConfig) -> Self {
        let minutes = |m: &u64| Duration::from_secs(m.saturating_mul(60));
        Self {
            checkpoints: config.checkpoints_min.iter().map(minutes).collect(),
            durations: config.durations_min.iter().map(minutes).collect(),
            tier: 0,
            reminder: false,
            break_until: None,
        }
    }

    /// Back to the first tier, no reminder, no break.
    pub fn reset(&mut self) {
        self.tier = 0;
        self.reminder = false;
        self.break_until = None;
    }

    pub fn tier(&self) -> usize {
        self.tier
    }

    pub fn reminder_active(&self) -> bool {
        self.reminder
    }

    pub fn on_break(&self) -> bool {
        self.break_until.is_some()
    }

    /// Session time at which the next reminder fires, if any remain.
    pub fn next_checkpoint(&self) -> Option<Duration> {
        self.checkpoints.get(self.tier).copied()
    }

    /// Advance the schedule. `session_elapsed` is the monitored-work time so far.
    pub fn tick(&mut self, session_elapsed: Duration, now: Instant) -> Option<BreakEvent> {
        if let Some(until) = self.break_until {
            if now < until {
                return None;
            }
            let tier = self.tier;
            self.break_until = None;
            self.advance();
            return Some(BreakEvent::BreakEnded { tier });
        }

        if self.reminder {
            return None;
        }
        let checkpoint = self.next_checkpoint()?;
        if session_elapsed < checkpoint {
            return None;
        }
        self.reminder = true;
        Some(BreakEvent::ReminderRaised {
            tier: self.tier,
            session_minutes: session_elapsed.as_secs() / 60,
        })
    }

    /// Start the break for the current tier. Returns its length, or `None`
    /// when no reminder is pending.
    pub fn accept(&mut self, now: Instant) -> Option<Duration> {
        if !self.reminder {
            return None;
        }
        self.reminder = false;
        let length = self
            .durations
            .get(self.tier)
            .or_else(|| self.durations.last())
            .copied()
            .unwrap_or_default();
        self.break_until = Some(now + length);
        Some(length)
    }

    /// Skip the current tier. Returns whether a reminder was pending.
    pub fn refuse(&mut self) -> bool {
        if !self.reminder {
            return false;
        }
        self.reminder = false;
        self.advance();
        true
    }

    fn advance(&mut self) {
        self.tier = (self.tier + 1).min(self.checkpoints.len());
    }
}
