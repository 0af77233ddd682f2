//! Contextual mood bias.
//!
//! The mood bias is a slow-moving tolerance adjustment in `[-1.5, 1.5]`
//! (negative = relaxed, positive = irritable). It colours the tone of the
//! coach through a natural-language framing sentence and never gates the
//! corrective action.

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::Language;

pub const MIN_BIAS: f64 = -1.5;
pub const MAX_BIAS: f64 = 1.5;

/// Infractions decay by one for each full interval of this many seconds.
const INFRACTION_DECAY_SECS: i64 = 600;

/// Mutable mood record, owned by the session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoodState {
    pub recent_infractions: u32,
    pub compliance_streak_start: Option<DateTime<Local>>,
    pub last_infraction: Option<DateTime<Local>>,
    /// Last computed bias, kept for logging.
    pub bias: f64,
}

/// Individual contributions to the bias, before clamping.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoodBreakdown {
    pub infractions: f64,
    pub streak: f64,
    pub time_of_day: f64,
    pub session_age: f64,
    pub oscillation: f64,
}

impl MoodBreakdown {
    /// Sum of contributions, clamped.
    pub fn bias(&self) -> f64 {
        (self.infractions + self.streak + self.time_of_day + self.session_age + self.oscillation)
            .clamp(MIN_BIAS, MAX_BIAS)
    }

    /// Sum of the event-driven contributions, without the oscillation.
    pub fn contextual(&self) -> f64 {
        self.infractions + self.streak + self.time_of_day + self.session_age
    }
}

fn minutes_between(start: DateTime<Local>, now: DateTime<Local>) -> f64 {
    (now - start).num_milliseconds() as f64 / 60_000.0
}

/// Slow bounded oscillation, ~10 minute period, amplitude at most 0.25.
pub fn oscillation(now: DateTime<Local>) -> f64 {
    let t = now.timestamp_millis() as f64 / 600_000.0;
    0.25 * (2.7 * t).sin() * (1.3 * t + 0.7).cos()
}

impl MoodState {
    /// Compute each contribution at `now`.
    pub fn breakdown(
        &self,
        now: DateTime<Local>,
        session_start: Option<DateTime<Local>>,
    ) -> MoodBreakdown {
        let infractions = (f64::from(self.recent_infractions) * 0.3).min(1.0);

        let streak = match self.compliance_streak_start {
            Some(start) => {
                let minutes = minutes_between(start, now);
                if minutes > 60.0 {
                    -0.8
                } else if minutes > 30.0 {
                    -0.5
                } else if minutes > 15.0 {
                    -0.2
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let hour = now.hour();
        let time_of_day = if hour >= 20 {
            -0.4
        } else if hour >= 18 {
            -0.2
        } else if hour < 8 {
            -0.3
        } else {
            0.0
        };

        let session_age = match session_start {
            Some(start) => {
                let minutes = minutes_between(start, now);
                if minutes > 120.0 {
                    -0.4
                } else if minutes > 60.0 {
                    -0.2
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        MoodBreakdown {
            infractions,
            streak,
            time_of_day,
            session_age,
            oscillation: oscillation(now),
        }
    }

    /// Bias in `[-1.5, 1.5]` at `now`.
    pub fn compute_bias(
        &self,
        now: DateTime<Local>,
        session_start: Option<DateTime<Local>>,
    ) -> f64 {
        self.breakdown(now, session_start).bias()
    }

    /// Misaligned classification: count it and break the compliance streak.
    pub fn track_infraction(&mut self, now: DateTime<Local>) {
        self.recent_infractions = self.recent_infractions.saturating_add(1);
        self.compliance_streak_start = None;
        self.last_infraction = Some(now);
    }

    /// Aligned classification: start or continue the streak, and forgive one
    /// infraction when a full decay interval has passed since the last one.
    pub fn track_compliance(&mut self, now: DateTime<Local>) {
        if self.compliance_streak_start.is_none() {
            self.compliance_streak_start = Some(now);
        }
        if let Some(last) = self.last_infraction
            && (now - last).num_seconds() >= INFRACTION_DECAY_SECS
            && self.recent_infractions > 0
        {
            self.recent_infractions -= 1;
            self.last_infraction = Some(now);
        }
    }
}

/// Natural-language framing for a bias value. Never exposes the number.
pub fn describe_mood(bias: f64, language: Language) -> &'static str {
    let band = if bias <= -1.0 {
        0
    } else if bias <= -0.5 {
        1
    } else if bias <= 0.2 {
        2
    } else if bias <= 0.7 {
        3
    } else if bias <= 1.0 {
        4
    } else {
        5
    };
    match language {
        Language::En => MOOD_EN[band],
        Language::Fr => MOOD_FR[band],
    }
}

const MOOD_EN: [&str; 6] = [
    "You're in a great mood. The user has been working well and you're relaxed; a small slip won't bother you.",
    "You're in a good mood. The user is working well and you're more patient than usual.",
    "Neutral mood. Nothing special, you're observing normally.",
    "You're a bit irritable. The user has slipped a few times recently and your patience is wearing thin.",
    "You're irritable. The user has procrastinated several times and your patience is razor-thin.",
    "You're on the edge. The user has pushed too far; the slightest slip and you'll snap.",
];

const MOOD_FR: [&str; 6] = [
    "Tu es de très bonne humeur. L'utilisateur a bien travaillé, tu es détendue et un petit écart ne te dérangera pas.",
    "Tu es de bonne humeur. L'utilisateur travaille bien et tu es plus patiente que d'habitude.",
    "Humeur neutre. Rien de spécial, tu observes normalement.",
    "Tu es un peu irritable. L'utilisateur a fait quelques écarts récemment et ta patience s'use.",
    "Tu es irritable. L'utilisateur a procrastiné plusieurs fois, tu es sur les nerfs.",
    "Tu es au bord de la crise. L'utilisateur a trop abusé, au moindre écart tu exploses.",
];
