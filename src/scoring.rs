//! Alignment–Suspicion Control (A.S.C.) scoring.
//!
//! The perception service classifies on-screen activity into a [`Category`]
//! and an [`Alignment`] with the declared task. [`ScoringPolicy::delta`] maps
//! that pair to a signed adjustment of the running [`SuspicionScore`], which is
//! always clamped to `[0, 10]`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ScoringConfig;

/// Window title fragments (lowercase) that may never be closed: creative
/// tools, IDEs, office and communication tools, and the coach itself.
pub const DEFAULT_PROTECTED_WINDOWS: &[&str] = &[
    "code",
    "cursor",
    "visual studio",
    "unreal",
    "blender",
    "word",
    "excel",
    "figma",
    "photoshop",
    "premiere",
    "davinci",
    "ableton",
    "fl studio",
    "suno",
    "notion",
    "obsidian",
    "terminal",
    "powershell",
    "godot",
    "focuspals",
    "tama",
];

/// Coarse nature of the on-screen activity, as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Work tools (IDE, terminal, documentation).
    #[serde(alias = "SANTE")]
    Work,
    /// Messaging and communication.
    #[serde(alias = "ZONE_GRISE")]
    Comms,
    /// Music and media tools.
    #[serde(alias = "FLUX")]
    Media,
    /// Pure entertainment.
    #[serde(alias = "BANNIE")]
    Banned,
    /// Productive, but not the declared task.
    #[serde(alias = "PROCRASTINATION_PRODUCTIVE")]
    OffTaskProductive,
}

impl Category {
    pub const ALL: [Self; 5] = [
        Self::Work,
        Self::Comms,
        Self::Media,
        Self::Banned,
        Self::OffTaskProductive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "WORK",
            Self::Comms => "COMMS",
            Self::Media => "MEDIA",
            Self::Banned => "BANNED",
            Self::OffTaskProductive => "OFF_TASK_PRODUCTIVE",
        }
    }

    /// Parse a category name, accepting the legacy names the service may
    /// still emit.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WORK" | "SANTE" => Some(Self::Work),
            "COMMS" | "ZONE_GRISE" => Some(Self::Comms),
            "MEDIA" | "FLUX" => Some(Self::Media),
            "BANNED" | "BANNIE" => Some(Self::Banned),
            "OFF_TASK_PRODUCTIVE" | "PROCRASTINATION_PRODUCTIVE" => Some(Self::OffTaskProductive),
            _ => None,
        }
    }

    /// Grey-zone categories where lingering earns a curious question.
    pub fn is_ambiguous(self) -> bool {
        matches!(self, Self::Comms | Self::Media | Self::OffTaskProductive)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the activity matches the declared task. Exactly three levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Misaligned,
    Ambiguous,
    Aligned,
}

impl Alignment {
    /// Snap a reported value to the nearest level: `> 0.75` aligned,
    /// `> 0.25` ambiguous, anything else (including NaN) misaligned.
    pub fn snap(raw: f64) -> Self {
        if raw > 0.75 {
            Self::Aligned
        } else if raw > 0.25 {
            Self::Ambiguous
        } else {
            Self::Misaligned
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Self::Aligned => 1.0,
            Self::Ambiguous => 0.5,
            Self::Misaligned => 0.0,
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.value())
    }
}

/// Running suspicion, bounded to `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct SuspicionScore(f64);

impl SuspicionScore {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 10.0;

    /// Build a score, clamping into range. NaN becomes zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(Self::MIN);
        }
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Apply a delta and clamp.
    #[must_use]
    pub fn apply(self, delta: f64) -> Self {
        Self::new(self.0 + delta)
    }
}

impl fmt::Display for SuspicionScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// The fixed delta table. Only the banned/misaligned entry is configurable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    pub banned_misaligned_delta: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ScoringPolicy {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            banned_misaligned_delta: config.banned_misaligned_delta,
        }
    }
}

impl ScoringPolicy {
    /// ΔS for one classification.
    pub fn delta(&self, alignment: Alignment, category: Category) -> f64 {
        match alignment {
            Alignment::Aligned => match category {
                // Trust still erodes on a banned app the task happens to tolerate.
                Category::Banned => 0.2,
                _ => -2.0,
            },
            Alignment::Ambiguous => 0.2,
            Alignment::Misaligned => match category {
                Category::Banned => self.banned_misaligned_delta,
                Category::Comms => 1.0,
                Category::Media | Category::OffTaskProductive => 0.5,
                Category::Work => 1.0,
            },
        }
    }
}

/// Whether a window title matches any protected fragment (case-insensitive).
pub fn is_protected<S: AsRef<str>>(title: &str, protected: &[S]) -> bool {
    let lower = title.to_lowercase();
    protected
        .iter()
        .any(|fragment| lower.contains(&fragment.as_ref().to_lowercase()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn snap_quantizes_to_three_levels() {
        assert_eq!(Alignment::snap(1.0), Alignment::Aligned);
        assert_eq!(Alignment::snap(0.76), Alignment::Aligned);
        assert_eq!(Alignment::snap(0.75), Alignment::Ambiguous);
        assert_eq!(Alignment::snap(0.5), Alignment::Ambiguous);
        assert_eq!(Alignment::snap(0.26), Alignment::Ambiguous);
        assert_eq!(Alignment::snap(0.25), Alignment::Misaligned);
        assert_eq!(Alignment::snap(-3.0), Alignment::Misaligned);
        assert_eq!(Alignment::snap(f64::NAN), Alignment::Misaligned);
    }

    #[test]
    fn aligned_non_banned_decreases_by_two() {
        let policy = ScoringPolicy::default();
        for category in Category::ALL {
            if category == Category::Banned {
                continue;
            }
            assert_eq!(policy.delta(Alignment::Aligned, category), -2.0);
        }
        assert_eq!(policy.delta(Alignment::Aligned, Category::Banned), 0.2);
    }

    #[test]
    fn ambiguous_always_climbs_slowly() {
        let policy = ScoringPolicy::default();
        for category in Category::ALL {
            assert_eq!(policy.delta(Alignment::Ambiguous, category), 0.2);
        }
    }

    #[test]
    fn misaligned_table() {
        let policy = ScoringPolicy {
            banned_misaligned_delta: 2.0,
        };
        assert_eq!(policy.delta(Alignment::Misaligned, Category::Banned), 2.0);
        assert_eq!(policy.delta(Alignment::Misaligned, Category::Comms), 1.0);
        assert_eq!(policy.delta(Alignment::Misaligned, Category::Media), 0.5);
        assert_eq!(
            policy.delta(Alignment::Misaligned, Category::OffTaskProductive),
            0.5
        );
        assert_eq!(policy.delta(Alignment::Misaligned, Category::Work), 1.0);
        assert_eq!(
            ScoringPolicy::default().delta(Alignment::Misaligned, Category::Banned),
            5.0
        );
    }

    #[test]
    fn score_stays_in_range_for_any_sequence() {
        let policy = ScoringPolicy::default();
        let alignments = [
            Alignment::Aligned,
            Alignment::Misaligned,
            Alignment::Ambiguous,
        ];
        let mut score = SuspicionScore::default();
        // Deterministic walk over every (alignment, category) pair in varied order.
        for step in 0..500usize {
            let alignment = alignments[(step * 7 + step / 3) % alignments.len()];
            let category = Category::ALL[(step * 5 + 1) % Category::ALL.len()];
            score = score.apply(policy.delta(alignment, category));
            assert!((0.0..=10.0).contains(&score.value()), "step {step}: {score}");
            // Clamping is idempotent.
            assert_eq!(SuspicionScore::new(score.value()), score);
        }
    }

    #[test]
    fn score_clamps_at_both_ends() {
        assert_eq!(SuspicionScore::new(12.0).value(), 10.0);
        assert_eq!(SuspicionScore::new(-1.0).value(), 0.0);
        assert_eq!(SuspicionScore::new(f64::NAN).value(), 0.0);
        assert_eq!(SuspicionScore::new(9.0).apply(5.0).value(), 10.0);
        assert_eq!(SuspicionScore::new(1.0).apply(-2.0).value(), 0.0);
    }

    #[test]
    fn protected_windows() {
        let list = DEFAULT_PROTECTED_WINDOWS;
        assert!(is_protected("Visual Studio Code — main.py", list));
        assert!(is_protected("OBSIDIAN vault", list));
        assert!(!is_protected("Reddit - funny", list));
        assert!(!is_protected("Netflix", list));
    }

    #[test]
    fn category_parse_accepts_legacy_names() {
        assert_eq!(Category::parse("bannie"), Some(Category::Banned));
        assert_eq!(Category::parse(" SANTE "), Some(Category::Work));
        assert_eq!(
            Category::parse("PROCRASTINATION_PRODUCTIVE"),
            Some(Category::OffTaskProductive)
        );
        assert_eq!(Category::parse("comms"), Some(Category::Comms));
        assert_eq!(Category::parse("SLEEP"), None);
    }

    #[test]
    fn category_serde_uses_screaming_names() {
        let json = serde_json::to_string(&Category::OffTaskProductive).unwrap();
        assert_eq!(json, "\"OFF_TASK_PRODUCTIVE\"");
        let parsed: Category = serde_json::from_str("\"FLUX\"").unwrap();
        assert_eq!(parsed, Category::Media);
    }
}
