//! Directive text sent with each perception tick, and the adaptive cadence.

use std::time::Duration;

use crate::config::{Language, PollingConfig};
use crate::escalation::{Engagement, EngagementStage, FreeSpeechReason};
use crate::scoring::{Alignment, SuspicionScore};

/// Snapshot summarised into one directive.
#[derive(Debug, Clone)]
pub struct DirectiveContext<'a> {
    pub active_window: Option<&'a str>,
    pub open_windows: &'a [String],
    pub dwell: Duration,
    pub score: SuspicionScore,
    pub alignment: Alignment,
    pub task: Option<&'a str>,
    /// Mood framing sentence.
    pub mood: &'a str,
    pub engagement: Engagement,
    /// First directive of the session: ask for a greeting.
    pub greet: bool,
    pub session_minutes: u64,
}

const MUZZLED: &str = "YOU ARE MUZZLED. DO NOT SPEAK. ONLY call classify_screen.";

/// What the coach is allowed (or told) to say this tick.
pub fn speak_line(engagement: Engagement, greet: bool, session_minutes: u64) -> String {
    if greet {
        return "UNMUZZLED: you just arrived next to the user. Greet them warmly and ask what they plan \
                to work on today. Be encouraging and speak directly."
            .to_owned();
    }
    let line = match engagement {
        Engagement::Free(FreeSpeechReason::ForceSpeak) => {
            "UNMUZZLED: you MUST speak now to address the user!"
        }
        Engagement::Free(FreeSpeechReason::BreakReminder) => {
            return format!(
                "UNMUZZLED: the user has been working for {session_minutes} min. \
                 Gently suggest a break of a few minutes."
            );
        }
        Engagement::Free(FreeSpeechReason::UserSpeaking) => {
            "UNMUZZLED: the user is TALKING to you right now. Answer naturally in one or two sentences. \
             You may still call classify_screen."
        }
        Engagement::Free(FreeSpeechReason::Greeting | FreeSpeechReason::CasualChat) => {
            "UNMUZZLED: keep anything you say short and friendly."
        }
        Engagement::Stage(EngagementStage::Muzzled) => MUZZLED,
        Engagement::Stage(EngagementStage::Curious) => {
            "UNMUZZLED: ask ONE short, curious question about what is on screen."
        }
        Engagement::Stage(EngagementStage::Suspicious) => {
            "UNMUZZLED: make ONE short remark showing you noticed what the user is doing."
        }
        Engagement::Stage(EngagementStage::Warning) => {
            "WARNING: YOU ARE NOW UNMUZZLED. GIVE THE USER A SHORT, DIRECT VERBAL WARNING."
        }
        Engagement::Stage(EngagementStage::Ultimatum) => {
            "UNMUZZLED: FINAL WARNING. Tell the user this is the last chance before you act."
        }
        Engagement::Stage(EngagementStage::Strike) => {
            "CRITICAL UNMUZZLED: SUSPICION IS MAXIMAL. DO TWO THINGS: 1) SCOLD THE USER, \
             2) CALL close_distracting_tab with target_window set to the distracting title from open_windows."
        }
    };
    line.to_owned()
}

/// Build the `[SYSTEM]` directive for one tick.
pub fn build_directive(ctx: &DirectiveContext<'_>) -> String {
    let task = match ctx.task {
        Some(task) => format!("scheduled_task: {task}"),
        None => "scheduled_task: NOT SET (ask the user!)".to_owned(),
    };
    format!(
        "[SYSTEM] active_window: {} | open_windows: {:?} | duration: {}s | S: {} | A: {} | {} | mood: {} \
         Call classify_screen. {}",
        ctx.active_window.unwrap_or("unknown"),
        ctx.open_windows,
        ctx.dwell.as_secs(),
        ctx.score,
        ctx.alignment,
        task,
        ctx.mood,
        speak_line(ctx.engagement, ctx.greet, ctx.session_minutes),
    )
}

/// Opening line for casual chat.
pub fn chat_greeting(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Greet the user! They pressed 'Talk' to chat with you. Be natural and short."
        }
        Language::Fr => {
            "Salue l'utilisateur ! Il a appuyé sur 'Parler' pour discuter avec toi. Sois naturelle et courte."
        }
    }
}

/// Notice sent when the user's voice cancelled a locally chosen close.
pub fn close_cancelled_notice(target: &str) -> String {
    format!(
        "[SYSTEM] The user spoke up and the close of '{target}' was cancelled. \
         Listen to them and re-evaluate before acting again."
    )
}

/// Time until the next perception tick. Higher scores poll faster, never
/// below the floor.
pub fn poll_interval(score: SuspicionScore, config: &PollingConfig) -> Duration {
    let floor = config.floor_ms;
    let ms = config
        .tiers
        .iter()
        .find(|tier| score.value() <= tier.max_score)
        .map_or(floor, |tier| tier.interval_ms);
    Duration::from_millis(ms.max(floor))
}
