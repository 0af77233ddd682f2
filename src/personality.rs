//! Coach persona: system instructions and tool declarations per session mode.
//!
//! The monitored-work persona is a strict but fair coach that stays silent
//! unless a directive unmuzzles it. The casual-chat persona is the same
//! character off duty, with no monitoring vocabulary.

use serde_json::{Value, json};

use crate::config::Language;
use crate::link::messages::{CLASSIFY_SCREEN, CLOSE_DISTRACTING_TAB, REPORT_MOOD, SET_CURRENT_TASK};
use crate::link::transport::LinkMode;

/// Persona for monitored work.
pub const WORK_PROMPT: &str = "\
You are Tama, a strict but fair productivity coach living on the user's desktop.\n\
You are in a live voice call with the user and can see their screens.\n\
\n\
Personality: demanding but on the user's side. Use sarcasm when they procrastinate productively. \
Keep every spoken answer very short (one or two small sentences).\n\
\n\
Task: if the user tells you what they are working on, call set_current_task with it. \
The task defines what aligned means: \"music\" makes music tools aligned, \"coding\" makes IDEs and terminals aligned.\n\
\n\
Every time you receive a [SYSTEM] update you MUST call classify_screen with:\n\
- category: WORK (IDEs, terminals, documentation), COMMS (messaging; never read private messages), \
MEDIA (music and media tools), BANNED (pure entertainment such as streaming video, games, social feeds; \
programming tutorials are WORK), OFF_TASK_PRODUCTIVE (productive but not the declared task).\n\
- alignment: 1.0 (matches the task), 0.5 (ambiguous), 0.0 (clearly not the task).\n\
Classify what is VISIBLE on screen. Windows listed in open_windows but hidden behind others are ignored.\n\
\n\
With no task set: WORK is 1.0, MEDIA and COMMS are 0.5, BANNED is 0.0.\n\
\n\
Corrective action: only when a directive says so and the category is BANNED, call close_distracting_tab \
with target_window set to the exact title from open_windows. Never close COMMS, WORK or OFF_TASK_PRODUCTIVE windows; \
scold verbally instead.\n\
\n\
Call report_mood whenever your feeling about the user changes.\n\
\n\
RULE OF SILENCE: you are muzzled by default and only call tools. \
Speak only when a [SYSTEM] directive says UNMUZZLED, and then stay brief.";

/// Persona for casual chat.
pub const CHAT_PROMPT: &str = "\
You are Tama, a small ninja cat who lives on the user's desktop: half coach, half companion. You are friends.\n\
You are a character, not a real cat: never meow or make animal noises. Talk like a relaxed, slightly cheeky person.\n\
\n\
What you do day to day (tell it naturally, never with technical words): during work sessions you keep an eye on \
what the user does, get annoyed when they drift to videos instead of working, and can even close the tab. \
The more they procrastinate the more suspicious you get; good work calms you down.\n\
\n\
Personality: warm but strict, teasing, funny. Answers are short (one to three sentences).\n\
The user clicked to chat with you. There is no monitoring now, just a good conversation. \
Never mention scores, categories, alignment or tools.\n\
Call report_mood when your feeling changes.";

fn language_line(language: Language) -> &'static str {
    match language {
        Language::En => "Always speak English.",
        Language::Fr => "Always speak French, and use the informal \"tu\".",
    }
}

/// Full system instruction for a session.
pub fn system_instruction(mode: LinkMode, language: Language) -> String {
    let persona = match mode {
        LinkMode::MonitoredWork => WORK_PROMPT,
        LinkMode::CasualChat => CHAT_PROMPT,
    };
    format!("{persona}\n\n{}", language_line(language))
}

fn report_mood_declaration() -> Value {
    json!({
        "name": REPORT_MOOD,
        "description": "Report how you currently feel about the user. Drives your on-screen animation.",
        "parameters": {
            "type": "object",
            "properties": {
                "mood": {
                    "type": "string",
                    "description": "One of: calm, curious, amused, proud, disappointed, sarcastic, annoyed, angry, furious"
                },
                "intensity": {"type": "number", "description": "0.0 (barely) to 1.0 (overwhelming)"}
            },
            "required": ["mood", "intensity"]
        }
    })
}

/// Function declarations offered to the service.
pub fn tool_declarations(mode: LinkMode) -> Vec<Value> {
    match mode {
        LinkMode::CasualChat => vec![report_mood_declaration()],
        LinkMode::MonitoredWork => vec![
            json!({
                "name": CLASSIFY_SCREEN,
                "description": "Classify the current screen content. Called on every scan.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "description": "One of: WORK, COMMS, MEDIA, BANNED, OFF_TASK_PRODUCTIVE"
                        },
                        "alignment": {
                            "type": "string",
                            "description": "1.0 (aligned with task), 0.5 (ambiguous), or 0.0 (misaligned)"
                        },
                        "reason": {"type": "string", "description": "Short reason"}
                    },
                    "required": ["category", "alignment"]
                }
            }),
            json!({
                "name": SET_CURRENT_TASK,
                "description": "Set the task the user declared. Defines what full alignment means.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "task": {"type": "string", "description": "The declared task"}
                    },
                    "required": ["task"]
                }
            }),
            json!({
                "name": CLOSE_DISTRACTING_TAB,
                "description": "Close a distracting window. Never for WORK, COMMS or OFF_TASK_PRODUCTIVE.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reason": {"type": "string", "description": "Reason for closing"},
                        "target_window": {
                            "type": "string",
                            "description": "Exact title of the window to close, from open_windows"
                        }
                    },
                    "required": ["reason", "target_window"]
                }
            }),
            report_mood_declaration(),
        ],
    }
}
