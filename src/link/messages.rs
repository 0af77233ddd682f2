//! Events exchanged with the remote perception/speech service.
//!
//! Tool invocations are decoded exactly once, here, into [`ToolInvocation`];
//! nothing downstream branches on tool name strings.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::scoring::{Alignment, Category};

pub const CLASSIFY_SCREEN: &str = "classify_screen";
pub const SET_CURRENT_TASK: &str = "set_current_task";
pub const CLOSE_DISTRACTING_TAB: &str = "close_distracting_tab";
pub const REPORT_MOOD: &str = "report_mood";

/// Event sent to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// 16-bit mono PCM at the capture rate.
    Audio(Vec<u8>),
    /// A compressed screen sample.
    Image { mime_type: String, data: Vec<u8> },
    /// Directive or user text.
    Text(String),
    /// Answer to a tool call.
    ToolResponse(ToolResponse),
}

/// Structured answer to one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Who a transcript line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSource {
    User,
    Coach,
}

/// Event received from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    /// 16-bit mono PCM at the response rate.
    Audio(Vec<u8>),
    Transcript {
        source: TranscriptSource,
        text: String,
    },
    ToolCall(ToolCall),
    /// The current response turn is finished.
    TurnComplete,
    /// The user barged in; queued response audio is stale.
    Interrupted,
    /// New session resumption state.
    ResumptionUpdate {
        handle: Option<String>,
        resumable: bool,
    },
    /// The service will drop the connection soon.
    GoAway { time_left: Option<Duration> },
}

/// A tool call, decoded at the boundary. A call that fails to decode keeps
/// its id and name so it can be answered with an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub invocation: Result<ToolInvocation, String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: &Value) -> Self {
        let name = name.into();
        let invocation = ToolInvocation::decode(&name, args);
        Self {
            id: id.into(),
            name,
            invocation,
        }
    }
}

/// The four tool invocations the coach understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    Classify {
        category: Category,
        alignment: Alignment,
        reason: String,
    },
    SetTask {
        task: String,
    },
    RequestClose {
        reason: String,
        target_window: Option<String>,
    },
    ReportMood {
        mood: String,
        intensity: f64,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Float(f64),
    Text(String),
}

impl Number {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct ClassifyArgs {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    alignment: Option<Number>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct SetTaskArgs {
    #[serde(default)]
    task: Option<String>,
}

#[derive(Deserialize)]
struct CloseArgs {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    target_window: Option<String>,
}

#[derive(Deserialize)]
struct MoodArgs {
    #[serde(default)]
    mood: Option<String>,
    #[serde(default)]
    intensity: Option<Number>,
}

fn parse<T: for<'de> Deserialize<'de>>(name: &str, args: &Value) -> Result<T, String> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args.clone()
    };
    serde_json::from_value(args).map_err(|e| format!("invalid arguments for {name}: {e}"))
}

impl ToolInvocation {
    /// Decode a tool call by name. Missing optional arguments take the
    /// service's documented defaults: category WORK, alignment 1.0.
    ///
    /// # Errors
    ///
    /// Returns a message for unknown tools, unknown categories and
    /// unparseable numbers.
    pub fn decode(name: &str, args: &Value) -> Result<Self, String> {
        match name {
            CLASSIFY_SCREEN => {
                let raw: ClassifyArgs = parse(name, args)?;
                let category = match raw.category.as_deref() {
                    None => Category::Work,
                    Some(text) => {
                        Category::parse(text).ok_or_else(|| format!("unknown category {text:?}"))?
                    }
                };
                let alignment = match raw.alignment {
                    None => Alignment::Aligned,
                    Some(value) => value
                        .as_f64()
                        .map(Alignment::snap)
                        .ok_or_else(|| "alignment is not a number".to_owned())?,
                };
                Ok(Self::Classify {
                    category,
                    alignment,
                    reason: raw.reason.unwrap_or_default(),
                })
            }
            SET_CURRENT_TASK => {
                let raw: SetTaskArgs = parse(name, args)?;
                Ok(Self::SetTask {
                    task: raw
                        .task
                        .map(|t| t.trim().to_owned())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| "Unknown".to_owned()),
                })
            }
            CLOSE_DISTRACTING_TAB => {
                let raw: CloseArgs = parse(name, args)?;
                Ok(Self::RequestClose {
                    reason: raw.reason.unwrap_or_else(|| "Distraction".to_owned()),
                    target_window: raw.target_window.filter(|t| !t.trim().is_empty()),
                })
            }
            REPORT_MOOD => {
                let raw: MoodArgs = parse(name, args)?;
                let intensity = match raw.intensity {
                    None => 0.5,
                    Some(value) => value
                        .as_f64()
                        .ok_or_else(|| "intensity is not a number".to_owned())?,
                };
                Ok(Self::ReportMood {
                    mood: raw.mood.unwrap_or_else(|| "calm".to_owned()).to_lowercase(),
                    intensity: if intensity.is_finite() {
                        intensity.clamp(0.0, 1.0)
                    } else {
                        0.5
                    },
                })
            }
            other => Err(format!("unknown tool {other:?}")),
        }
    }
}
