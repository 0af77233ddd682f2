//! Tama: decision and orchestration core of a desktop productivity coach.
//!
//! Low-level observations (focused window, dwell time, user speech, what a
//! remote perception service reports about the screen) become a bounded
//! suspicion score, a time-windowed escalation stage and a contextual mood.
//! The session orchestrator ties them to a live voice connection:
//! Microphone → VAD → service → speech gate → Speaker, with periodic screen
//! samples and a grace-period corrective close the user can cancel by
//! speaking.
//!
//! # Architecture
//!
//! - **Scoring** ([`scoring`]): the fixed alignment/category delta table
//! - **Escalation** ([`escalation`]): threshold timers and engagement stages
//! - **Mood** ([`mood`]): bounded tolerance bias and its framing sentence
//! - **VAD** ([`vad`]): energy-based speech detection
//! - **Audio** ([`audio`]): microphone resolution, capture and playback via `cpal`
//! - **Link** ([`link`]): the perception service contract and its WebSocket client
//! - **Session** ([`session`]): the orchestrator and its per-connection tasks

pub mod audio;
pub mod config;
pub mod error;
pub mod escalation;
pub mod link;
pub mod mood;
pub mod overlay;
pub mod personality;
pub mod platform;
pub mod scoring;
pub mod session;
pub mod vad;

pub use config::CoachConfig;
pub use error::{CoachError, Result};
pub use session::{
    Collaborators, SessionCommand, SessionEvent, SessionHandle, SessionMode, SessionOrchestrator,
};
