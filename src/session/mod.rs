//! Session orchestration: the state record, per-tick helpers and the
//! coordinator that ties them to the perception link and the desktop.

pub mod backoff;
pub mod breaks;
pub mod directive;
pub mod events;
pub mod gate;
pub mod grace;
pub mod orchestrator;
mod shared;
pub mod state;

pub use backoff::ReconnectPolicy;
pub use breaks::{BreakEvent, BreakSchedule};
pub use events::{
    CloseCancelReason, LinkStatus, SessionCommand, SessionEvent, SessionSnapshot,
};
pub use gate::SpeechGate;
pub use grace::{CloseOrigin, GraceOutcome, PendingClose, wait_for_grace};
pub use orchestrator::{SessionHandle, SessionOrchestrator};
pub use shared::Collaborators;
pub use state::{SessionMode, SessionState};
