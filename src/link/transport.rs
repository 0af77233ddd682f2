//! Connection seam to the perception service.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::messages::{ClientEvent, ServiceEvent};
use crate::error::{CoachError, Result};

/// What the session is connecting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    CasualChat,
    MonitoredWork,
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub mode: LinkMode,
    pub system_instruction: String,
    /// Function declarations offered to the service.
    pub tools: Vec<Value>,
    /// Resumption handle from a previous connection, if any.
    pub resume_handle: Option<String>,
    pub send_sample_rate: u32,
    pub receive_sample_rate: u32,
}

/// An open bidirectional session.
///
/// Dropping `outbound` ends the session from the client side; `inbound`
/// yields `Err` once on a transport failure and then closes.
#[derive(Debug)]
pub struct LiveConnection {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::Receiver<Result<ServiceEvent>>,
}

impl LiveConnection {
    /// Send one event, mapping a closed connection to a transport error.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Transport`] if the connection is gone.
    pub async fn send(sender: &mpsc::Sender<ClientEvent>, event: ClientEvent) -> Result<()> {
        sender
            .send(event)
            .await
            .map_err(|_| CoachError::Transport("connection closed".into()))
    }
}

/// Opens sessions with the remote service.
#[async_trait]
pub trait PerceptionService: Send + Sync {
    /// Open a session.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::StaleResumption`] when `setup.resume_handle` is
    /// rejected, [`CoachError::Transport`] for any other failure.
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection>;
}
