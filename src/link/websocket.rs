//! JSON-over-WebSocket perception service client.
//!
//! Every frame is a JSON text message tagged by `type`. Binary payloads
//! (audio, images) are base64 encoded. The first client frame is `setup`;
//! the server answers `setup_complete` or `error`, where the error code
//! `stale_handle` means the resumption handle was rejected.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{ClientEvent, ServiceEvent, ToolCall, TranscriptSource};
use super::transport::{LinkMode, LiveConnection, PerceptionService, SessionSetup};
use crate::error::{CoachError, Result};

/// Time allowed for the handshake.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);
/// Ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Outbound queue depth. Audio is already bounded upstream.
const OUTBOUND_CAPACITY: usize = 64;
/// Error code for a rejected resumption handle.
const STALE_HANDLE: &str = "stale_handle";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Setup {
        mode: String,
        system_instruction: String,
        tools: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_handle: Option<String>,
        send_sample_rate: u32,
        receive_sample_rate: u32,
    },
    Audio {
        data: String,
    },
    Image {
        mime_type: String,
        data: String,
    },
    Text {
        text: String,
    },
    ToolResponse {
        id: String,
        name: String,
        response: Value,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    SetupComplete,
    Error {
        code: String,
        #[serde(default)]
        message: String,
    },
    Audio {
        data: String,
    },
    Transcript {
        source: String,
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        args: Value,
    },
    TurnComplete,
    Interrupted,
    ResumptionUpdate {
        #[serde(default)]
        handle: Option<String>,
        #[serde(default)]
        resumable: bool,
    },
    GoAway {
        #[serde(default)]
        time_left_ms: Option<u64>,
    },
}

impl From<ClientEvent> for ClientFrame {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::Audio(pcm) => Self::Audio {
                data: BASE64.encode(pcm),
            },
            ClientEvent::Image { mime_type, data } => Self::Image {
                mime_type,
                data: BASE64.encode(data),
            },
            ClientEvent::Text(text) => Self::Text { text },
            ClientEvent::ToolResponse(r) => Self::ToolResponse {
                id: r.id,
                name: r.name,
                response: r.response,
            },
        }
    }
}

fn setup_frame(setup: &SessionSetup) -> ClientFrame {
    ClientFrame::Setup {
        mode: match setup.mode {
            LinkMode::CasualChat => "casual_chat".into(),
            LinkMode::MonitoredWork => "monitored_work".into(),
        },
        system_instruction: setup.system_instruction.clone(),
        tools: setup.tools.clone(),
        resume_handle: setup.resume_handle.clone(),
        send_sample_rate: setup.send_sample_rate,
        receive_sample_rate: setup.receive_sample_rate,
    }
}

fn server_error(code: &str, message: &str) -> CoachError {
    if code == STALE_HANDLE {
        CoachError::StaleResumption
    } else {
        CoachError::Transport(format!("{code}: {message}"))
    }
}

/// Decode one server frame. `Ok(None)` for frames with no session meaning.
fn decode_frame(text: &str) -> Result<Option<ServiceEvent>> {
    let frame: ServerFrame =
        serde_json::from_str(text).map_err(|e| CoachError::Protocol(e.to_string()))?;
    let event = match frame {
        ServerFrame::SetupComplete => return Ok(None),
        ServerFrame::Error { code, message } => return Err(server_error(&code, &message)),
        ServerFrame::Audio { data } => ServiceEvent::Audio(
            BASE64
                .decode(data)
                .map_err(|e| CoachError::Protocol(format!("bad audio payload: {e}")))?,
        ),
        ServerFrame::Transcript { source, text } => ServiceEvent::Transcript {
            source: if source == "user" {
                TranscriptSource::User
            } else {
                TranscriptSource::Coach
            },
            text,
        },
        ServerFrame::ToolCall { id, name, args } => {
            ServiceEvent::ToolCall(ToolCall::new(id, name, &args))
        }
        ServerFrame::TurnComplete => ServiceEvent::TurnComplete,
        ServerFrame::Interrupted => ServiceEvent::Interrupted,
        ServerFrame::ResumptionUpdate { handle, resumable } => {
            ServiceEvent::ResumptionUpdate { handle, resumable }
        }
        ServerFrame::GoAway { time_left_ms } => ServiceEvent::GoAway {
            time_left: time_left_ms.map(Duration::from_millis),
        },
    };
    Ok(Some(event))
}

/// WebSocket client for the perception service.
#[derive(Debug, Clone)]
pub struct WebSocketService {
    url: String,
}

impl WebSocketService {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PerceptionService for WebSocketService {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| CoachError::Config(format!("invalid service url {}: {e}", self.url)))?;

        let (ws_stream, _) = connect_async(parsed.as_str())
            .await
            .map_err(|e| CoachError::Transport(format!("connect: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let json = serde_json::to_string(&setup_frame(setup))
            .map_err(|e| CoachError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| CoachError::Transport(format!("send setup: {e}")))?;

        // Wait for the handshake answer.
        let handshake = async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(None) => return Ok(()),
                        Ok(Some(event)) => debug!(?event, "frame before setup_complete ignored"),
                        Err(e) => return Err(e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(CoachError::Transport("closed during setup".into()));
                    }
                    Some(Err(e)) => return Err(CoachError::Transport(format!("read: {e}"))),
                    Some(Ok(_)) => {}
                }
            }
        };
        tokio::time::timeout(SETUP_TIMEOUT, handshake)
            .await
            .map_err(|_| CoachError::Transport("setup timed out".into()))??;

        info!(url = %self.url, resumed = setup.resume_handle.is_some(), "perception link established");

        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Result<ServiceEvent>>(OUTBOUND_CAPACITY);
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            let mut ping_interval = tokio::time::interval(PING_INTERVAL);
            // Skip the first immediate tick.
            ping_interval.tick().await;
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    event = out_rx.recv() => match event {
                        Some(event) => {
                            let frame = ClientFrame::from(event);
                            let json = match serde_json::to_string(&frame) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!("cannot encode client frame: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = write.send(Message::Text(json)).await {
                                warn!("perception link send failed: {e}");
                                break;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = ping_interval.tick() => {
                        if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                            warn!("perception link ping failed: {e}");
                            break;
                        }
                    }
                }
            }
            writer_closed.cancel();
            debug!("perception writer stopped");
        });

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = closed.cancelled() => {
                        let _ = in_tx.send(Err(CoachError::Transport("writer stopped".into()))).await;
                        break;
                    }
                    msg = read.next() => msg,
                };
                let outcome = match msg {
                    Some(Ok(Message::Text(text))) => decode_frame(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        Err(CoachError::Transport("connection closed by server".into()))
                    }
                    Some(Err(e)) => Err(CoachError::Transport(format!("read error: {e}"))),
                    Some(Ok(_)) => Ok(None),
                };
                match outcome {
                    Ok(None) => {}
                    Ok(Some(event)) => {
                        if in_tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(CoachError::Protocol(e)) => {
                        // One bad frame does not end the session.
                        warn!("undecodable frame from service: {e}");
                    }
                    Err(e) => {
                        let _ = in_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
            closed.cancel();
            debug!("perception reader stopped");
        });

        Ok(LiveConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
