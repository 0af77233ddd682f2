//! Link to the remote perception/speech service.

pub mod messages;
pub mod transport;
pub mod websocket;

pub use messages::{
    ClientEvent, ServiceEvent, ToolCall, ToolInvocation, ToolResponse, TranscriptSource,
};
pub use transport::{LinkMode, LiveConnection, PerceptionService, SessionSetup};
pub use websocket::WebSocketService;
