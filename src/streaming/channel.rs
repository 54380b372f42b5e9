//! Duplex channel abstraction
//!
//! The session talks to the backend through a [`Transport`] that opens a
//! [`Channel`]. Outbound traffic goes through [`Channel::emit`]; everything
//! inbound (handshake results, server events, acknowledgements) arrives as
//! [`ChannelEvent`]s on the receiver returned with the channel. Dropping that
//! receiver unsubscribes from every event.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::mpsc;

/// Receiver half of a channel's inbound event stream
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Negotiated transport of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Polling,
    WebSocket,
    /// A name the client does not know
    Unrecognized(String),
}

impl TransportKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "polling" => TransportKind::Polling,
            "websocket" => TransportKind::WebSocket,
            other => TransportKind::Unrecognized(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::WebSocket => "websocket",
            TransportKind::Unrecognized(name) => name,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by a transport or channel
#[derive(Debug, Clone)]
pub enum ChannelError {
    /// Could not build the channel at all
    InitFailed(String),
    /// Handshake or namespace join failed
    ConnectFailed(String),
    /// The server rejected the namespace join
    Rejected(String),
    /// Malformed packet on the wire
    ProtocolError(String),
    /// Failed to hand a packet to the transport
    SendFailed(String),
    /// The channel is already closed
    Closed,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::InitFailed(e) => write!(f, "Failed to initialize channel: {}", e),
            ChannelError::ConnectFailed(e) => write!(f, "Connection failed: {}", e),
            ChannelError::Rejected(e) => write!(f, "Connection rejected: {}", e),
            ChannelError::ProtocolError(e) => write!(f, "Protocol error: {}", e),
            ChannelError::SendFailed(e) => write!(f, "Failed to send: {}", e),
            ChannelError::Closed => write!(f, "Channel is closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Everything needed to open a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    /// Base URL (scheme, host, port)
    pub base_url: String,
    /// Namespace joined after the handshake, e.g. `/events`
    pub namespace: String,
    /// HTTP path of the endpoint
    pub path: String,
    /// Query parameters, including the credential
    pub query: BTreeMap<String, String>,
    /// Extra headers, including `Authorization`
    pub headers: BTreeMap<String, String>,
    /// Raw bearer token, sent as the namespace auth payload
    pub bearer: String,
    /// Transports to try, in order
    pub transports: Vec<TransportKind>,
}

/// One outbound event
#[derive(Debug, Clone, PartialEq)]
pub struct Emit {
    pub event: String,
    pub payload: Vec<u8>,
    /// Acknowledgement id; the reply arrives as [`ChannelEvent::Ack`]
    pub ack: Option<u64>,
}

impl Emit {
    /// Fire-and-forget binary event
    pub fn binary(event: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            event: event.into(),
            payload,
            ack: None,
        }
    }

    /// Binary event expecting one acknowledgement
    pub fn with_ack(event: impl Into<String>, payload: Vec<u8>, ack: u64) -> Self {
        Self {
            event: event.into(),
            payload,
            ack: Some(ack),
        }
    }
}

/// Inbound channel traffic
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Namespace joined; carries the negotiated transport name
    Connect { transport: String },
    Disconnect { reason: String },
    /// Low-level error on an established channel
    Error(ChannelError),
    /// Handshake or join failure
    ConnectError(ChannelError),
    Transcript(Value),
    Events(Value),
    Ack { id: u64, payload: Value },
}

/// A live channel handle
pub trait Channel: Send {
    fn emit(&mut self, emit: Emit) -> Result<(), ChannelError>;

    /// Ask the remote side to close. Idempotent.
    fn disconnect(&mut self);
}

/// A freshly opened channel and its inbound event stream
pub struct OpenedChannel {
    pub channel: Box<dyn Channel>,
    pub events: EventReceiver,
}

/// Factory for channels
pub trait Transport: Send {
    /// Build a channel. The handshake proceeds in the background and reports
    /// through the returned event stream.
    fn open(&mut self, request: ConnectRequest) -> Result<OpenedChannel, ChannelError>;
}
