//! Engine.IO v4 / Socket.IO v5 packet codec
//!
//! # Framing
//!
//! ```text
//! Engine.IO   <type>[data]               0 open, 1 close, 2 ping, 3 pong, 4 message
//! Socket.IO   <type>[<n>-][<nsp>,][<id>][json]   carried inside an Engine.IO message
//! ```
//!
//! Binary payloads are sent as attachments: the JSON carries a
//! `{"_placeholder":true,"num":i}` object and the bytes follow as separate
//! frames (WebSocket binary frames, or `b<base64>` items in a polling payload).

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::{json, Value};

use super::channel::{ChannelError, ChannelEvent, Emit};

/// Engine.IO protocol revision
pub const ENGINE_IO_VERSION: &str = "4";

/// Path of the streaming endpoint
pub const STREAMING_PATH: &str = "/api/voice-streaming/socket.io";

/// Query parameter carrying the credential
pub const API_KEY_QUERY_PARAM: &str = "x-aiola-api-key";

/// Separator between packets in a long-polling payload
pub const RECORD_SEPARATOR: char = '\x1e';

// ============================================================================
// Event names
// ============================================================================

pub const EVENT_BINARY_DATA: &str = "binary_data";
pub const EVENT_SET_KEYWORDS: &str = "set_keywords";
pub const EVENT_TRANSCRIPT: &str = "transcript";
pub const EVENT_EVENTS: &str = "events";

// ============================================================================
// Engine.IO
// ============================================================================

/// Handshake data sent by the server in the open packet
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25000
}

fn default_ping_timeout() -> u64 {
    20000
}

#[derive(Debug, Clone)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChannelError::ProtocolError("empty engine packet".to_string()))?;
        let body = chars.as_str();

        match kind {
            '0' => serde_json::from_str::<OpenInfo>(body)
                .map(EnginePacket::Open)
                .map_err(|e| ChannelError::ProtocolError(format!("bad open packet: {}", e))),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(ChannelError::ProtocolError(format!(
                "unknown engine packet type '{}'",
                other
            ))),
        }
    }

    /// Encode a client-side packet. Open packets are server-only.
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

// ============================================================================
// Socket.IO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    fn from_digit(c: char) -> Option<Self> {
        Some(match c {
            '0' => PacketType::Connect,
            '1' => PacketType::Disconnect,
            '2' => PacketType::Event,
            '3' => PacketType::Ack,
            '4' => PacketType::ConnectError,
            '5' => PacketType::BinaryEvent,
            '6' => PacketType::BinaryAck,
            _ => return None,
        })
    }

    fn digit(&self) -> char {
        match self {
            PacketType::Connect => '0',
            PacketType::Disconnect => '1',
            PacketType::Event => '2',
            PacketType::Ack => '3',
            PacketType::ConnectError => '4',
            PacketType::BinaryEvent => '5',
            PacketType::BinaryAck => '6',
        }
    }

    fn is_binary(&self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: PacketType,
    pub namespace: String,
    pub id: Option<u64>,
    pub attachments: usize,
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Namespace join carrying the credential as auth payload
    pub fn connect(namespace: &str, token: &str) -> Self {
        Self {
            kind: PacketType::Connect,
            namespace: namespace.to_string(),
            id: None,
            attachments: 0,
            data: Some(json!({ "token": token })),
        }
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self {
            kind: PacketType::Disconnect,
            namespace: namespace.to_string(),
            id: None,
            attachments: 0,
            data: None,
        }
    }

    /// Event with a single binary argument
    pub fn binary_event(namespace: &str, event: &str, ack: Option<u64>) -> Self {
        Self {
            kind: PacketType::BinaryEvent,
            namespace: namespace.to_string(),
            id: ack,
            attachments: 1,
            data: Some(json!([event, placeholder(0)])),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.kind.is_binary() {
            out.push_str(&format!("{}-", self.attachments));
        }
        if !self.namespace.is_empty() && self.namespace != "/" {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let bad = |what: &str| ChannelError::ProtocolError(format!("{}: {:?}", what, text));

        let first = text.chars().next().ok_or_else(|| bad("empty socket packet"))?;
        let kind = PacketType::from_digit(first).ok_or_else(|| bad("unknown socket packet type"))?;
        let mut rest = &text[first.len_utf8()..];

        let mut attachments = 0;
        if kind.is_binary() {
            let dash = rest.find('-').ok_or_else(|| bad("missing attachment count"))?;
            attachments = rest[..dash]
                .parse::<usize>()
                .map_err(|_| bad("bad attachment count"))?;
            rest = &rest[dash + 1..];
        }

        let mut namespace = "/".to_string();
        if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            namespace = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
        }

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let id = if digits > 0 {
            Some(rest[..digits].parse::<u64>().map_err(|_| bad("bad ack id"))?)
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest).map_err(|e| {
                ChannelError::ProtocolError(format!("bad packet json: {}", e))
            })?)
        };

        Ok(Self {
            kind,
            namespace,
            id,
            attachments,
            data,
        })
    }
}

fn placeholder(num: usize) -> Value {
    json!({ "_placeholder": true, "num": num })
}

/// Encode an outbound emit as a text packet plus its binary attachments
pub fn encode_emit(namespace: &str, emit: &Emit) -> (String, Vec<Vec<u8>>) {
    let packet = SocketPacket::binary_event(namespace, &emit.event, emit.ack);
    (
        EnginePacket::Message(packet.encode()).encode(),
        vec![emit.payload.clone()],
    )
}

/// Map a complete inbound packet to a channel event. Packets for other
/// namespaces and events the session does not subscribe to yield `None`.
pub fn to_channel_event(packet: SocketPacket, namespace: &str) -> Option<ChannelEvent> {
    if packet.namespace != namespace {
        log::debug!("Ignoring packet for namespace {}", packet.namespace);
        return None;
    }

    match packet.kind {
        PacketType::Event | PacketType::BinaryEvent => {
            let mut args = match packet.data {
                Some(Value::Array(args)) => args.into_iter(),
                _ => return None,
            };
            let name = args.next()?;
            let payload = args.next().unwrap_or(Value::Null);
            match name.as_str()? {
                EVENT_TRANSCRIPT => Some(ChannelEvent::Transcript(payload)),
                EVENT_EVENTS => Some(ChannelEvent::Events(payload)),
                other => {
                    log::debug!("Ignoring unsubscribed event '{}'", other);
                    None
                }
            }
        }
        PacketType::Ack | PacketType::BinaryAck => {
            let id = packet.id?;
            let payload = match packet.data {
                Some(Value::Array(args)) => args.into_iter().next().unwrap_or(Value::Null),
                Some(other) => other,
                None => Value::Null,
            };
            Some(ChannelEvent::Ack { id, payload })
        }
        PacketType::ConnectError => {
            let message = packet
                .data
                .as_ref()
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("connection refused")
                .to_string();
            Some(ChannelEvent::ConnectError(ChannelError::Rejected(message)))
        }
        PacketType::Disconnect => Some(ChannelEvent::Disconnect {
            reason: "io server disconnect".to_string(),
        }),
        // Connect is surfaced by the driver, which knows the transport
        PacketType::Connect => None,
    }
}

/// Collects binary attachments for an inbound binary packet
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<SocketPacket>,
    buffers: Vec<Vec<u8>>,
}

impl Reassembler {
    /// Feed a decoded packet. Returns it straight away when it has no
    /// attachments.
    pub fn packet(&mut self, packet: SocketPacket) -> Option<SocketPacket> {
        if packet.attachments == 0 {
            return Some(packet);
        }
        if self.pending.is_some() {
            log::warn!("Dropping incomplete binary packet");
        }
        self.buffers.clear();
        self.pending = Some(packet);
        None
    }

    /// Feed one attachment. Returns the completed packet, with placeholders
    /// replaced by base64 strings, once all attachments arrived.
    pub fn attachment(&mut self, bytes: Vec<u8>) -> Option<SocketPacket> {
        let expected = self.pending.as_ref()?.attachments;
        self.buffers.push(bytes);
        if self.buffers.len() < expected {
            return None;
        }

        let mut packet = self.pending.take()?;
        let buffers = std::mem::take(&mut self.buffers);
        if let Some(data) = packet.data.as_mut() {
            fill_placeholders(data, &buffers);
        }
        packet.attachments = 0;
        Some(packet)
    }
}

fn fill_placeholders(value: &mut Value, buffers: &[Vec<u8>]) {
    match value {
        Value::Object(map) if map.get("_placeholder") == Some(&Value::Bool(true)) => {
            let num = map.get("num").and_then(Value::as_u64).unwrap_or(0) as usize;
            if let Some(bytes) = buffers.get(num) {
                *value = Value::String(STANDARD.encode(bytes));
            }
        }
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| fill_placeholders(v, buffers)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| fill_placeholders(v, buffers)),
        _ => {}
    }
}

// ============================================================================
// Long-polling payloads
// ============================================================================

/// One item of a long-polling payload
#[derive(Debug, Clone, PartialEq)]
pub enum PollItem {
    Text(String),
    Binary(Vec<u8>),
}

pub fn decode_payload(body: &str) -> Result<Vec<PollItem>, ChannelError> {
    body.split(RECORD_SEPARATOR)
        .filter(|item| !item.is_empty())
        .map(|item| match item.strip_prefix('b') {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(PollItem::Binary)
                .map_err(|e| ChannelError::ProtocolError(format!("bad base64 item: {}", e))),
            None => Ok(PollItem::Text(item.to_string())),
        })
        .collect()
}

pub fn encode_payload(items: &[PollItem]) -> String {
    items
        .iter()
        .map(|item| match item {
            PollItem::Text(text) => text.clone(),
            PollItem::Binary(bytes) => format!("b{}", STANDARD.encode(bytes)),
        })
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}
