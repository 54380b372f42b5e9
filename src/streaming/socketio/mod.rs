//! Socket.IO transport
//!
//! Opens a channel to the streaming endpoint over Engine.IO v4. The handshake
//! and all socket I/O run in a background task; the returned [`Channel`]
//! handle only queues commands for it, and everything the task learns is
//! pushed onto the channel's event stream.
//!
//! # Transport Selection
//!
//! - Polling and WebSocket: open over HTTP long-polling, then probe a
//!   WebSocket and upgrade once the server answers. A failed probe leaves the
//!   link on polling.
//! - Polling only: HTTP long-polling
//! - WebSocket only: connect over WebSocket directly
//!
//! No reconnection is attempted; a dropped link surfaces as a disconnect and
//! the embedding application decides what to do next.

mod polling;
mod websocket;

use reqwest::Url;
use tokio::sync::mpsc;

use super::channel::{
    Channel, ChannelError, ChannelEvent, ConnectRequest, Emit, OpenedChannel, Transport,
    TransportKind,
};
use super::protocol::{
    encode_emit, to_channel_event, EnginePacket, Reassembler, SocketPacket, ENGINE_IO_VERSION,
};

/// Commands from the channel handle to the I/O task
#[derive(Debug)]
enum Command {
    Send {
        text: String,
        attachments: Vec<Vec<u8>>,
    },
    Close,
}

/// [`Transport`] speaking Socket.IO
#[derive(Debug)]
pub struct SocketIoTransport {
    http: reqwest::Client,
}

impl SocketIoTransport {
    pub fn new() -> Self {
        // Several crypto providers may be compiled in; pick ring explicitly.
        // Fails harmlessly if a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SocketIoTransport {
    fn open(&mut self, request: ConnectRequest) -> Result<OpenedChannel, ChannelError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::InitFailed(format!("no async runtime: {}", e)))?;

        let Some(kind) = initial_transport(&request.transports) else {
            return Err(ChannelError::InitFailed(
                "no supported transport requested".to_string(),
            ));
        };

        // Validate the URL up front so a bad base URL fails construction
        engine_url(&request, &kind)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let namespace = request.namespace.clone();

        log::info!(
            "Opening {} channel to {}{}",
            kind,
            request.base_url,
            request.namespace
        );

        match kind {
            TransportKind::WebSocket => {
                runtime.spawn(websocket::run(request, command_rx, event_tx));
            }
            _ => {
                runtime.spawn(polling::run(
                    self.http.clone(),
                    request,
                    command_rx,
                    event_tx,
                ));
            }
        }

        Ok(OpenedChannel {
            channel: Box::new(SocketIoChannel {
                namespace,
                commands: command_tx,
                closed: false,
            }),
            events: event_rx,
        })
    }
}

/// Transport a link opens on. Polling wins when offered; WebSocket is then
/// reached by upgrade.
fn initial_transport(candidates: &[TransportKind]) -> Option<TransportKind> {
    [TransportKind::Polling, TransportKind::WebSocket]
        .into_iter()
        .find(|kind| candidates.contains(kind))
}

/// Handle to a channel driven by a background I/O task
struct SocketIoChannel {
    namespace: String,
    commands: mpsc::UnboundedSender<Command>,
    closed: bool,
}

impl Channel for SocketIoChannel {
    fn emit(&mut self, emit: Emit) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let (text, attachments) = encode_emit(&self.namespace, &emit);
        self.commands
            .send(Command::Send { text, attachments })
            .map_err(|_| ChannelError::Closed)
    }

    fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.commands.send(Command::Close);
    }
}

/// Build the Engine.IO URL for the given transport
fn engine_url(request: &ConnectRequest, kind: &TransportKind) -> Result<Url, ChannelError> {
    let mut url = Url::parse(&request.base_url)
        .map_err(|e| ChannelError::InitFailed(format!("invalid base URL: {}", e)))?;

    url.set_path(&format!("{}/", request.path.trim_end_matches('/')));

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", ENGINE_IO_VERSION);
        query.append_pair("transport", kind.name());
        for (key, value) in &request.query {
            query.append_pair(key, value);
        }
    }

    if matches!(kind, TransportKind::WebSocket) {
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::InitFailed(format!("cannot use scheme {}", scheme)))?;
    }

    Ok(url)
}

/// An emit held back until the namespace join: text packet plus attachments
type Held = (String, Vec<Vec<u8>>);

/// Reaction to one inbound text packet
#[derive(Debug, PartialEq)]
enum Step {
    Continue,
    /// Text packets to send back
    Reply(Vec<String>),
    /// The link is finished
    Closed,
}

/// Protocol state shared by both drivers
struct Link {
    namespace: String,
    token: String,
    transport: TransportKind,
    events: mpsc::UnboundedSender<ChannelEvent>,
    reassembler: Reassembler,
    joined: bool,
}

impl Link {
    fn new(
        request: &ConnectRequest,
        transport: TransportKind,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            namespace: request.namespace.clone(),
            token: request.bearer.clone(),
            transport,
            events,
            reassembler: Reassembler::default(),
            joined: false,
        }
    }

    fn push(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Channel listener gone, dropping event");
        }
    }

    fn on_text(&mut self, text: &str) -> Step {
        let packet = match EnginePacket::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Ignoring malformed packet: {}", e);
                return Step::Continue;
            }
        };

        match packet {
            EnginePacket::Open(info) => {
                log::debug!(
                    "Engine open (sid {}, ping every {}ms)",
                    info.sid,
                    info.ping_interval
                );
                let join = SocketPacket::connect(&self.namespace, &self.token);
                Step::Reply(vec![EnginePacket::Message(join.encode()).encode()])
            }
            EnginePacket::Ping(data) => Step::Reply(vec![EnginePacket::Pong(data).encode()]),
            EnginePacket::Close => {
                self.closed("transport close");
                Step::Closed
            }
            EnginePacket::Message(body) => self.on_message(&body),
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => Step::Continue,
        }
    }

    fn on_message(&mut self, body: &str) -> Step {
        let packet = match SocketPacket::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Ignoring malformed socket packet: {}", e);
                return Step::Continue;
            }
        };

        if packet.kind == super::protocol::PacketType::Connect && packet.namespace == self.namespace
        {
            self.joined = true;
            log::info!("Joined {} over {}", self.namespace, self.transport);
            self.push(ChannelEvent::Connect {
                transport: self.transport.name().to_string(),
            });
            return Step::Continue;
        }

        if let Some(packet) = self.reassembler.packet(packet) {
            return self.deliver(packet);
        }
        Step::Continue
    }

    fn on_binary(&mut self, bytes: Vec<u8>) -> Step {
        match self.reassembler.attachment(bytes) {
            Some(packet) => self.deliver(packet),
            None => Step::Continue,
        }
    }

    fn deliver(&mut self, packet: SocketPacket) -> Step {
        match to_channel_event(packet, &self.namespace) {
            Some(event @ ChannelEvent::ConnectError(_)) => {
                self.push(event);
                Step::Closed
            }
            Some(event @ ChannelEvent::Disconnect { .. }) => {
                self.push(event);
                Step::Closed
            }
            Some(event) => {
                self.push(event);
                Step::Continue
            }
            None => Step::Continue,
        }
    }

    /// Report a failure: before the namespace join it is a connect error
    fn fail(&self, err: ChannelError) {
        if self.joined {
            self.push(ChannelEvent::Error(err));
        } else {
            self.push(ChannelEvent::ConnectError(err));
        }
    }

    fn closed(&self, reason: &str) {
        if self.joined {
            self.push(ChannelEvent::Disconnect {
                reason: reason.to_string(),
            });
        } else {
            self.push(ChannelEvent::ConnectError(ChannelError::ConnectFailed(
                reason.to_string(),
            )));
        }
    }

    /// Namespace leave packet
    fn leave_packet(&self) -> String {
        EnginePacket::Message(SocketPacket::disconnect(&self.namespace).encode()).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(transports: Vec<TransportKind>) -> ConnectRequest {
        let mut query = BTreeMap::new();
        query.insert("flow_id".to_string(), "f1".to_string());
        query.insert("x-aiola-api-key".to_string(), "tok".to_string());
        ConnectRequest {
            base_url: "https://api.test.com".to_string(),
            namespace: "/events".to_string(),
            path: "/api/voice-streaming/socket.io".to_string(),
            query,
            headers: BTreeMap::new(),
            bearer: "tok".to_string(),
            transports,
        }
    }

    #[test]
    fn test_engine_url_websocket() {
        let url = engine_url(&request(vec![]), &TransportKind::WebSocket).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/api/voice-streaming/socket.io/");
        let query = url.query().unwrap();
        assert!(query.contains("EIO=4"));
        assert!(query.contains("transport=websocket"));
        assert!(query.contains("flow_id=f1"));
        assert!(query.contains("x-aiola-api-key=tok"));
    }

    #[test]
    fn test_engine_url_polling_keeps_http_scheme() {
        let url = engine_url(&request(vec![]), &TransportKind::Polling).unwrap();
        assert_eq!(url.scheme(), "https");
        assert!(url.query().unwrap().contains("transport=polling"));
    }

    #[test]
    fn test_engine_url_rejects_garbage() {
        let mut req = request(vec![]);
        req.base_url = "not a url".to_string();
        assert!(engine_url(&req, &TransportKind::Polling).is_err());
    }

    #[test]
    fn test_initial_transport_prefers_polling() {
        assert_eq!(
            initial_transport(&[TransportKind::Polling, TransportKind::WebSocket]),
            Some(TransportKind::Polling)
        );
        assert_eq!(
            initial_transport(&[TransportKind::WebSocket, TransportKind::Polling]),
            Some(TransportKind::Polling)
        );
        assert_eq!(
            initial_transport(&[TransportKind::WebSocket]),
            Some(TransportKind::WebSocket)
        );
        assert_eq!(initial_transport(&[]), None);
    }

    #[test]
    fn test_open_without_runtime_fails() {
        let mut transport = SocketIoTransport::default();
        let result = transport.open(request(vec![TransportKind::WebSocket]));
        assert!(matches!(result, Err(ChannelError::InitFailed(_))));
    }

    #[test]
    fn test_link_handshake() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = request(vec![TransportKind::WebSocket]);
        let mut link = Link::new(&req, TransportKind::WebSocket, tx);

        let step = link.on_text(r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#);
        assert_eq!(
            step,
            Step::Reply(vec![r#"40/events,{"token":"tok"}"#.to_string()])
        );

        assert_eq!(link.on_text("2"), Step::Reply(vec!["3".to_string()]));

        assert_eq!(link.on_text(r#"40/events,{"sid":"x"}"#), Step::Continue);
        match rx.try_recv().unwrap() {
            ChannelEvent::Connect { transport } => assert_eq!(transport, "websocket"),
            other => panic!("Expected Connect, got {:?}", other),
        }

        assert_eq!(link.on_text(r#"42/events,["events",{"a":1}]"#), Step::Continue);
        assert!(matches!(rx.try_recv().unwrap(), ChannelEvent::Events(_)));

        assert_eq!(link.on_text("41/events,"), Step::Closed);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChannelEvent::Disconnect { .. }
        ));
    }

    #[test]
    fn test_link_failure_before_join_is_connect_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = request(vec![TransportKind::Polling]);
        let link = Link::new(&req, TransportKind::Polling, tx);

        link.fail(ChannelError::ConnectFailed("refused".to_string()));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChannelEvent::ConnectError(_)
        ));
    }

    #[test]
    fn test_link_rejected_join() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = request(vec![TransportKind::Polling]);
        let mut link = Link::new(&req, TransportKind::Polling, tx);

        assert_eq!(
            link.on_text(r#"44/events,{"message":"bad token"}"#),
            Step::Closed
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChannelEvent::ConnectError(ChannelError::Rejected(_))
        ));
    }
}
