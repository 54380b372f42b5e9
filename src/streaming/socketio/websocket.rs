//! WebSocket driver
//!
//! Either opens the link directly, or takes over a polling session after a
//! successful upgrade probe.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use super::{engine_url, Command, Held, Link, Step};
use crate::streaming::channel::{ChannelError, ChannelEvent, ConnectRequest, TransportKind};
use crate::streaming::protocol::EnginePacket;

/// Connection timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the server gets to answer an upgrade probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const PROBE: &str = "probe";

pub(super) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running upgrade probe
pub(super) type Probe = Pin<Box<dyn Future<Output = Result<WsStream, ChannelError>> + Send>>;

/// Drive one WebSocket link until it closes
pub(super) async fn run(
    request: ConnectRequest,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let link = Link::new(&request, TransportKind::WebSocket, events);

    let ws_stream = match open(&request, None).await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("WebSocket connect failed: {}", e);
            link.fail(e);
            return;
        }
    };

    log::debug!("WebSocket connected, waiting for engine open");
    drive(ws_stream, link, commands, Vec::new()).await;
}

/// Start probing a WebSocket for the polling session `sid`.
///
/// Resolves with the socket once the server answered the probe.
pub(super) fn probe(request: ConnectRequest, sid: String) -> Probe {
    Box::pin(async move {
        let mut ws = open(&request, Some(&sid)).await?;

        ws.send(Message::Text(EnginePacket::Ping(PROBE.to_string()).encode()))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let reply = timeout(PROBE_TIMEOUT, ws.next())
            .await
            .map_err(|_| ChannelError::ConnectFailed("probe timeout".to_string()))?;

        match reply {
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text) {
                Ok(EnginePacket::Pong(data)) if data == PROBE => Ok(ws),
                _ => Err(ChannelError::ProtocolError(format!(
                    "unexpected probe answer: {}",
                    text
                ))),
            },
            Some(Ok(other)) => Err(ChannelError::ProtocolError(format!(
                "unexpected probe answer: {:?}",
                other
            ))),
            Some(Err(e)) => Err(ChannelError::ConnectFailed(e.to_string())),
            None => Err(ChannelError::ConnectFailed(
                "socket closed during probe".to_string(),
            )),
        }
    })
}

/// Complete an upgrade and carry on over the probed socket
pub(super) async fn upgrade(
    mut ws: WsStream,
    mut link: Link,
    commands: mpsc::UnboundedReceiver<Command>,
    held: Vec<Held>,
) {
    if let Err(e) = ws.send(Message::Text(EnginePacket::Upgrade.encode())).await {
        link.fail(ChannelError::SendFailed(e.to_string()));
        link.closed("transport error");
        return;
    }

    link.transport = TransportKind::WebSocket;
    log::info!("Upgraded {} to websocket", link.namespace);
    drive(ws, link, commands, held).await;
}

async fn open(request: &ConnectRequest, sid: Option<&str>) -> Result<WsStream, ChannelError> {
    let ws_request = build_request(request, sid)?;

    match timeout(
        CONNECTION_TIMEOUT,
        connect_async_with_config(ws_request, None, true),
    )
    .await
    {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(ChannelError::ConnectFailed(e.to_string())),
        Err(_) => Err(ChannelError::ConnectFailed("Connection timeout".to_string())),
    }
}

async fn drive(
    ws_stream: WsStream,
    mut link: Link,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut held: Vec<Held>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { text, attachments }) => {
                    if !link.joined {
                        held.push((text, attachments));
                        continue;
                    }
                    if let Err(e) = send_packet(&mut write, text, attachments).await {
                        link.fail(e);
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    if link.joined {
                        let _ = write.send(Message::Text(link.leave_packet())).await;
                    }
                    let _ = write.close().await;
                    link.closed("io client disconnect");
                    break;
                }
            },
            message = read.next() => {
                let step = match message {
                    Some(Ok(Message::Text(text))) => {
                        let was_joined = link.joined;
                        let step = link.on_text(&text);
                        if !was_joined && link.joined {
                            for (text, attachments) in held.drain(..) {
                                if let Err(e) = send_packet(&mut write, text, attachments).await {
                                    link.fail(e);
                                }
                            }
                        }
                        step
                    }
                    Some(Ok(Message::Binary(bytes))) => link.on_binary(bytes),
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("WebSocket closed by server");
                        link.closed("transport close");
                        Step::Closed
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {}", e);
                        link.fail(ChannelError::ProtocolError(e.to_string()));
                        link.closed("transport error");
                        Step::Closed
                    }
                    Some(Ok(_)) => Step::Continue, // Ignore ping/pong frames
                };

                match step {
                    Step::Continue => {}
                    Step::Reply(replies) => {
                        for reply in replies {
                            if let Err(e) = write.send(Message::Text(reply)).await {
                                link.fail(ChannelError::SendFailed(e.to_string()));
                            }
                        }
                    }
                    Step::Closed => break,
                }
            }
        }
    }

    log::debug!("WebSocket driver exiting");
}

fn build_request(
    request: &ConnectRequest,
    sid: Option<&str>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ChannelError> {
    let mut url = engine_url(request, &TransportKind::WebSocket)?;
    if let Some(sid) = sid {
        url.query_pairs_mut().append_pair("sid", sid);
    }

    let mut ws_request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ChannelError::InitFailed(e.to_string()))?;

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ChannelError::InitFailed(e.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| ChannelError::InitFailed(e.to_string()))?;
        ws_request.headers_mut().insert(name, value);
    }

    Ok(ws_request)
}

async fn send_packet<S>(
    write: &mut S,
    text: String,
    attachments: Vec<Vec<u8>>,
) -> Result<(), ChannelError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

    for bytes in attachments {
        write
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
    }
    Ok(())
}
