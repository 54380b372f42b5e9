//! HTTP long-polling driver

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::sync::mpsc;

use super::websocket::{self, Probe, WsStream};
use super::{engine_url, Command, Held, Link, Step};
use crate::streaming::channel::{ChannelError, ChannelEvent, ConnectRequest, TransportKind};
use crate::streaming::protocol::{
    decode_payload, encode_payload, EnginePacket, OpenInfo, PollItem,
};

/// Upper bound for one long-poll request; the server answers well before this
/// with a ping or data.
const POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Drive one long-polling link until it closes or upgrades.
///
/// When the request also offers WebSocket and the server lists it as an
/// upgrade, a probe runs alongside the polling loop. Once it succeeds the
/// in-flight poll is drained, queued output is flushed, and the link moves
/// to the WebSocket driver.
pub(super) async fn run(
    http: Client,
    request: ConnectRequest,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut link = Link::new(&request, TransportKind::Polling, events);

    let (mut url, headers) = match engine_url(&request, &TransportKind::Polling)
        .and_then(|url| Ok((url, build_headers(&request)?)))
    {
        Ok(parts) => parts,
        Err(e) => {
            link.fail(e);
            return;
        }
    };

    // Handshake: the first GET answers with the open packet
    let body = match fetch(&http, url.clone(), headers.clone()).await {
        Ok(body) => body,
        Err(e) => {
            log::warn!("Polling handshake failed: {}", e);
            link.fail(e);
            return;
        }
    };

    let items = match decode_payload(&body) {
        Ok(items) => items,
        Err(e) => {
            link.fail(e);
            return;
        }
    };

    let Some(open) = open_info(&items) else {
        link.fail(ChannelError::ConnectFailed(
            "handshake did not contain an open packet".to_string(),
        ));
        return;
    };
    url.query_pairs_mut().append_pair("sid", &open.sid);
    log::debug!("Polling session {} established", open.sid);

    let mut outbox: Vec<PollItem> = Vec::new();
    if handle_items(&mut link, items, &mut outbox) {
        return;
    }

    let mut probe = if can_upgrade(&request.transports, &open.upgrades) {
        log::debug!("Probing websocket upgrade for {}", open.sid);
        Some(websocket::probe(request.clone(), open.sid.clone()))
    } else {
        None
    };

    // Emits issued before the namespace join are held back
    let mut held: Vec<Held> = Vec::new();
    let mut poll = Box::pin(fetch(&http, url.clone(), headers.clone()));

    loop {
        if !outbox.is_empty() {
            let items = std::mem::take(&mut outbox);
            if let Err(e) = post(&http, &url, &headers, &items).await {
                link.fail(e);
                link.closed("transport error");
                break;
            }
        }

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { text, attachments }) => {
                    if link.joined {
                        push_emit(&mut outbox, text, attachments);
                    } else {
                        held.push((text, attachments));
                    }
                }
                Some(Command::Close) | None => {
                    let mut items = Vec::new();
                    if link.joined {
                        items.push(PollItem::Text(link.leave_packet()));
                    }
                    items.push(PollItem::Text(EnginePacket::Close.encode()));
                    let _ = post(&http, &url, &headers, &items).await;
                    link.closed("io client disconnect");
                    break;
                }
            },
            body = &mut poll => {
                if absorb(&mut link, body, &mut outbox, &mut held) {
                    break;
                }
                poll = Box::pin(fetch(&http, url.clone(), headers.clone()));
            }
            probed = next_probe(&mut probe) => {
                probe = None;
                let ws = match probed {
                    Ok(ws) => ws,
                    Err(e) => {
                        log::warn!("Websocket upgrade failed, staying on polling: {}", e);
                        continue;
                    }
                };

                // The server answers the in-flight poll with a noop once probed
                let body = (&mut poll).await;
                if absorb(&mut link, body, &mut outbox, &mut held) {
                    break;
                }
                if !outbox.is_empty() {
                    let items = std::mem::take(&mut outbox);
                    if let Err(e) = post(&http, &url, &headers, &items).await {
                        link.fail(e);
                        link.closed("transport error");
                        break;
                    }
                }

                websocket::upgrade(ws, link, commands, held).await;
                return;
            }
        }
    }

    log::debug!("Polling driver exiting");
}

/// Whether to probe for a WebSocket upgrade
fn can_upgrade(candidates: &[TransportKind], offered: &[String]) -> bool {
    candidates.contains(&TransportKind::WebSocket)
        && offered.iter().any(|name| name == TransportKind::WebSocket.name())
}

fn open_info(items: &[PollItem]) -> Option<OpenInfo> {
    items.iter().find_map(|item| match item {
        PollItem::Text(text) => match EnginePacket::decode(text) {
            Ok(EnginePacket::Open(info)) => Some(info),
            _ => None,
        },
        PollItem::Binary(_) => None,
    })
}

/// Wait for the upgrade probe; never resolves when none is running
async fn next_probe(probe: &mut Option<Probe>) -> Result<WsStream, ChannelError> {
    match probe {
        Some(probe) => probe.await,
        None => std::future::pending().await,
    }
}

/// Handle one poll response. Returns `true` once the link closed.
fn absorb(
    link: &mut Link,
    body: Result<String, ChannelError>,
    outbox: &mut Vec<PollItem>,
    held: &mut Vec<Held>,
) -> bool {
    let items = match body.and_then(|body| decode_payload(&body)) {
        Ok(items) => items,
        Err(e) => {
            log::warn!("Polling request failed: {}", e);
            link.fail(e);
            link.closed("transport error");
            return true;
        }
    };

    let was_joined = link.joined;
    if handle_items(link, items, outbox) {
        return true;
    }
    if !was_joined && link.joined {
        for (text, attachments) in held.drain(..) {
            push_emit(outbox, text, attachments);
        }
    }
    false
}

fn push_emit(outbox: &mut Vec<PollItem>, text: String, attachments: Vec<Vec<u8>>) {
    outbox.push(PollItem::Text(text));
    outbox.extend(attachments.into_iter().map(PollItem::Binary));
}

/// Feed a decoded payload to the link. Returns `true` once the link closed.
fn handle_items(link: &mut Link, items: Vec<PollItem>, outbox: &mut Vec<PollItem>) -> bool {
    for item in items {
        let step = match item {
            PollItem::Text(text) => link.on_text(&text),
            PollItem::Binary(bytes) => link.on_binary(bytes),
        };
        match step {
            Step::Continue => {}
            Step::Reply(replies) => outbox.extend(replies.into_iter().map(PollItem::Text)),
            Step::Closed => return true,
        }
    }
    false
}

fn build_headers(request: &ConnectRequest) -> Result<HeaderMap, ChannelError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ChannelError::InitFailed(e.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| ChannelError::InitFailed(e.to_string()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

async fn fetch(http: &Client, url: Url, headers: HeaderMap) -> Result<String, ChannelError> {
    let response = http
        .get(url)
        .headers(headers)
        .timeout(POLL_TIMEOUT)
        .send()
        .await
        .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ChannelError::ConnectFailed(format!(
            "HTTP {}: {}",
            status.as_u16(),
            message
        )));
    }

    response
        .text()
        .await
        .map_err(|e| ChannelError::ProtocolError(e.to_string()))
}

async fn post(
    http: &Client,
    url: &Url,
    headers: &HeaderMap,
    items: &[PollItem],
) -> Result<(), ChannelError> {
    let response = http
        .post(url.clone())
        .headers(headers.clone())
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(encode_payload(items))
        .send()
        .await
        .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ChannelError::SendFailed(format!(
            "HTTP {}",
            response.status().as_u16()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_needs_both_sides() {
        let both = [TransportKind::Polling, TransportKind::WebSocket];
        let offered = vec!["websocket".to_string()];

        assert!(can_upgrade(&both, &offered));
        assert!(!can_upgrade(&both, &[]));
        assert!(!can_upgrade(&[TransportKind::Polling], &offered));
    }

    #[test]
    fn test_open_info_from_handshake_payload() {
        let items = decode_payload(
            r#"0{"sid":"s9","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000}"#,
        )
        .unwrap();

        let info = open_info(&items).unwrap();
        assert_eq!(info.sid, "s9");
        assert_eq!(info.upgrades, vec!["websocket".to_string()]);
        assert!(open_info(&[PollItem::Text("6".to_string())]).is_none());
    }

    #[test]
    fn test_held_emits_flush_on_join() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = ConnectRequest {
            base_url: "https://api.test.com".to_string(),
            namespace: "/events".to_string(),
            path: "/socket.io".to_string(),
            query: Default::default(),
            headers: Default::default(),
            bearer: "tok".to_string(),
            transports: vec![TransportKind::Polling],
        };
        let mut link = Link::new(&request, TransportKind::Polling, tx);
        let mut outbox = Vec::new();
        let mut held = vec![(
            r#"451-/events,["binary_data",{"_placeholder":true,"num":0}]"#.to_string(),
            vec![vec![1, 2]],
        )];

        let closed = absorb(
            &mut link,
            Ok(r#"40/events,{"sid":"x"}"#.to_string()),
            &mut outbox,
            &mut held,
        );

        assert!(!closed);
        assert!(held.is_empty());
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[1], PollItem::Binary(vec![1, 2]));
        match rx.try_recv().unwrap() {
            ChannelEvent::Connect { transport } => assert_eq!(transport, "polling"),
            other => panic!("Expected Connect, got {:?}", other),
        }
    }
}
