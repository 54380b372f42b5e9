//! Channel lifecycle: connect, inbound events, teardown

use std::collections::BTreeMap;

use super::{Connection, StreamingClient};
use crate::audio::Microphone;
use crate::error::{ClientError, ErrorKind};
use crate::streaming::protocol::{API_KEY_QUERY_PARAM, STREAMING_PATH};
use crate::streaming::{ChannelEvent, ConnectRequest, OpenedChannel, Transport, TransportKind};

impl<T: Transport, M: Microphone> StreamingClient<T, M> {
    /// Open a new channel, tearing down any existing one first.
    ///
    /// The handshake completes in the background; its outcome arrives as a
    /// channel event handled by the event pump. With `auto_record`, recording
    /// starts as soon as the channel connects.
    pub fn connect(&mut self, auto_record: bool) {
        self.teardown_connection();

        let request = self.connect_request();
        log::info!(
            "Connecting to {} via {:?}",
            self.config.endpoint(),
            request
                .transports
                .iter()
                .map(TransportKind::name)
                .collect::<Vec<_>>()
        );

        match self.transport.open(request) {
            Ok(OpenedChannel { channel, events }) => {
                self.connection = Some(Connection::new(channel, events, auto_record));
            }
            Err(e) => {
                self.raise(
                    ClientError::new(ErrorKind::Network, "Failed to initialize socket connection")
                        .with_cause(e),
                );
            }
        }
    }

    /// Disconnect and tear down. No-op without a channel.
    pub fn close_socket(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            log::info!("Closing channel");
            connection.channel.disconnect();
            self.teardown_connection();
        }
    }

    fn connect_request(&self) -> ConnectRequest {
        let bearer = self.config.bearer.clone();

        let mut query = self.config.query_params.clone();
        query.insert(API_KEY_QUERY_PARAM.to_string(), bearer.clone());

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {}", bearer));

        ConnectRequest {
            base_url: self.config.base_url.trim_end_matches('/').to_string(),
            namespace: self.config.namespace.as_str().to_string(),
            path: STREAMING_PATH.to_string(),
            query,
            headers,
            bearer,
            transports: self.config.transports.candidates(),
        }
    }

    /// Release the channel handle. Idempotent.
    ///
    /// The handle is taken out first, so nothing running below observes a
    /// half-torn-down channel; dropping its event receiver removes every
    /// listener.
    pub(super) fn teardown_connection(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        drop(connection);

        if self.is_recording() {
            self.stop_recording();
        }

        log::info!("Channel torn down");
        self.callbacks.disconnect();
    }

    pub(super) async fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connect { transport } => self.on_connect(&transport).await,
            ChannelEvent::Error(e) => {
                log::error!("Socket error: {}", e);
                let keyword_watch = self
                    .connection
                    .as_mut()
                    .map_or(false, |c| std::mem::take(&mut c.keyword_error_watch));

                self.stop_recording();
                self.raise(
                    ClientError::new(ErrorKind::General, format!("Socket error: {}", e))
                        .with_cause(e.clone()),
                );
                if keyword_watch {
                    self.raise(ClientError::new(
                        ErrorKind::Keywords,
                        format!("Socket error: {}", e),
                    ));
                }
            }
            ChannelEvent::ConnectError(e) => {
                log::error!("Socket connection error: {}", e);
                self.stop_recording();
                self.close_socket();
                self.raise(
                    ClientError::new(
                        ErrorKind::Network,
                        format!("Socket connection error: {}", e),
                    )
                    .with_cause(e),
                );
            }
            ChannelEvent::Disconnect { reason } => {
                log::info!("Channel disconnected: {}", reason);
                self.teardown_connection();
            }
            ChannelEvent::Transcript(data) => self.callbacks.transcript(data),
            ChannelEvent::Events(data) => self.callbacks.events(data),
            ChannelEvent::Ack { id, payload } => self.handle_keywords_ack(id, payload),
        }
    }

    async fn on_connect(&mut self, transport: &str) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        connection.connected = true;
        let auto_record = connection.auto_record;

        match TransportKind::from_name(transport) {
            TransportKind::Unrecognized(name) => {
                log::warn!("Unexpected transport name: {}", name);
            }
            kind => {
                log::info!("Connected over {}", kind);
                self.callbacks.connect(kind);
            }
        }

        // Keywords go out before the microphone is requested; acquisition
        // may wait on a permission prompt
        if !self.keywords.is_empty() {
            let keywords = self.keywords.clone();
            if let Err(e) = self.set_keywords(&keywords) {
                log::warn!("Failed to republish keywords: {}", e);
            }
        }

        if auto_record {
            self.start_recording().await;
        }
    }
}
