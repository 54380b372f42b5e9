//! Streaming speech-recognition session
//!
//! [`StreamingClient`] owns one channel handle and at most one capture at a
//! time. All work happens on the caller's task: the application calls the
//! async entry points and drives inbound traffic with
//! [`StreamingClient::process_next`] / [`StreamingClient::run`].
//!
//! # Lifecycle
//!
//! ```text
//! connect() ──▶ Connect event ──▶ [auto] start_recording() ──▶ frames ──▶ binary_data
//!    │                │
//!    │                └──▶ republish active keywords
//!    ▼
//! Disconnect / ConnectError / close_socket() ──▶ teardown (stop recording, on_disconnect)
//! ```

mod connection;
mod keywords;
mod recording;

use std::collections::HashMap;

use tokio::sync::mpsc::error::TryRecvError;

use crate::audio::{
    CpalMicrophone, FrameAssembler, InputStream, Microphone, SamplePipeline, SampleReceiver,
};
use crate::callbacks::Callbacks;
use crate::config::{ClientConfig, MicConfig};
use crate::error::{ClientError, ErrorKind};
use crate::streaming::{Channel, ChannelEvent, EventReceiver, SocketIoTransport, Transport};

/// Live channel plus the per-connection bookkeeping
struct Connection {
    channel: Box<dyn Channel>,
    events: EventReceiver,
    /// Set once the namespace join succeeded
    connected: bool,
    auto_record: bool,
    /// Report the next channel error as a keywords error as well
    keyword_error_watch: bool,
    /// Keyword sets awaiting acknowledgement, by ack id
    pending_acks: HashMap<u64, Vec<String>>,
    next_ack_id: u64,
}

impl Connection {
    fn new(channel: Box<dyn Channel>, events: EventReceiver, auto_record: bool) -> Self {
        Self {
            channel,
            events,
            connected: false,
            auto_record,
            keyword_error_watch: false,
            pending_acks: HashMap::new(),
            next_ack_id: 0,
        }
    }
}

/// The four handles of a running recording. They exist together or not at
/// all.
struct Capture {
    stream: Box<dyn InputStream>,
    source: SampleReceiver,
    frames: FrameAssembler,
    pipeline: SamplePipeline,
}

enum CaptureState {
    Idle,
    Active(Capture),
    /// A teardown pass is running
    Stopping,
}

/// Client for the streaming speech-recognition endpoint
///
/// Generic over the channel [`Transport`] and the [`Microphone`] so both can
/// be replaced; [`StreamingClient::with_defaults`] uses Socket.IO and cpal.
pub struct StreamingClient<T: Transport, M: Microphone> {
    config: ClientConfig,
    mic: MicConfig,
    callbacks: Callbacks,
    transport: T,
    microphone: M,
    connection: Option<Connection>,
    capture: CaptureState,
    keywords: Vec<String>,
}

impl StreamingClient<SocketIoTransport, CpalMicrophone> {
    /// Session over the built-in Socket.IO transport and the default input device
    pub fn with_defaults(config: ClientConfig, callbacks: Callbacks) -> Result<Self, ClientError> {
        Self::new(config, callbacks, SocketIoTransport::new(), CpalMicrophone::new())
    }
}

impl<T: Transport, M: Microphone> StreamingClient<T, M> {
    /// Validate the config and fill microphone defaults
    pub fn new(
        config: ClientConfig,
        callbacks: Callbacks,
        transport: T,
        microphone: M,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let mic = config.mic();

        log::debug!(
            "Streaming client for {} (mic {}Hz, {} samples/frame, {}ch)",
            config.endpoint(),
            mic.sample_rate,
            mic.frame_size,
            mic.channels
        );

        Ok(Self {
            config,
            mic,
            callbacks,
            transport,
            microphone,
            connection: None,
            capture: CaptureState::Idle,
            keywords: Vec::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Microphone settings with defaults applied
    pub fn mic_config(&self) -> &MicConfig {
        &self.mic
    }

    /// A channel exists and has joined the namespace
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().map_or(false, |c| c.connected)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.capture, CaptureState::Active(_))
    }

    /// Single funnel for every reported error: log it, then notify
    fn raise(&mut self, error: ClientError) {
        log::error!("{}", error);
        if error.kind() == ErrorKind::Keywords {
            self.callbacks.keywords_error(&error);
        }
        self.callbacks.error(&error);
    }

    // ========================================================================
    // Event pump
    // ========================================================================

    /// Wait for the next channel event or captured audio block and handle it.
    ///
    /// Returns `false` without waiting when there is neither a channel nor an
    /// active recording.
    pub async fn process_next(&mut self) -> bool {
        enum Next {
            Channel(Option<ChannelEvent>),
            Samples(Option<Vec<f32>>),
        }

        let next = {
            let events = self.connection.as_mut().map(|c| &mut c.events);
            let source = match &mut self.capture {
                CaptureState::Active(capture) => Some(&mut capture.source),
                _ => None,
            };

            match (events, source) {
                (None, None) => return false,
                (Some(events), None) => Next::Channel(events.recv().await),
                (None, Some(source)) => Next::Samples(source.recv().await),
                (Some(events), Some(source)) => tokio::select! {
                    event = events.recv() => Next::Channel(event),
                    block = source.recv() => Next::Samples(block),
                },
            }
        };

        match next {
            Next::Channel(Some(event)) => self.handle_event(event).await,
            Next::Channel(None) => self.on_events_closed(),
            Next::Samples(Some(block)) => self.handle_samples(&block),
            Next::Samples(None) => self.on_source_closed(),
        }
        true
    }

    /// Handle everything already queued without waiting. Returns the number
    /// of items handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Some(connection) = self.connection.as_mut() {
                match connection.events.try_recv() {
                    Ok(event) => {
                        self.handle_event(event).await;
                        handled += 1;
                        continue;
                    }
                    Err(TryRecvError::Disconnected) => {
                        self.on_events_closed();
                        handled += 1;
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                }
            }

            if let CaptureState::Active(capture) = &mut self.capture {
                match capture.source.try_recv() {
                    Ok(block) => {
                        self.handle_samples(&block);
                        handled += 1;
                        continue;
                    }
                    Err(TryRecvError::Disconnected) => {
                        self.on_source_closed();
                        handled += 1;
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                }
            }

            return handled;
        }
    }

    /// Handle traffic until the channel is gone and no recording is active
    pub async fn run(&mut self) {
        while self.process_next().await {}
        log::debug!("Streaming client idle");
    }

    fn on_events_closed(&mut self) {
        log::warn!("Channel event stream ended without a disconnect");
        self.teardown_connection();
    }

    fn on_source_closed(&mut self) {
        log::warn!("Microphone sample stream ended");
        self.stop_recording();
    }
}
