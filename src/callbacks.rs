//! Application callbacks
//!
//! Every handler is optional; an absent handler means "do not notify".
//! Handlers run synchronously inside the session call that detected the
//! event.

use serde_json::Value;

use crate::audio::AudioQuality;
use crate::error::ClientError;
use crate::streaming::TransportKind;

type Handler<A> = Box<dyn FnMut(A) + Send>;
type Notify = Box<dyn FnMut() + Send>;
type ErrorHandler = Box<dyn FnMut(&ClientError) + Send>;

/// Handlers the session notifies
///
/// ```ignore
/// let callbacks = Callbacks::new()
///     .on_transcript(|data| println!("{}", data))
///     .on_error(|e| eprintln!("{}", e));
/// ```
#[derive(Default)]
pub struct Callbacks {
    transcript: Option<Handler<Value>>,
    events: Option<Handler<Value>>,
    connect: Option<Handler<TransportKind>>,
    disconnect: Option<Notify>,
    recording_started: Option<Notify>,
    recording_stopped: Option<Notify>,
    keywords_set: Option<Box<dyn FnMut(&[String]) + Send>>,
    keywords_error: Option<ErrorHandler>,
    audio_quality: Option<Handler<AudioQuality>>,
    error: Option<ErrorHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inbound `transcript` payloads, forwarded verbatim
    pub fn on_transcript(mut self, f: impl FnMut(Value) + Send + 'static) -> Self {
        self.transcript = Some(Box::new(f));
        self
    }

    /// Inbound `events` payloads, forwarded verbatim
    pub fn on_events(mut self, f: impl FnMut(Value) + Send + 'static) -> Self {
        self.events = Some(Box::new(f));
        self
    }

    /// Channel connected; receives the negotiated transport
    pub fn on_connect(mut self, f: impl FnMut(TransportKind) + Send + 'static) -> Self {
        self.connect = Some(Box::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.disconnect = Some(Box::new(f));
        self
    }

    pub fn on_recording_started(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.recording_started = Some(Box::new(f));
        self
    }

    pub fn on_recording_stopped(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.recording_stopped = Some(Box::new(f));
        self
    }

    /// The server acknowledged a keyword set
    pub fn on_keywords_set(mut self, f: impl FnMut(&[String]) + Send + 'static) -> Self {
        self.keywords_set = Some(Box::new(f));
        self
    }

    /// Keyword errors only. They are reported to `on_error` as well.
    pub fn on_keywords_error(mut self, f: impl FnMut(&ClientError) + Send + 'static) -> Self {
        self.keywords_error = Some(Box::new(f));
        self
    }

    /// Level statistics for every frame sent
    pub fn on_audio_quality(mut self, f: impl FnMut(AudioQuality) + Send + 'static) -> Self {
        self.audio_quality = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&ClientError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub(crate) fn transcript(&mut self, data: Value) {
        if let Some(f) = self.transcript.as_mut() {
            f(data);
        }
    }

    pub(crate) fn events(&mut self, data: Value) {
        if let Some(f) = self.events.as_mut() {
            f(data);
        }
    }

    pub(crate) fn connect(&mut self, transport: TransportKind) {
        if let Some(f) = self.connect.as_mut() {
            f(transport);
        }
    }

    pub(crate) fn disconnect(&mut self) {
        if let Some(f) = self.disconnect.as_mut() {
            f();
        }
    }

    pub(crate) fn recording_started(&mut self) {
        if let Some(f) = self.recording_started.as_mut() {
            f();
        }
    }

    pub(crate) fn recording_stopped(&mut self) {
        if let Some(f) = self.recording_stopped.as_mut() {
            f();
        }
    }

    pub(crate) fn keywords_set(&mut self, keywords: &[String]) {
        if let Some(f) = self.keywords_set.as_mut() {
            f(keywords);
        }
    }

    pub(crate) fn keywords_error(&mut self, error: &ClientError) {
        if let Some(f) = self.keywords_error.as_mut() {
            f(error);
        }
    }

    /// Skips measuring when nobody listens
    pub(crate) fn audio_quality(&mut self, frame: &[f32]) {
        if let Some(f) = self.audio_quality.as_mut() {
            f(AudioQuality::measure(frame));
        }
    }

    pub(crate) fn error(&mut self, error: &ClientError) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("transcript", &self.transcript.is_some())
            .field("events", &self.events.is_some())
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("recording_started", &self.recording_started.is_some())
            .field("recording_stopped", &self.recording_stopped.is_some())
            .field("keywords_set", &self.keywords_set.is_some())
            .field("keywords_error", &self.keywords_error.is_some())
            .field("audio_quality", &self.audio_quality.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
