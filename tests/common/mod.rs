//! In-memory transport and microphone for driving a session in tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use speechlink::audio::{
    AcquiredInput, DeviceError, InputFormat, InputStream, Microphone, SampleReceiver,
};
use speechlink::config::MicConfig;
use speechlink::streaming::{
    Channel, ChannelError, ChannelEvent, ConnectRequest, Emit, OpenedChannel, Transport,
};
use speechlink::{Callbacks, ClientConfig, StreamingClient};
use tokio::sync::mpsc;

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct TransportState {
    pub requests: Vec<ConnectRequest>,
    pub emits: Vec<Emit>,
    pub disconnects: usize,
    pub senders: Vec<mpsc::UnboundedSender<ChannelEvent>>,
    pub fail_open: bool,
    pub fail_emit: bool,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    /// Push an event onto the most recently opened channel
    pub fn send(&self, event: ChannelEvent) {
        let state = self.state.lock().unwrap();
        let sender = state.senders.last().expect("no channel opened");
        let _ = sender.send(event);
    }

    pub fn connect_event(&self, transport: &str) {
        self.send(ChannelEvent::Connect {
            transport: transport.to_string(),
        });
    }

    /// End the inbound event stream of every channel
    pub fn close_streams(&self) {
        self.state.lock().unwrap().senders.clear();
    }

    pub fn emits_named(&self, event: &str) -> Vec<Emit> {
        self.state
            .lock()
            .unwrap()
            .emits
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn set_fail_emit(&self, fail: bool) {
        self.state.lock().unwrap().fail_emit = fail;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }
}

impl Transport for MockTransport {
    fn open(&mut self, request: ConnectRequest) -> Result<OpenedChannel, ChannelError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(ChannelError::InitFailed("mock refused".to_string()));
        }
        state.requests.push(request);

        let (tx, rx) = mpsc::unbounded_channel();
        state.senders.push(tx);

        Ok(OpenedChannel {
            channel: Box::new(MockChannel {
                state: self.state.clone(),
            }),
            events: rx,
        })
    }
}

struct MockChannel {
    state: Arc<Mutex<TransportState>>,
}

impl Channel for MockChannel {
    fn emit(&mut self, emit: Emit) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_emit {
            return Err(ChannelError::SendFailed("mock send failure".to_string()));
        }
        state.emits.push(emit);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.lock().unwrap().disconnects += 1;
    }
}

// ============================================================================
// Microphone
// ============================================================================

pub struct MicState {
    pub format: InputFormat,
    pub acquisitions: usize,
    pub senders: Vec<mpsc::UnboundedSender<Vec<f32>>>,
    /// Stream control calls, in order
    pub calls: Vec<&'static str>,
    pub fail_acquire: bool,
    /// Acquisition never resolves, like an unanswered permission prompt
    pub hang_acquire: bool,
    pub fail_start: bool,
    pub fail_pause: bool,
    pub fail_release: bool,
}

impl Default for MicState {
    fn default() -> Self {
        Self {
            format: InputFormat {
                sample_rate: 16000,
                channels: 1,
            },
            acquisitions: 0,
            senders: Vec::new(),
            calls: Vec::new(),
            fail_acquire: false,
            hang_acquire: false,
            fail_start: false,
            fail_pause: false,
            fail_release: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockMicrophone {
    pub state: Arc<Mutex<MicState>>,
}

impl MockMicrophone {
    /// Deliver a block of samples from the most recent acquisition
    pub fn feed(&self, samples: Vec<f32>) {
        let state = self.state.lock().unwrap();
        let sender = state.senders.last().expect("microphone not acquired");
        let _ = sender.send(samples);
    }

    /// End the sample stream
    pub fn unplug(&self) {
        self.state.lock().unwrap().senders.clear();
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.state.lock().unwrap().acquisitions
    }

    pub fn update(&self, f: impl FnOnce(&mut MicState)) {
        f(&mut self.state.lock().unwrap());
    }
}

#[async_trait::async_trait]
impl Microphone for MockMicrophone {
    async fn acquire(&mut self, _mic: &MicConfig) -> Result<AcquiredInput, DeviceError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.acquisitions += 1;
            state.hang_acquire
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_acquire {
            return Err(DeviceError::PermissionDenied("denied by user".to_string()));
        }

        let (tx, rx): (_, SampleReceiver) = mpsc::unbounded_channel();
        state.senders.push(tx);

        Ok(AcquiredInput {
            stream: Box::new(MockStream {
                state: self.state.clone(),
            }),
            samples: rx,
            format: state.format,
        })
    }
}

struct MockStream {
    state: Arc<Mutex<MicState>>,
}

impl InputStream for MockStream {
    fn start(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("start");
        if state.fail_start {
            return Err(DeviceError::StreamControlFailed("cannot start".to_string()));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("pause");
        if state.fail_pause {
            return Err(DeviceError::StreamControlFailed("cannot pause".to_string()));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("release");
        if state.fail_release {
            return Err(DeviceError::StreamControlFailed("cannot release".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Callback recorder
// ============================================================================

/// Records every callback as a short string, in order
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with("error:"))
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn callbacks(&self) -> Callbacks {
        let (a, b, c, d, e, f, g, h, i, j) = (
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
        );
        Callbacks::new()
            .on_transcript(move |data| a.push(format!("transcript:{}", data)))
            .on_events(move |data| b.push(format!("events:{}", data)))
            .on_connect(move |kind| c.push(format!("connect:{}", kind)))
            .on_disconnect(move || d.push("disconnect".to_string()))
            .on_recording_started(move || e.push("started".to_string()))
            .on_recording_stopped(move || f.push("stopped".to_string()))
            .on_keywords_set(move |k| g.push(format!("keywords_set:{}", k.join(","))))
            .on_keywords_error(move |err| h.push(format!("keywords_error:{}", err.message())))
            .on_audio_quality(move |q| i.push(format!("quality:{:.3}", q.peak)))
            .on_error(move |err| j.push(format!("error:{}:{}", err.kind().code(), err.message())))
    }
}

// ============================================================================
// Session helpers
// ============================================================================

pub type TestClient = StreamingClient<MockTransport, MockMicrophone>;

pub struct Harness {
    pub client: TestClient,
    pub transport: MockTransport,
    pub mic: MockMicrophone,
    pub recorder: Recorder,
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("https://speech.test.com", "test-token");
    config
        .query_params
        .insert("flow_id".to_string(), "flow-123".to_string());
    config
}

pub fn harness_with(config: ClientConfig) -> Harness {
    let transport = MockTransport::default();
    let mic = MockMicrophone::default();
    let recorder = Recorder::default();
    let client = StreamingClient::new(config, recorder.callbacks(), transport.clone(), mic.clone())
        .expect("valid config");
    Harness {
        client,
        transport,
        mic,
        recorder,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

impl Harness {
    /// Open a channel and complete the namespace join
    pub async fn connect(&mut self, auto_record: bool) {
        self.client.connect(auto_record);
        self.transport.connect_event("websocket");
        self.client.process_pending().await;
    }

    pub async fn send(&mut self, event: ChannelEvent) {
        self.transport.send(event);
        self.client.process_pending().await;
    }

    pub async fn feed(&mut self, samples: Vec<f32>) {
        self.mic.feed(samples);
        self.client.process_pending().await;
    }
}
