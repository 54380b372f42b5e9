//! Microphone capture: start, frame forwarding, guarded teardown

use super::{Capture, CaptureState, StreamingClient};
use crate::audio::{
    encode_frame, AcquiredInput, FrameAssembler, InputStream, Microphone, SamplePipeline,
};
use crate::error::{ClientError, ErrorKind};
use crate::streaming::protocol::EVENT_BINARY_DATA;
use crate::streaming::{Emit, Transport};

impl<T: Transport, M: Microphone> StreamingClient<T, M> {
    /// Acquire the microphone and start streaming frames.
    ///
    /// Failures are reported through `on_error`. The exclusive borrow spans
    /// the device acquisition, so a second start cannot begin until this one
    /// has resolved.
    pub async fn start_recording(&mut self) {
        if !self.is_connected() {
            self.raise(ClientError::new(
                ErrorKind::Microphone,
                "Socket is not connected. Please call connect first.",
            ));
            return;
        }

        if !matches!(self.capture, CaptureState::Idle) {
            self.raise(ClientError::new(
                ErrorKind::MicrophoneInUse,
                "Recording is already in progress. Please stop the current recording first.",
            ));
            return;
        }

        let acquired = match self.microphone.acquire(&self.mic).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.raise(
                    ClientError::new(
                        ErrorKind::Microphone,
                        format!("Failed to access microphone: {}", e),
                    )
                    .with_cause(e),
                );
                return;
            }
        };

        let AcquiredInput {
            mut stream,
            samples,
            format,
        } = acquired;

        log::info!(
            "Recording started ({}Hz, {}ch device)",
            format.sample_rate,
            format.channels
        );
        self.callbacks.recording_started();

        let pipeline = match SamplePipeline::new(format, &self.mic) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                // Nothing reached the capture state yet; release what was acquired
                self.capture = CaptureState::Stopping;
                self.callbacks.recording_stopped();
                drop(samples);
                self.release_stream(stream.as_mut());
                self.capture = CaptureState::Idle;
                self.raise(
                    ClientError::new(
                        ErrorKind::Microphone,
                        format!("Error starting microphone recording: {}", e),
                    )
                    .with_cause(e),
                );
                return;
            }
        };

        self.capture = CaptureState::Active(Capture {
            stream,
            source: samples,
            frames: FrameAssembler::new(self.mic.frame_size),
            pipeline,
        });

        let started = match &mut self.capture {
            CaptureState::Active(capture) => capture.stream.start(),
            _ => Ok(()),
        };
        if let Err(e) = started {
            self.stop_recording();
            self.raise(
                ClientError::new(
                    ErrorKind::Microphone,
                    format!("Error starting microphone recording: {}", e),
                )
                .with_cause(e),
            );
        }
    }

    /// Stop the recording and release every capture handle.
    ///
    /// No-op while a teardown is already running. Otherwise the
    /// recording-stopped callback fires, even with nothing to release.
    /// Each cleanup step runs even if an earlier one failed; failures are
    /// reported individually as microphone errors.
    pub fn stop_recording(&mut self) {
        let capture = match std::mem::replace(&mut self.capture, CaptureState::Stopping) {
            CaptureState::Stopping => return,
            CaptureState::Idle => None,
            CaptureState::Active(capture) => Some(capture),
        };

        log::info!("Stopping recording");
        self.callbacks.recording_stopped();

        let Some(capture) = capture else {
            self.capture = CaptureState::Idle;
            return;
        };

        let Capture {
            mut stream,
            source,
            mut frames,
            mut pipeline,
        } = capture;

        if let Err(e) = stream.pause() {
            self.raise(
                ClientError::new(
                    ErrorKind::Microphone,
                    format!("Error disconnecting microphone source: {}", e),
                )
                .with_cause(e),
            );
        }
        drop(source);

        if frames.pending() > 0 {
            log::debug!("Discarding {} buffered samples", frames.pending());
        }
        frames.clear();
        drop(frames);

        self.release_stream(stream.as_mut());
        drop(stream);

        pipeline.close();
        drop(pipeline);

        self.capture = CaptureState::Idle;
        log::info!("Recording stopped");
    }

    fn release_stream(&mut self, stream: &mut dyn InputStream) {
        if let Err(e) = stream.release() {
            self.raise(
                ClientError::new(
                    ErrorKind::Microphone,
                    format!("Error stopping microphone stream: {}", e),
                )
                .with_cause(e),
            );
        }
    }

    /// Resample a device block and send every frame it completes
    pub(super) fn handle_samples(&mut self, block: &[f32]) {
        let frames = match &mut self.capture {
            CaptureState::Active(capture) => {
                let resampled = capture.pipeline.process(block);
                capture.frames.push(&resampled)
            }
            _ => return,
        };

        for frame in frames {
            self.send_frame(&frame);
        }
    }

    fn send_frame(&mut self, frame: &[f32]) {
        self.callbacks.audio_quality(frame);

        let Some(connection) = self.connection.as_mut() else {
            log::warn!("Dropping audio frame: no channel");
            return;
        };

        let bytes = encode_frame(frame);
        log::debug!("Sending audio frame ({} bytes)", bytes.len());
        if let Err(e) = connection
            .channel
            .emit(Emit::binary(EVENT_BINARY_DATA, bytes))
        {
            self.raise(
                ClientError::new(
                    ErrorKind::Streaming,
                    format!("Failed to send audio frame: {}", e),
                )
                .with_cause(e),
            );
        }
    }
}
