//! Microphone capture using CPAL
//!
//! A cpal `Stream` is not `Send` on every platform, so each acquisition opens
//! the device on its own capture thread and keeps the stream there. The
//! [`InputStream`] handle talks to that thread over a command channel; sample
//! blocks flow back on a tokio channel.

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::runtime::RuntimeFlavor;
use tokio::sync::{mpsc, oneshot};

use super::device::{AcquiredInput, DeviceError, InputFormat, InputStream, Microphone};
use crate::config::MicConfig;

/// How long a start/pause/release request waits for the capture thread
const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
enum Control {
    Play,
    Pause,
    Release,
}

type ControlRequest = (Control, std_mpsc::Sender<Result<(), DeviceError>>);

/// [`Microphone`] backed by the default (or a named) cpal input device
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from the input device with this exact name
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    /// Names of the available input devices
    pub fn input_device_names() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                log::warn!("Failed to enumerate input devices: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&mut self, mic: &MicConfig) -> Result<AcquiredInput, DeviceError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (control_tx, control_rx) = std_mpsc::channel::<ControlRequest>();
        let (sample_tx, sample_rx) = mpsc::unbounded_channel();

        let device_name = self.device_name.clone();
        let mic = *mic;

        std::thread::Builder::new()
            .name("speechlink-capture".to_string())
            .spawn(move || capture_thread(device_name, mic, sample_tx, control_rx, ready_tx))
            .map_err(|e| {
                DeviceError::StreamCreationFailed(format!("Failed to spawn capture thread: {}", e))
            })?;

        let format = ready_rx.await.map_err(|_| DeviceError::Disconnected)??;

        Ok(AcquiredInput {
            stream: Box::new(CpalInputStream {
                control: Some(control_tx),
            }),
            samples: sample_rx,
            format,
        })
    }
}

/// Control handle for a stream living on its capture thread
struct CpalInputStream {
    control: Option<std_mpsc::Sender<ControlRequest>>,
}

impl CpalInputStream {
    fn request(&self, command: Control) -> Result<(), DeviceError> {
        let control = self.control.as_ref().ok_or(DeviceError::Disconnected)?;
        let (reply_tx, reply_rx) = std_mpsc::channel();
        control
            .send((command, reply_tx))
            .map_err(|_| DeviceError::Disconnected)?;
        match wait_reply(&reply_rx) {
            Ok(result) => result,
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(DeviceError::StreamControlFailed(
                format!("{:?} timed out", command),
            )),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }
}

/// Wait for the capture thread's answer.
///
/// Blocks the calling thread for at most [`CONTROL_TIMEOUT`]. On a
/// multi-threaded runtime the worker is handed off first, so other tasks keep
/// running meanwhile.
fn wait_reply<T>(reply_rx: &std_mpsc::Receiver<T>) -> Result<T, std_mpsc::RecvTimeoutError> {
    let wait = || reply_rx.recv_timeout(CONTROL_TIMEOUT);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

impl InputStream for CpalInputStream {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.request(Control::Play)
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.request(Control::Pause)
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        if self.control.is_none() {
            return Ok(());
        }
        let result = self.request(Control::Release);
        self.control = None;
        result
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        // Dropping the sender ends the capture thread's command loop
        self.control.take();
    }
}

fn capture_thread(
    device_name: Option<String>,
    mic: MicConfig,
    samples: mpsc::UnboundedSender<Vec<f32>>,
    control: std_mpsc::Receiver<ControlRequest>,
    ready: oneshot::Sender<Result<InputFormat, DeviceError>>,
) {
    let (stream, format) = match open_stream(device_name.as_deref(), &mic, samples) {
        Ok(opened) => opened,
        Err(e) => {
            log::error!("Failed to open microphone: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(format)).is_err() {
        log::debug!("Acquisition abandoned before the device was ready");
        return;
    }

    while let Ok((command, reply)) = control.recv() {
        let result = match command {
            Control::Play => stream
                .play()
                .map_err(|e| DeviceError::StreamControlFailed(e.to_string())),
            Control::Pause => stream
                .pause()
                .map_err(|e| DeviceError::StreamControlFailed(e.to_string())),
            Control::Release => {
                let _ = reply.send(Ok(()));
                break;
            }
        };
        log::debug!("Capture stream {:?}: {:?}", command, result.is_ok());
        let _ = reply.send(result);
    }

    drop(stream);
    log::info!("Microphone released");
}

fn open_stream(
    device_name: Option<&str>,
    mic: &MicConfig,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<(Stream, InputFormat), DeviceError> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| DeviceError::StreamCreationFailed(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or(DeviceError::NoInputDevice)?,
        None => host
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice)?,
    };

    log::info!("Using audio input device: {:?}", device.name());

    let (config, sample_format) = pick_config(&device, mic)?;
    let format = InputFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        format.sample_rate,
        format.channels,
        sample_format
    );

    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, samples, err_fn),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, samples, err_fn),
        SampleFormat::I32 => build_stream_typed::<i32>(&device, &config, samples, err_fn),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, samples, err_fn),
        _ => Err(DeviceError::NoSupportedConfig),
    }?;

    // Streams may start playing on creation; hold it until asked
    if let Err(e) = stream.pause() {
        log::debug!("Could not pause new stream: {}", e);
    }

    Ok((stream, format))
}

/// Prefer a config that matches the requested rate and channel count so the
/// sample pipeline can pass audio through; otherwise use the device default.
fn pick_config(device: &Device, mic: &MicConfig) -> Result<(StreamConfig, SampleFormat), DeviceError> {
    if let Ok(mut ranges) = device.supported_input_configs() {
        let exact = ranges.find(|range| {
            range.channels() == mic.channels
                && range.min_sample_rate().0 <= mic.sample_rate
                && range.max_sample_rate().0 >= mic.sample_rate
        });
        if let Some(range) = exact {
            let supported = range.with_sample_rate(cpal::SampleRate(mic.sample_rate));
            let sample_format = supported.sample_format();
            return Ok((supported.into(), sample_format));
        }
    }

    let supported = device
        .default_input_config()
        .map_err(|_| DeviceError::NoSupportedConfig)?;
    let sample_format = supported.sample_format();
    Ok((supported.into(), sample_format))
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    samples: mpsc::UnboundedSender<Vec<f32>>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, DeviceError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let block: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                // The receiver is gone once the session tore the capture down
                let _ = samples.send(block);
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => DeviceError::NoInputDevice,
            cpal::BuildStreamError::StreamConfigNotSupported => DeviceError::NoSupportedConfig,
            other => DeviceError::StreamCreationFailed(other.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Capture thread stand-in that answers every request after `delay`
    fn answering_thread(delay: Duration) -> std_mpsc::Sender<ControlRequest> {
        let (control_tx, control_rx) = std_mpsc::channel::<ControlRequest>();
        std::thread::spawn(move || {
            while let Ok((_command, reply)) = control_rx.recv() {
                std::thread::sleep(delay);
                let _ = reply.send(Ok(()));
            }
        });
        control_tx
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_control_wait_keeps_runtime_responsive() {
        let mut stream = CpalInputStream {
            control: Some(answering_thread(Duration::from_millis(200))),
        };

        let (ticked_tx, mut ticked_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = ticked_tx.send(());
        });

        assert!(stream.pause().is_ok());
        // The only worker was handed off while pause waited
        assert!(ticked_rx.try_recv().is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut stream = CpalInputStream {
            control: Some(answering_thread(Duration::ZERO)),
        };

        assert!(stream.release().is_ok());
        assert!(stream.release().is_ok());
        assert!(matches!(stream.start(), Err(DeviceError::Disconnected)));
    }

    #[test]
    fn test_gone_capture_thread_is_disconnected() {
        let (control_tx, control_rx) = std_mpsc::channel::<ControlRequest>();
        drop(control_rx);
        let mut stream = CpalInputStream {
            control: Some(control_tx),
        };

        assert!(matches!(stream.pause(), Err(DeviceError::Disconnected)));
    }
}
