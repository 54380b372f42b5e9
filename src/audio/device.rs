//! Microphone abstraction
//!
//! The session acquires its input through the [`Microphone`] trait and then
//! controls the device through the returned [`InputStream`]. Captured sample
//! blocks arrive on an unbounded channel as interleaved `f32` in the device's
//! native [`InputFormat`].

use tokio::sync::mpsc;

use crate::config::MicConfig;

/// Sample blocks delivered by a running input stream
pub type SampleReceiver = mpsc::UnboundedReceiver<Vec<f32>>;

/// Native format of the acquired device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Errors raised by microphone access and stream control
#[derive(Debug, Clone)]
pub enum DeviceError {
    NoInputDevice,
    PermissionDenied(String),
    NoSupportedConfig,
    StreamCreationFailed(String),
    StreamControlFailed(String),
    /// The capture thread is gone
    Disconnected,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::NoInputDevice => write!(f, "No audio input device found"),
            DeviceError::PermissionDenied(e) => write!(f, "Microphone permission denied: {}", e),
            DeviceError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            DeviceError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            DeviceError::StreamControlFailed(e) => write!(f, "Audio stream control failed: {}", e),
            DeviceError::Disconnected => write!(f, "Audio capture thread is not running"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Control handle of an acquired input device
///
/// `release` frees the device; a released stream cannot be restarted.
/// Calls are synchronous and may block briefly while the device answers.
pub trait InputStream: Send {
    fn start(&mut self) -> Result<(), DeviceError>;
    fn pause(&mut self) -> Result<(), DeviceError>;
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Everything handed over by a successful acquisition
pub struct AcquiredInput {
    pub stream: Box<dyn InputStream>,
    pub samples: SampleReceiver,
    pub format: InputFormat,
}

impl std::fmt::Debug for AcquiredInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredInput")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Source of microphone input
///
/// `acquire` may wait on a permission prompt or device start-up. The stream
/// it returns is not yet producing samples until [`InputStream::start`].
#[async_trait::async_trait]
pub trait Microphone: Send {
    async fn acquire(&mut self, mic: &MicConfig) -> Result<AcquiredInput, DeviceError>;
}
