//! Audio capture pipeline
//!
//! ```text
//! Microphone ──acquire──▶ InputStream + sample blocks (device format)
//!     ──▶ SamplePipeline (downmix, resample)
//!     ──▶ FrameAssembler (fixed frame size)
//!     ──▶ AudioQuality + encode_frame (16-bit little-endian PCM)
//! ```

mod cpal_input;
mod device;
mod frames;
mod pcm;
mod resample;

pub use cpal_input::CpalMicrophone;
pub use device::{
    AcquiredInput, DeviceError, InputFormat, InputStream, Microphone, SampleReceiver,
};
pub use frames::FrameAssembler;
pub use pcm::{encode_frame, f32_to_i16, frame_to_i16, AudioQuality};
pub use resample::{downmix, LinearResampler, PipelineError, SamplePipeline};
