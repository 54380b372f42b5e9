//! Channel mapping and linear resampling
//!
//! ```text
//! device block (rate_in, ch_in, interleaved)
//!     ──▶ downmix to mono (when 1 channel is configured)
//!     ──▶ LinearResampler (rate_in → configured rate)
//!     ──▶ FrameAssembler
//! ```

use super::device::InputFormat;
use crate::config::MicConfig;

/// Average interleaved frames down to one channel
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Streaming linear-interpolation resampler for interleaved audio
///
/// Keeps the last input frame and the fractional read position between
/// blocks, so block boundaries leave no seams.
#[derive(Debug)]
pub struct LinearResampler {
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    /// Input frames advanced per output frame
    step: f64,
    /// Read position relative to the start of the next block; -1.0 refers
    /// to `last`
    position: f64,
    last: Option<Vec<f32>>,
}

impl LinearResampler {
    /// Returns `None` for a zero rate
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> Option<Self> {
        if source_rate == 0 || target_rate == 0 {
            return None;
        }
        Some(Self {
            source_rate,
            target_rate,
            channels: channels.max(1) as usize,
            step: source_rate as f64 / target_rate as f64,
            position: 0.0,
            last: None,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.source_rate == self.target_rate
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return samples.to_vec();
        }

        let channels = self.channels;
        let frames = samples.len() / channels;
        if frames == 0 {
            return Vec::new();
        }

        let frame_at = |index: isize, ch: usize, last: &Option<Vec<f32>>| -> f32 {
            if index < 0 {
                last.as_ref().map(|l| l[ch]).unwrap_or(samples[ch])
            } else {
                samples[index as usize * channels + ch]
            }
        };

        let estimate = ((frames as f64 - self.position) / self.step).ceil().max(0.0) as usize;
        let mut out = Vec::with_capacity(estimate * channels);

        let mut t = self.position;
        while t < (frames - 1) as f64 {
            let index = t.floor();
            let frac = (t - index) as f32;
            let index = index as isize;
            for ch in 0..channels {
                let a = frame_at(index, ch, &self.last);
                let b = frame_at(index + 1, ch, &self.last);
                out.push(a + (b - a) * frac);
            }
            t += self.step;
        }

        self.position = t - frames as f64;
        let tail = (frames - 1) * channels;
        self.last = Some(samples[tail..tail + channels].to_vec());
        out
    }

    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}

/// Failure to set up the sample pipeline for a device
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineError(pub String);

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Audio pipeline error: {}", self.0)
    }
}

impl std::error::Error for PipelineError {}

/// Device format → configured format
#[derive(Debug)]
pub struct SamplePipeline {
    input_channels: u16,
    mixdown: bool,
    resampler: LinearResampler,
}

impl SamplePipeline {
    pub fn new(input: InputFormat, mic: &MicConfig) -> Result<Self, PipelineError> {
        if input.channels == 0 {
            return Err(PipelineError("device reports zero channels".to_string()));
        }

        let mixdown = if mic.channels == 1 {
            input.channels > 1
        } else if mic.channels == input.channels {
            false
        } else {
            return Err(PipelineError(format!(
                "cannot map {} device channels to {} channels",
                input.channels, mic.channels
            )));
        };

        let resampler = LinearResampler::new(input.sample_rate, mic.sample_rate, mic.channels)
            .ok_or_else(|| {
                PipelineError(format!(
                    "unsupported sample rates {}Hz -> {}Hz",
                    input.sample_rate, mic.sample_rate
                ))
            })?;

        log::debug!(
            "Sample pipeline: {}Hz/{}ch -> {}Hz/{}ch",
            input.sample_rate,
            input.channels,
            mic.sample_rate,
            mic.channels
        );

        Ok(Self {
            input_channels: input.channels,
            mixdown,
            resampler,
        })
    }

    pub fn process(&mut self, block: &[f32]) -> Vec<f32> {
        if self.mixdown {
            let mono = downmix(block, self.input_channels);
            self.resampler.process(&mono)
        } else {
            self.resampler.process(block)
        }
    }

    pub fn close(&mut self) {
        self.resampler.reset();
    }
}
