//! PCM conversion and per-frame level statistics

/// Convert one float sample to i16.
///
/// The sample is clamped to [-1.0, 1.0], scaled by `i16::MAX` and truncated
/// toward zero, so the output is symmetric: `1.0 → 32767`, `-1.0 → -32767`.
pub fn f32_to_i16(sample: f32) -> i16 {
    // NaN clamps to NaN and casts to 0
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// Convert a frame of float samples to i16
pub fn frame_to_i16(frame: &[f32]) -> Vec<i16> {
    frame.iter().map(|&s| f32_to_i16(s)).collect()
}

/// Encode a frame as little-endian 16-bit PCM bytes
pub fn encode_frame(frame: &[f32]) -> Vec<u8> {
    frame
        .iter()
        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
        .collect()
}

/// Level statistics of one frame, reported through the audio-quality callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioQuality {
    /// Root-mean-square level, 0.0-1.0
    pub rms: f32,
    /// Largest absolute sample, 0.0-1.0
    pub peak: f32,
    /// Samples at or beyond full scale
    pub clipped_samples: usize,
}

impl AudioQuality {
    pub fn measure(frame: &[f32]) -> Self {
        if frame.is_empty() {
            return Self {
                rms: 0.0,
                peak: 0.0,
                clipped_samples: 0,
            };
        }

        let mut sum_squares = 0.0f64;
        let mut peak = 0.0f32;
        let mut clipped_samples = 0;

        for &sample in frame {
            let clamped = sample.clamp(-1.0, 1.0);
            sum_squares += (clamped as f64) * (clamped as f64);
            peak = peak.max(clamped.abs());
            if sample.abs() >= 1.0 {
                clipped_samples += 1;
            }
        }

        Self {
            rms: (sum_squares / frame.len() as f64).sqrt() as f32,
            peak,
            clipped_samples,
        }
    }

    /// Peak-to-RMS ratio; infinite for a silent frame
    pub fn crest_factor(&self) -> f32 {
        if self.rms <= 0.0 {
            return f32::INFINITY;
        }
        self.peak / self.rms
    }
}
