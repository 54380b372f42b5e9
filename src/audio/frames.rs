//! Fixed-size frame assembly
//!
//! Captured audio arrives in blocks of whatever size the device delivers.
//! [`FrameAssembler`] regroups them into frames of exactly `frame_size`
//! samples; the tail that has not filled a frame yet stays buffered.

/// Regroups sample blocks into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    buffer: Vec<f32>,
    frames_emitted: u64,
}

impl FrameAssembler {
    /// A zero frame size is treated as one sample.
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            buffer: Vec::with_capacity(frame_size * 2),
            frames_emitted: 0,
        }
    }

    /// Append samples and return every frame completed by them, in order
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::with_capacity(self.buffer.len() / self.frame_size);
        while self.buffer.len() >= self.frame_size {
            frames.push(self.buffer.drain(..self.frame_size).collect());
        }
        self.frames_emitted += frames.len() as u64;
        frames
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Discard the partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_exact_size() {
        let mut assembler = FrameAssembler::new(4);

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(assembler.pending(), 3);

        let frames = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1], vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(assembler.pending(), 1);
        assert_eq!(assembler.frames_emitted(), 2);
    }

    #[test]
    fn test_large_block_yields_many_frames() {
        let mut assembler = FrameAssembler::new(4096);
        let frames = assembler.push(&vec![0.0; 4096 * 3 + 10]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 4096));
        assert_eq!(assembler.pending(), 10);
    }

    #[test]
    fn test_clear_discards_partial_frame() {
        let mut assembler = FrameAssembler::new(8);
        assembler.push(&[0.5; 5]);
        assembler.clear();
        assert_eq!(assembler.pending(), 0);
        assert!(assembler.push(&[0.5; 3]).is_empty());
    }

    #[test]
    fn test_zero_frame_size_is_clamped() {
        let mut assembler = FrameAssembler::new(0);
        assert_eq!(assembler.frame_size(), 1);
        assert_eq!(assembler.push(&[0.1, 0.2]).len(), 2);
    }
}
