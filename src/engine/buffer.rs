//! Audio Buffer Management
//!
//! Provides the decoded audio buffer type shared by the scheduler, the
//! effects graph, the fallback mixer and the recorder. Samples are kept
//! non-interleaved as 32-bit float, one `Vec<f32>` per channel.

use crate::error::{EngineError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Calculate the RMS (Root Mean Square) level of an audio buffer in dB
///
/// Returns -f32::INFINITY for empty or silent buffers.
pub fn calculate_rms(buffer: &AudioBuffer) -> f32 {
    let total_samples = buffer.num_channels() * buffer.num_samples();
    if total_samples == 0 {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();

    let rms = (sum_squares / total_samples as f64).sqrt() as f32;
    linear_to_db(rms)
}

/// Calculate the peak level of an audio buffer in dB
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    let peak = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| s.abs())
        .fold(0.0_f32, f32::max);

    linear_to_db(peak)
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Decoded audio: fixed channel count, fixed sample rate, per-channel samples
///
/// # Example
/// ```
/// use promptdj::engine::AudioBuffer;
///
/// // One second of stereo silence at 48kHz
/// let buffer = AudioBuffer::silent(2, 48000, 48000);
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.duration_secs(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is frames
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a zeroed buffer
    pub fn silent(channels: usize, frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; frames]; channels],
            sample_rate,
        }
    }

    /// Create a buffer from per-channel sample vectors
    ///
    /// All channels must have the same length.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        let frames = samples.first().map(Vec::len).unwrap_or(0);
        if samples.iter().any(|ch| ch.len() != frames) {
            return Err(EngineError::InvalidAudio {
                reason: "channels have different lengths".to_string(),
                source: None,
            });
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// Returns an error if the data length is not a whole number of frames.
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 || interleaved.len() % channels != 0 {
            return Err(EngineError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    channels
                ),
                source: None,
            });
        }

        let frames = interleaved.len() / channels;
        let mut samples = vec![Vec::with_capacity(frames); channels];

        for frame in interleaved.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.num_channels();
        let frames = self.len();

        let mut interleaved = Vec::with_capacity(num_channels * frames);
        for frame in 0..frames {
            for channel in &self.samples {
                interleaved.push(channel[frame]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of frames (samples per channel)
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Alias for len()
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Check that another buffer has the same channel count and sample rate
    pub fn same_format(&self, other: &AudioBuffer) -> bool {
        self.num_channels() == other.num_channels() && self.sample_rate == other.sample_rate
    }

    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Append another buffer's frames to the end of this one
    ///
    /// Both buffers must share channel count and sample rate.
    pub fn append(&mut self, other: &AudioBuffer) -> Result<()> {
        if !self.same_format(other) {
            return Err(EngineError::RecordingFormatMismatch {
                expected_channels: self.num_channels(),
                expected_rate: self.sample_rate,
                found_channels: other.num_channels(),
                found_rate: other.sample_rate,
            });
        }
        for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
            dst.extend_from_slice(src);
        }
        Ok(())
    }

    /// Add `frames` frames of `source` (starting at `src_offset`) into this
    /// buffer at `dst_offset`, scaled by `gain`
    ///
    /// Channels missing from the source are filled from its last channel, so
    /// mono material spreads to both sides of a stereo mix.
    pub fn mix_from(
        &mut self,
        source: &AudioBuffer,
        src_offset: usize,
        dst_offset: usize,
        frames: usize,
        gain: f32,
    ) {
        if source.num_channels() == 0 {
            return;
        }
        let frames = frames
            .min(source.len().saturating_sub(src_offset))
            .min(self.len().saturating_sub(dst_offset));
        if frames == 0 {
            return;
        }

        for (ch, dst) in self.samples.iter_mut().enumerate() {
            let src = &source.samples[ch.min(source.num_channels() - 1)];
            let src = &src[src_offset..src_offset + frames];
            for (d, s) in dst[dst_offset..dst_offset + frames].iter_mut().zip(src) {
                *d += s * gain;
            }
        }
    }

    /// Check that every sample is finite
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_to_db() {
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
        assert!((linear_to_db(1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_rms_and_peak() {
        let buffer = AudioBuffer::from_channels(vec![vec![1.0, -1.0, 1.0, -1.0]], 48000).unwrap();
        assert!(calculate_rms(&buffer).abs() < 1e-4);
        assert!(calculate_peak(&buffer).abs() < 1e-4);

        let silent = AudioBuffer::silent(2, 16, 48000);
        assert_eq!(calculate_rms(&silent), f32::NEG_INFINITY);
    }

    #[test]
    fn test_from_interleaved_stereo() {
        let buffer = AudioBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4], 2, 48000).unwrap();
        assert_eq!(buffer.channel(0), &[0.1, 0.3]);
        assert_eq!(buffer.channel(1), &[0.2, 0.4]);
        assert_eq!(buffer.to_interleaved(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_from_interleaved_partial_frame() {
        assert!(AudioBuffer::from_interleaved(&[0.1, 0.2, 0.3], 2, 48000).is_err());
    }

    #[test]
    fn test_from_channels_rejects_ragged() {
        assert!(AudioBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 48000).is_err());
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::silent(2, 24000, 48000);
        assert_eq!(buffer.duration_secs(), 0.5);
    }

    #[test]
    fn test_append_same_format() {
        let mut a = AudioBuffer::from_channels(vec![vec![1.0], vec![2.0]], 48000).unwrap();
        let b = AudioBuffer::from_channels(vec![vec![3.0], vec![4.0]], 48000).unwrap();
        a.append(&b).unwrap();
        assert_eq!(a.channel(0), &[1.0, 3.0]);
        assert_eq!(a.channel(1), &[2.0, 4.0]);
    }

    #[test]
    fn test_append_rejects_rate_mismatch() {
        let mut a = AudioBuffer::silent(2, 4, 48000);
        let b = AudioBuffer::silent(2, 4, 44100);
        let err = a.append(&b).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RecordingFormatMismatch { found_rate: 44100, .. }
        ));
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_mix_from_with_offsets() {
        let mut dst = AudioBuffer::silent(2, 4, 48000);
        let src = AudioBuffer::from_channels(vec![vec![1.0, 1.0, 1.0]], 48000).unwrap();

        dst.mix_from(&src, 1, 2, 10, 0.5);

        // Mono source spreads to both channels, clipped to destination length
        assert_eq!(dst.channel(0), &[0.0, 0.0, 0.5, 0.5]);
        assert_eq!(dst.channel(1), &[0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_is_finite() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![2.0, -3.0, 0.5]], 48000).unwrap();
        assert!(buffer.is_finite());

        buffer.channel_mut(0)[0] = f32::NAN;
        assert!(!buffer.is_finite());
    }
}
