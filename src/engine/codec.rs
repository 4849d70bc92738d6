//! Audio codecs
//!
//! - Chunk decoding: the backend streams interleaved little-endian signed
//!   16-bit PCM at the fixed target rate and channel count.
//! - WAV encoding: canonical 16-bit PCM RIFF/WAVE, the file produced by the
//!   recorder. The header is the 44-byte `RIFF`/`fmt `/`data` layout.
//! - WAV import: fallback loop assets, converted to the fixed target format.
//!   Sample rate conversion uses linear interpolation.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::AudioBuffer;
use crate::error::{EngineError, Result};

/// Bytes per encoded sample (16-bit PCM)
const BYTES_PER_SAMPLE: usize = 2;

// ============================================================================
// Chunk decoding
// ============================================================================

/// Decode a raw backend chunk into an [`AudioBuffer`]
///
/// # Errors
/// * `Decode` - empty payload or a payload that is not a whole number of frames
pub fn decode_chunk(payload: &[u8], sample_rate: u32, channels: usize) -> Result<AudioBuffer> {
    if payload.is_empty() {
        return Err(EngineError::Decode {
            reason: "empty audio chunk".to_string(),
        });
    }
    let frame_bytes = channels * BYTES_PER_SAMPLE;
    if channels == 0 || payload.len() % frame_bytes != 0 {
        return Err(EngineError::Decode {
            reason: format!(
                "chunk of {} bytes is not a whole number of {}-channel 16-bit frames",
                payload.len(),
                channels
            ),
        });
    }

    let interleaved: Vec<f32> = payload
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    AudioBuffer::from_interleaved(&interleaved, channels, sample_rate).map_err(|e| {
        EngineError::Decode {
            reason: e.to_string(),
        }
    })
}

/// Encode interleaved samples as 16-bit PCM chunk bytes (the inverse of
/// [`decode_chunk`]); used by backends that synthesize audio
pub fn encode_pcm16(buffer: &AudioBuffer) -> Vec<u8> {
    buffer
        .to_interleaved()
        .into_iter()
        .flat_map(|s| sample_to_i16(s).to_le_bytes())
        .collect()
}

/// Clamp to [-1, 1] and scale into the signed 16-bit range
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

// ============================================================================
// WAV encoding
// ============================================================================

/// Encode a buffer as a 16-bit little-endian PCM WAV file
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let capacity = 44 + buffer.len() * buffer.num_channels() * BYTES_PER_SAMPLE;
    let mut cursor = Cursor::new(Vec::with_capacity(capacity));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in buffer.to_interleaved() {
            writer.write_sample(sample_to_i16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encode a buffer and write it to `path`
pub fn write_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    fs::write(path, encode_wav(buffer)?)?;
    Ok(())
}

// ============================================================================
// WAV import
// ============================================================================

/// Read a WAV file and convert it to the target rate and channel count
///
/// # Errors
/// * `InvalidAudio` - unreadable or empty file, or an unsupported bit depth
pub fn import_wav(path: &Path, target_rate: u32, target_channels: usize) -> Result<AudioBuffer> {
    let reader = WavReader::open(path).map_err(|e| EngineError::InvalidAudio {
        reason: format!("Failed to open WAV file {}: {}", path.display(), e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    if interleaved.is_empty() || channels == 0 {
        return Err(EngineError::InvalidAudio {
            reason: format!("{} contains no samples", path.display()),
            source: None,
        });
    }

    let channel_data = deinterleave(&interleaved, channels);
    let resampled = if spec.sample_rate != target_rate {
        resample_channels(&channel_data, spec.sample_rate, target_rate)
    } else {
        channel_data
    };

    AudioBuffer::from_channels(fit_channels(resampled, target_channels), target_rate)
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let scale = match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => None,
        (SampleFormat::Int, 8) => Some(128.0),
        (SampleFormat::Int, 16) => Some(32768.0),
        (SampleFormat::Int, 24) => Some(8388608.0),
        (SampleFormat::Int, 32) => Some(2147483648.0),
        (SampleFormat::Int, bits) => {
            return Err(EngineError::InvalidAudio {
                reason: format!("{}-bit integer audio is not supported", bits),
                source: None,
            })
        }
    };

    let samples = match scale {
        None => reader.samples::<f32>().collect::<std::result::Result<Vec<_>, _>>(),
        Some(scale) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / scale))
            .collect::<std::result::Result<Vec<_>, _>>(),
    };

    samples.map_err(|e| EngineError::InvalidAudio {
        reason: format!("Failed to read samples: {}", e),
        source: Some(Box::new(e)),
    })
}

/// De-interleave samples from [L,R,L,R,...] to [[L,L,...], [R,R,...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut result = vec![Vec::with_capacity(frames); channels];

    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            result[ch].push(*sample);
        }
    }

    result
}

/// Duplicate the last channel or drop extra channels to reach `target`
fn fit_channels(mut channels: Vec<Vec<f32>>, target: usize) -> Vec<Vec<f32>> {
    channels.truncate(target);
    while channels.len() < target {
        let last = channels.last().cloned().unwrap_or_default();
        channels.push(last);
    }
    channels
}

/// Resample audio channels to a different sample rate
fn resample_channels(channels: &[Vec<f32>], source_rate: u32, target_rate: u32) -> Vec<Vec<f32>> {
    let ratio = target_rate as f64 / source_rate as f64;

    channels
        .iter()
        .map(|channel| resample_linear(channel, ratio))
        .collect()
}

/// Linear interpolation resampling
fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else {
            samples[source_len - 1]
        };
        output.push(sample);
    }

    output
}

// ============================================================================
// Tests
// ============================================================================
