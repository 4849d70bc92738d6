//! Recorder
//!
//! Taps decoded buffers on their way into the scheduler while active, then
//! concatenates them and encodes a 16-bit PCM WAV file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::engine::buffer::AudioBuffer;
use crate::engine::codec::encode_wav;
use crate::error::{EngineError, Result};

/// A finished recording ready for download
#[derive(Debug, Clone)]
pub struct Recording {
    /// Suggested download name, `promptdj-<timestamp>.wav`
    pub file_name: String,
    /// Complete WAV file
    pub bytes: Vec<u8>,
    pub frames: usize,
    pub channels: usize,
    pub sample_rate: u32,
}

impl Recording {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Write the file into `dir` under its suggested name
    pub fn save_in(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.file_name);
        fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    active: bool,
    buffers: Vec<AudioBuffer>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn captured_len(&self) -> usize {
        self.buffers.len()
    }

    /// Start a fresh capture
    pub fn start(&mut self) {
        self.buffers.clear();
        self.active = true;
    }

    /// Append a buffer if recording
    pub fn capture(&mut self, buffer: &AudioBuffer) {
        if self.active {
            self.buffers.push(buffer.clone());
        }
    }

    /// Stop and throw the capture away
    pub fn discard(&mut self) {
        self.active = false;
        self.buffers.clear();
    }

    /// Stop, concatenate and encode
    ///
    /// The capture is cleared whether or not encoding succeeds; no partial
    /// file is produced on error.
    ///
    /// # Errors
    /// * `EmptyRecording` - nothing was captured
    /// * `RecordingFormatMismatch` - buffers disagree on channels or rate
    pub fn finish(&mut self) -> Result<Recording> {
        self.active = false;
        let buffers = std::mem::take(&mut self.buffers);

        let audio = concatenate(&buffers)?;
        let bytes = encode_wav(&audio)?;

        Ok(Recording {
            file_name: format!("promptdj-{}.wav", Local::now().format("%Y%m%d-%H%M%S")),
            bytes,
            frames: audio.len(),
            channels: audio.num_channels(),
            sample_rate: audio.sample_rate,
        })
    }
}

/// Join buffers sample-for-sample, failing fast on a format change
pub fn concatenate(buffers: &[AudioBuffer]) -> Result<AudioBuffer> {
    let (first, rest) = buffers.split_first().ok_or(EngineError::EmptyRecording)?;

    let total: usize = buffers.iter().map(AudioBuffer::len).sum();
    let mut joined = AudioBuffer {
        samples: first
            .samples
            .iter()
            .map(|ch| {
                let mut v = Vec::with_capacity(total);
                v.extend_from_slice(ch);
                v
            })
            .collect(),
        sample_rate: first.sample_rate,
    };

    for buffer in rest {
        joined.append(buffer)?;
    }

    if joined.is_empty() {
        return Err(EngineError::EmptyRecording);
    }
    Ok(joined)
}
