//! Fallback playback
//!
//! When the live backend cannot be reached the engine plays local loops,
//! one per known prompt text. Each loop's gain follows the weight of the
//! matching active prompt (`min(weight, 1)`), or 0 when nothing matches.

use std::collections::{BTreeMap, HashMap};
use std::f32::consts::PI;
use std::path::Path;
use std::sync::Arc;

use walkdir::WalkDir;

use crate::dsp::RampedParam;
use crate::engine::codec::import_wav;
use crate::engine::AudioBuffer;
use crate::error::{EngineError, Result};
use crate::session::prompt::ActivePrompt;

/// Loop length of synthesized assets
const SYNTH_LOOP_SECS: f32 = 2.0;

/// Notes per synthesized loop
const SYNTH_NOTES: usize = 4;

/// Scale the synthesized loops draw their notes from (A minor pentatonic)
const SCALE_HZ: [f32; 7] = [220.0, 261.63, 293.66, 329.63, 392.0, 440.0, 523.25];

// ============================================================================
// Asset Library
// ============================================================================

/// Looping audio keyed by prompt text
#[derive(Debug, Clone, Default)]
pub struct FallbackLibrary {
    assets: HashMap<String, Arc<AudioBuffer>>,
}

impl FallbackLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a loop; empty buffers are rejected
    pub fn insert(&mut self, text: impl Into<String>, buffer: AudioBuffer) -> Result<()> {
        let text = text.into();
        if buffer.is_empty() || buffer.num_channels() == 0 {
            return Err(EngineError::InvalidAudio {
                reason: format!("fallback loop for '{text}' is empty"),
                source: None,
            });
        }
        self.assets.insert(text, Arc::new(buffer));
        Ok(())
    }

    /// Load every `*.wav` under `dir`, keyed by file stem
    ///
    /// Files that fail to import are skipped with a warning.
    pub fn load_dir(dir: &Path, sample_rate: u32, channels: usize) -> Result<Self> {
        if !dir.is_dir() {
            return Err(EngineError::Config {
                reason: format!("fallback asset directory {} does not exist", dir.display()),
            });
        }

        let mut library = Self::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| EngineError::Io(e.into()))?;
            let path = entry.path();
            let is_wav = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            if !entry.file_type().is_file() || !is_wav {
                continue;
            }
            let Some(text) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            match import_wav(path, sample_rate, channels).and_then(|buffer| library.insert(text, buffer)) {
                Ok(()) => tracing::debug!(text, path = %path.display(), "fallback loop loaded"),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping fallback loop"),
            }
        }

        tracing::info!(count = library.len(), dir = %dir.display(), "fallback library loaded");
        Ok(library)
    }

    /// Procedural loops for the given texts
    pub fn synthesized<I, S>(texts: I, sample_rate: u32, channels: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let assets = texts
            .into_iter()
            .map(|text| {
                let text = text.into();
                let buffer = synthesize_loop(&text, sample_rate, channels);
                (text, Arc::new(buffer))
            })
            .collect();
        Self { assets }
    }

    pub fn get(&self, text: &str) -> Option<&Arc<AudioBuffer>> {
        self.assets.get(text)
    }

    /// Known texts, sorted
    pub fn texts(&self) -> Vec<&str> {
        let mut texts: Vec<&str> = self.assets.keys().map(String::as_str).collect();
        texts.sort_unstable();
        texts
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Four decaying plucks on notes picked from the text
fn synthesize_loop(text: &str, sample_rate: u32, channels: usize) -> AudioBuffer {
    let frames = (SYNTH_LOOP_SECS * sample_rate as f32) as usize;
    let note_frames = frames / SYNTH_NOTES;
    let seed = text
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));

    let mono: Vec<f32> = (0..frames)
        .map(|i| {
            let note = (i / note_frames.max(1)).min(SYNTH_NOTES - 1);
            let freq = SCALE_HZ[(seed + note * 2) % SCALE_HZ.len()];
            let t = i as f32 / sample_rate as f32;
            let local = (i % note_frames.max(1)) as f32 / sample_rate as f32;
            let envelope = (-6.0 * local).exp();
            let phase = 2.0 * PI * freq * t;
            0.3 * envelope * (phase.sin() + 0.25 * (2.0 * phase).sin())
        })
        .collect();

    AudioBuffer {
        samples: vec![mono; channels.max(1)],
        sample_rate,
    }
}

// ============================================================================
// Player
// ============================================================================

#[derive(Debug, Clone)]
struct Voice {
    text: String,
    buffer: Arc<AudioBuffer>,
    position: usize,
    gain: RampedParam,
}

/// Mixes the library's loops according to the active prompts
#[derive(Debug, Clone)]
pub struct FallbackPlayer {
    voices: Vec<Voice>,
    playing: bool,
    /// Set while voices ramp to silence before pausing or stopping
    release: Option<Release>,
}

/// What happens once a faded release reaches silence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Pause,
    Stop,
}

impl FallbackPlayer {
    /// One silent voice per library asset
    pub fn new(library: &FallbackLibrary, ramp_frames: usize) -> Self {
        let voices = library
            .texts()
            .into_iter()
            .filter_map(|text| {
                library.get(text).map(|buffer| Voice {
                    text: text.to_string(),
                    buffer: Arc::clone(buffer),
                    position: 0,
                    gain: RampedParam::new(0.0, ramp_frames),
                })
            })
            .collect();
        Self {
            voices,
            playing: false,
            release: None,
        }
    }

    pub fn play(&mut self) {
        self.playing = true;
        self.release = None;
    }

    pub fn pause(&mut self) {
        self.playing = false;
        self.release = None;
    }

    /// Pause and rewind every loop
    pub fn stop(&mut self) {
        self.playing = false;
        self.release = None;
        for voice in &mut self.voices {
            voice.position = 0;
            voice.gain.jump(0.0);
        }
    }

    /// Ramp every loop to silence over `frames`, then pause
    pub fn pause_over(&mut self, frames: usize) {
        self.begin_release(Release::Pause, frames);
    }

    /// Ramp every loop to silence over `frames`, then stop
    pub fn stop_over(&mut self, frames: usize) {
        self.begin_release(Release::Stop, frames);
    }

    fn begin_release(&mut self, release: Release, frames: usize) {
        if !self.playing || frames == 0 {
            self.finish_release(release);
            return;
        }
        for voice in &mut self.voices {
            voice.gain.set_target_over(0.0, frames);
        }
        self.release = Some(release);
    }

    fn finish_release(&mut self, release: Release) {
        match release {
            Release::Pause => self.pause(),
            Release::Stop => self.stop(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// True while a faded pause or stop is still audible
    pub fn is_releasing(&self) -> bool {
        self.release.is_some()
    }

    /// Retarget every loop's gain from the active prompts
    pub fn set_weighted_prompts(&mut self, prompts: &[ActivePrompt]) {
        for voice in &mut self.voices {
            let target = prompts
                .iter()
                .find(|p| p.text == voice.text)
                .map_or(0.0, |p| p.weight.min(1.0));
            voice.gain.set_target(target);
        }
    }

    /// Target gain per asset text
    pub fn gains(&self) -> BTreeMap<String, f32> {
        self.voices
            .iter()
            .map(|voice| (voice.text.clone(), voice.gain.target()))
            .collect()
    }

    pub fn gain(&self, text: &str) -> Option<f32> {
        self.voices
            .iter()
            .find(|voice| voice.text == text)
            .map(|voice| voice.gain.target())
    }

    /// Mix the next `out.len()` frames of every audible loop into `out`
    pub fn render(&mut self, out: &mut AudioBuffer) {
        if !self.playing {
            return;
        }
        let frames = out.len();

        for voice in &mut self.voices {
            let len = voice.buffer.len();
            if len == 0 {
                continue;
            }
            if voice.gain.is_settled() && voice.gain.value() == 0.0 {
                voice.position = (voice.position + frames) % len;
                continue;
            }

            let source_channels = voice.buffer.num_channels();
            for i in 0..frames {
                let gain = voice.gain.next();
                for (ch, dst) in out.samples.iter_mut().enumerate() {
                    let src = voice.buffer.channel(ch.min(source_channels - 1));
                    dst[i] += src[voice.position] * gain;
                }
                voice.position = (voice.position + 1) % len;
            }
        }

        if let Some(release) = self.release {
            let silent = self
                .voices
                .iter()
                .all(|voice| voice.gain.is_settled() && voice.gain.value() == 0.0);
            if silent {
                self.finish_release(release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::codec::write_wav;
    use pretty_assertions::assert_eq;

    fn prompt(text: &str, weight: f32) -> ActivePrompt {
        ActivePrompt {
            text: text.to_string(),
            weight,
        }
    }

    fn library() -> FallbackLibrary {
        FallbackLibrary::synthesized(["Bossa Nova", "Dubstep", "Sitar"], 8000, 2)
    }

    #[test]
    fn test_gains_follow_matching_prompts() {
        let mut player = FallbackPlayer::new(&library(), 0);
        player.set_weighted_prompts(&[prompt("Bossa Nova", 1.7), prompt("Sitar", 0.4), prompt("Unknown", 1.0)]);

        let expected: BTreeMap<String, f32> = [
            ("Bossa Nova".to_string(), 1.0),
            ("Dubstep".to_string(), 0.0),
            ("Sitar".to_string(), 0.4),
        ]
        .into_iter()
        .collect();
        assert_eq!(player.gains(), expected);
    }

    #[test]
    fn test_render_is_silent_until_played() {
        let mut player = FallbackPlayer::new(&library(), 0);
        player.set_weighted_prompts(&[prompt("Dubstep", 1.0)]);

        let mut out = AudioBuffer::silent(2, 800, 8000);
        player.render(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));

        player.play();
        player.render(&mut out);
        assert!(out.channel(0).iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_pause_over_keeps_sounding_until_silent() {
        let mut player = FallbackPlayer::new(&library(), 0);
        player.set_weighted_prompts(&[prompt("Dubstep", 1.0)]);
        player.play();
        let mut out = AudioBuffer::silent(2, 400, 8000);
        player.render(&mut out);

        player.pause_over(800);
        assert!(player.is_playing());
        assert!(player.is_releasing());

        let mut fade = AudioBuffer::silent(2, 800, 8000);
        player.render(&mut fade);
        assert!(fade.channel(0)[..400].iter().any(|&s| s != 0.0));
        assert_eq!(fade.channel(0)[799], 0.0);
        assert!(!player.is_playing());
        assert!(!player.is_releasing());
    }

    #[test]
    fn test_play_cancels_release() {
        let mut player = FallbackPlayer::new(&library(), 0);
        player.set_weighted_prompts(&[prompt("Sitar", 1.0)]);
        player.play();
        player.stop_over(800);

        player.set_weighted_prompts(&[prompt("Sitar", 1.0)]);
        player.play();
        assert!(!player.is_releasing());
        assert_eq!(player.gain("Sitar"), Some(1.0));
    }

    #[test]
    fn test_release_when_not_playing_is_immediate() {
        let mut player = FallbackPlayer::new(&library(), 0);
        player.stop_over(800);
        assert!(!player.is_releasing());
        assert!(!player.is_playing());
    }

    #[test]
    fn test_loops_wrap_around() {
        let mut lib = FallbackLibrary::new();
        lib.insert("tick", AudioBuffer::from_channels(vec![vec![1.0, 0.0, 0.0]], 8000).unwrap())
            .unwrap();
        let mut player = FallbackPlayer::new(&lib, 0);
        player.set_weighted_prompts(&[prompt("tick", 0.5)]);
        player.play();

        let mut out = AudioBuffer::silent(2, 7, 8000);
        player.render(&mut out);
        assert_eq!(out.channel(1), &[0.5, 0.0, 0.0, 0.5, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_stop_rewinds() {
        let mut lib = FallbackLibrary::new();
        lib.insert("tick", AudioBuffer::from_channels(vec![vec![1.0, 0.0, 0.0]], 8000).unwrap())
            .unwrap();
        let mut player = FallbackPlayer::new(&lib, 0);
        player.set_weighted_prompts(&[prompt("tick", 1.0)]);
        player.play();
        let mut out = AudioBuffer::silent(1, 2, 8000);
        player.render(&mut out);

        player.stop();
        assert!(!player.is_playing());
        assert_eq!(player.gain("tick"), Some(0.0));
    }

    #[test]
    fn test_insert_rejects_empty_loop() {
        let mut lib = FallbackLibrary::new();
        assert!(lib.insert("nothing", AudioBuffer::silent(2, 0, 8000)).is_err());
    }

    #[test]
    fn test_load_dir_keys_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let loop_buffer = AudioBuffer::from_channels(vec![vec![0.25; 400]], 8000).unwrap();
        write_wav(&loop_buffer, &dir.path().join("Lo-Fi Hip Hop.wav")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let lib = FallbackLibrary::load_dir(dir.path(), 16000, 2).unwrap();
        assert_eq!(lib.texts(), vec!["Lo-Fi Hip Hop"]);
        let asset = lib.get("Lo-Fi Hip Hop").unwrap();
        assert_eq!(asset.num_channels(), 2);
        assert_eq!(asset.sample_rate, 16000);
    }

    #[test]
    fn test_load_dir_missing_is_config_error() {
        let err = FallbackLibrary::load_dir(Path::new("/definitely/not/here"), 48000, 2).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }
}
