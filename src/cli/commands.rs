//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::RenderArgs;
use crate::config::EngineConfig;
use crate::engine::{write_wav, AudioBuffer, Clock, Engine, EngineCommand, ManualClock, PlaybackState};
use crate::error::{EngineError, Result};
use crate::session::{FallbackLibrary, Prompt, SessionConnector, SessionKind, ToneBackend, WeightedPromptSet};

/// One timed entry of a `--script` file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptStep {
    /// Timeline position in seconds
    pub at: f64,
    #[serde(flatten)]
    pub command: EngineCommand,
}

/// What a render run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub frames: usize,
    pub final_state: PlaybackState,
    pub session: Option<SessionKind>,
    pub recorded_frames: Option<usize>,
}

/// Load the configuration from a file, or defaults with env overrides.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::from_env(),
    }
}

/// Parse `"text:weight"`; a missing or non-numeric weight means 1.
pub fn parse_prompt(arg: &str) -> Result<Prompt> {
    let (text, weight) = match arg.rsplit_once(':') {
        Some((text, weight)) => match weight.trim().parse::<f32>() {
            Ok(weight) => (text, weight),
            Err(_) => (arg, 1.0),
        },
        None => (arg, 1.0),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::Config {
            reason: format!("prompt '{arg}' has no text"),
        });
    }
    Ok(Prompt::new(text, weight))
}

/// Read a script file, ordered by time.
pub fn load_script(path: &Path) -> Result<Vec<ScriptStep>> {
    let text = fs::read_to_string(path)?;
    let mut steps: Vec<ScriptStep> = serde_json::from_str(&text)?;
    steps.sort_by(|a, b| a.at.total_cmp(&b.at));
    Ok(steps)
}

fn fallback_library(config: &EngineConfig, args: &RenderArgs, prompts: &WeightedPromptSet) -> Result<FallbackLibrary> {
    match args.assets.as_deref().or(config.fallback_assets_dir.as_deref()) {
        Some(dir) => FallbackLibrary::load_dir(dir, config.sample_rate, config.channels),
        None => Ok(FallbackLibrary::synthesized(
            prompts.iter().map(|prompt| prompt.text.clone()),
            config.sample_rate,
            config.channels,
        )),
    }
}

fn build_connector(config: &EngineConfig, args: &RenderArgs, library: FallbackLibrary) -> SessionConnector {
    if args.offline {
        return SessionConnector::offline(library, config);
    }
    let backend = args
        .blocked
        .iter()
        .fold(ToneBackend::new(config.sample_rate, config.channels), |backend, term| {
            backend.block_term(term.as_str())
        });
    SessionConnector::new(Arc::new(backend), library, config)
}

/// Run the engine headless in real time and write the master output.
pub async fn render(config: EngineConfig, args: &RenderArgs) -> Result<RenderSummary> {
    if args.block == 0 || args.seconds.is_nan() || args.seconds <= 0.0 {
        return Err(EngineError::Config {
            reason: "render needs a positive block size and duration".to_string(),
        });
    }

    let prompts = args
        .prompts
        .iter()
        .map(String::as_str)
        .map(parse_prompt)
        .collect::<Result<WeightedPromptSet>>()?;
    let mut script = match &args.script {
        Some(path) => load_script(path)?,
        None => Vec::new(),
    }
    .into_iter()
    .peekable();

    let library = fallback_library(&config, args, &prompts)?;
    let connector = build_connector(&config, args, library);
    let clock = ManualClock::new();
    let sample_rate = config.sample_rate;
    let channels = config.channels;
    let mut engine = Engine::new(config, clock.clone(), connector)?;

    tracing::info!(
        prompts = prompts.len(),
        seconds = args.seconds,
        offline = args.offline,
        "rendering"
    );

    engine.set_distortion(args.distortion);
    engine.set_delay(args.delay);
    engine.set_reverb(args.reverb);
    if let Some(volume) = args.volume {
        engine.set_master_volume(volume);
    }
    engine.set_weighted_prompts(prompts);
    engine.play()?;

    let total_frames = (args.seconds * sample_rate as f64).round() as usize;
    let mut master = AudioBuffer::silent(channels, 0, sample_rate);
    let mut recording_requested = args.record.is_some();
    let mut recorded_frames = None;

    let block_duration = Duration::from_secs_f64(args.block as f64 / sample_rate as f64);
    let mut pace = tokio::time::interval(block_duration);

    while master.len() < total_frames {
        pace.tick().await;

        while let Some(step) = script.next_if(|step| step.at <= clock.now()) {
            match engine.apply(step.command) {
                Ok(Some(recording)) => {
                    recorded_frames = Some(recording.frames);
                    let path = match &args.record {
                        Some(path) => {
                            fs::write(path, &recording.bytes)?;
                            path.clone()
                        }
                        None => recording.save_in(Path::new("."))?,
                    };
                    println!("Recording saved: {}", path.display());
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(at = step.at, error = %err, "script command failed"),
            }
        }

        engine.drain();

        if recording_requested && engine.session_kind() == Some(SessionKind::Live) {
            recording_requested = false;
            if let Err(err) = engine.start_recording() {
                tracing::warn!(error = %err, "recording could not start");
            }
        }

        let frames = args.block.min(total_frames - master.len());
        let block = engine.render(frames);
        master.append(&block)?;
        clock.advance_frames(frames, sample_rate);
    }

    if engine.is_recording() {
        let recording = engine.stop_recording_and_download()?;
        recorded_frames = Some(recording.frames);
        if let Some(path) = &args.record {
            fs::write(path, &recording.bytes)?;
            println!("Recording saved: {}", path.display());
        }
    }

    let summary = RenderSummary {
        frames: master.len(),
        final_state: engine.state(),
        session: engine.session_kind(),
        recorded_frames,
    };
    engine.stop();

    write_wav(&master, &args.output)?;

    println!("Rendered: {}", args.output.display());
    println!(
        "Duration: {:.2}s | Session: {} | Final state: {:?}",
        master.duration_secs(),
        match summary.session {
            Some(SessionKind::Live) => "live",
            Some(SessionKind::Fallback) => "fallback",
            None => "none",
        },
        summary.final_state
    );

    Ok(summary)
}

/// Suggestions for a failed command, one per line.
pub fn recovery_hints(err: &EngineError) -> String {
    err.recovery_suggestions()
        .into_iter()
        .map(|hint| format!("  hint: {hint}\n"))
        .collect()
}

/// Print the effective configuration as JSON.
pub fn show_config(config: &EngineConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_prompt_with_weight() {
        let prompt = parse_prompt("Minimal Techno:0.5").unwrap();
        assert_eq!(prompt.text, "Minimal Techno");
        assert_eq!(prompt.weight, 0.5);
    }

    #[test]
    fn test_parse_prompt_without_weight() {
        let prompt = parse_prompt("Bossa Nova").unwrap();
        assert_eq!(prompt.text, "Bossa Nova");
        assert_eq!(prompt.weight, 1.0);
    }

    #[test]
    fn test_parse_prompt_colon_in_text() {
        let prompt = parse_prompt("ratio 3:2 polyrhythm").unwrap();
        assert_eq!(prompt.text, "ratio 3:2 polyrhythm");
        assert_eq!(prompt.weight, 1.0);
    }

    #[test]
    fn test_parse_empty_prompt_fails() {
        assert!(parse_prompt(" :1").is_err());
    }

    #[test]
    fn test_recovery_hints_for_config_error() {
        let err = EngineError::Config {
            reason: "channels must be 1 or 2".to_string(),
        };
        let hints = recovery_hints(&err);
        assert!(hints.starts_with("  hint: "));
        assert!(hints.contains("PROMPTDJ_"));
        assert!(recovery_hints(&EngineError::Backend { message: "x".into() }).is_empty());
    }

    #[test]
    fn test_script_steps_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        fs::write(
            &path,
            r#"[{"at": 2.0, "command": "pause"}, {"at": 0.5, "command": "set_reverb", "value": 0.3}]"#,
        )
        .unwrap();

        let steps = load_script(&path).unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep {
                    at: 0.5,
                    command: EngineCommand::SetReverb { value: 0.3 }
                },
                ScriptStep {
                    at: 2.0,
                    command: EngineCommand::Pause
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_render_writes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.wav");
        let args = RenderArgs {
            output: output.clone(),
            seconds: 0.25,
            prompts: vec!["Funk:1".to_string()],
            offline: true,
            assets: None,
            blocked: Vec::new(),
            distortion: 0.0,
            delay: 0.2,
            reverb: 0.0,
            volume: None,
            script: None,
            record: None,
            block: 1024,
        };

        let summary = render(EngineConfig::default(), &args).await.unwrap();

        assert_eq!(summary.frames, 12000);
        assert_eq!(summary.session, Some(SessionKind::Fallback));
        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 12000);
    }
}
