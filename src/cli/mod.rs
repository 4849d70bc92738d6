//! CLI Module
//!
//! Command-line interface for running the playback engine headless.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// PromptDJ - real-time generative music playback
#[derive(Parser, Debug)]
#[command(name = "promptdj")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file (defaults plus PROMPTDJ_* overrides otherwise)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play prompts through the engine and write the master output to WAV
    #[command(name = "render")]
    Render(RenderArgs),

    /// Print the effective configuration as JSON
    #[command(name = "show-config")]
    ShowConfig,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RenderArgs {
    /// Output WAV file for the master bus
    #[arg(short, long)]
    pub output: PathBuf,

    /// Seconds of audio to render
    #[arg(short, long, default_value_t = 10.0)]
    pub seconds: f64,

    /// Prompt as "text:weight" (weight defaults to 1)
    #[arg(short, long = "prompt", required = true)]
    pub prompts: Vec<String>,

    /// Skip the generation backend and play local loops
    #[arg(long)]
    pub offline: bool,

    /// Directory of "<prompt text>.wav" fallback loops
    #[arg(long)]
    pub assets: Option<PathBuf>,

    /// Terms the demo backend reports as filtered
    #[arg(long = "block")]
    pub blocked: Vec<String>,

    /// Distortion amount (0-1)
    #[arg(long, default_value_t = 0.0)]
    pub distortion: f32,

    /// Delay wet level (0-1)
    #[arg(long, default_value_t = 0.0)]
    pub delay: f32,

    /// Reverb wet level (0-1)
    #[arg(long, default_value_t = 0.0)]
    pub reverb: f32,

    /// Master volume (0-1)
    #[arg(long)]
    pub volume: Option<f32>,

    /// JSON list of timed commands, e.g. [{"at": 3.0, "command": "pause"}]
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Also record the decoded stream to this WAV file
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Frames per render block
    #[arg(long, default_value_t = 1024)]
    pub block: usize,
}
