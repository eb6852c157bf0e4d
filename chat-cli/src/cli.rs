//! CLI definition for the `chat` command.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Local chat generation
///
/// Runs the generation pipeline against a recorded engine fixture.
#[derive(Parser, Debug)]
#[command(name = "chat")]
#[command(version)]
#[command(about = "Generate text or chat replies with a local model")]
pub struct Cli {
    /// Enable debug output to stderr
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Model options file (YAML, TOML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Recorded engine fixture (JSON) to play back
    #[arg(short, long, value_name = "FILE")]
    pub fixture: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Continue raw input text, without a chat template
    Generate {
        /// Input text
        input: String,

        #[command(flatten)]
        sampling: SamplingArgs,
    },
    /// Reply to a single user message
    Chat {
        /// User message
        message: String,

        /// System message placed before the user message
        #[arg(long)]
        system: Option<String>,

        /// Print chunks as they are generated
        #[arg(long)]
        stream: bool,

        #[command(flatten)]
        sampling: SamplingArgs,
    },
}

/// Sampling flags shared by both commands.
#[derive(Args, Debug, Clone, Default)]
pub struct SamplingArgs {
    /// Maximum sequence length, prompt included
    #[arg(long)]
    pub max_tokens: Option<i32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub top_k: Option<i32>,

    /// Cancel generation after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}
