//! Command handlers for the `chat` binary.
//!
//! Handlers write generated text to any [`Write`] so they can be driven from
//! tests without a terminal.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_common::config::ValidatedConfig;
use chat_core::{
    ConversationHistory, FinishReason, GenerationService, GenerationSettings, ModelOptions,
    RecordedEngine,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod cli;

pub use cli::{Cli, Commands, SamplingArgs};

impl SamplingArgs {
    pub fn to_settings(&self) -> GenerationSettings {
        GenerationSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            ..Default::default()
        }
    }

    /// Cancellation token, armed with the timeout when one was given.
    fn cancellation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(secs) = self.timeout_secs {
            chat_common::cancel_after(token.clone(), Duration::from_secs(secs));
        }
        token
    }
}

/// Build the generation service for a parsed command line.
///
/// The fixture path stands in for the model path when the options name none.
pub fn build_service(config: Option<&Path>, fixture: &Path) -> Result<GenerationService> {
    let mut options = ModelOptions::extract(config)?;
    if options.model_path.as_os_str().is_empty() {
        options.model_path = fixture.to_path_buf();
    }
    options.validate()?;

    let engine = RecordedEngine::from_file(fixture)
        .with_context(|| format!("loading fixture {}", fixture.display()))?;
    Ok(GenerationService::new(Arc::new(engine), &options)?)
}

/// Run one parsed command, writing generated text to `out`.
pub async fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let service = build_service(cli.config.as_deref(), &cli.fixture)?;
    info!("Using model '{}'", service.metadata().model_id());

    match cli.command {
        Commands::Generate { input, sampling } => run_generate(&service, &input, &sampling, out).await,
        Commands::Chat {
            message,
            system,
            stream,
            sampling,
        } => {
            let mut history = ConversationHistory::new();
            if let Some(system) = system {
                history.add_system_message(system);
            }
            history.add_user_message(message);

            if stream {
                run_chat_streaming(&service, &mut history, &sampling, out).await
            } else {
                run_chat(&service, &mut history, &sampling, out).await
            }
        }
    }
}

pub async fn run_generate(
    service: &GenerationService,
    input: &str,
    sampling: &SamplingArgs,
    out: &mut impl Write,
) -> Result<()> {
    let completion = service
        .generate_text(input, &sampling.to_settings(), sampling.cancellation())
        .await?;

    writeln!(out, "{}", completion.text)?;
    report_finish(completion.finish_reason, completion.chunk_count, completion.elapsed);
    Ok(())
}

pub async fn run_chat(
    service: &GenerationService,
    history: &mut ConversationHistory,
    sampling: &SamplingArgs,
    out: &mut impl Write,
) -> Result<()> {
    let completion = service
        .generate(history, &sampling.to_settings(), sampling.cancellation())
        .await?;

    writeln!(out, "{}", completion.text)?;
    report_finish(completion.finish_reason, completion.chunk_count, completion.elapsed);
    Ok(())
}

/// Print chunks as they arrive, then commit the reply to `history`.
pub async fn run_chat_streaming(
    service: &GenerationService,
    history: &mut ConversationHistory,
    sampling: &SamplingArgs,
    out: &mut impl Write,
) -> Result<()> {
    let started = std::time::Instant::now();
    let mut stream = service.stream(history, &sampling.to_settings(), sampling.cancellation());

    while let Some(chunk) = stream.next().await {
        write!(out, "{}", chunk?)?;
        out.flush()?;
    }
    writeln!(out)?;

    if stream.commit(history) {
        debug!("Committed streamed reply; history has {} turns", history.len());
    }
    if let Some(reason) = stream.finish_reason() {
        report_finish(reason, stream.chunk_count(), started.elapsed());
    }
    Ok(())
}

fn report_finish(reason: FinishReason, chunks: usize, elapsed: Duration) {
    match reason {
        FinishReason::Cancelled => eprintln!("(generation cancelled after {} tokens)", chunks),
        FinishReason::EndOfSequence => debug!("Generated {} tokens in {:?}", chunks, elapsed),
    }
}
