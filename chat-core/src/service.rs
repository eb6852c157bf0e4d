//! # Generation service
//!
//! The caller-facing surface over the decode pipeline:
//!
//! ```text
//! settings ─ map_settings ─┐
//!                          ├─ DecodeLoop::run ─ shape ─ (blocking: concatenate | streaming: ChatStream)
//! history ── assemble ─────┘
//! ```
//!
//! Blocking calls drain the shaped stream and append one assistant turn to the
//! history when generation reached the end of sequence. Streaming calls hand
//! the shaped stream to the caller and leave the history alone;
//! [`ChatStream::commit`] appends the finished text on request.

use chat_common::logging::Pretty;
use futures::stream::{FusedStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::ModelOptions;
use crate::decode::{DecodeLoop, DecodeStream, StepPool};
use crate::engine::InferenceEngine;
use crate::error::GenerationError;
use crate::mapper::{map_settings, EngineParams};
use crate::metadata::ServiceMetadata;
use crate::prompt::assemble;
use crate::settings::GenerationSettings;
use crate::shaper::{shape, ShapedStream};
use crate::types::{ChatCompletion, ConversationHistory, FinishReason, RequestId, TextCompletion};

/// Shaped text of one fully drained generation.
struct Drained {
    text: String,
    chunk_count: usize,
    finish_reason: FinishReason,
    elapsed: Duration,
}

/// Chat and raw-text generation over a single shared engine.
#[derive(Debug, Clone)]
pub struct GenerationService {
    metadata: ServiceMetadata,
    default_max_length: u32,
    decode_loop: DecodeLoop,
}

impl GenerationService {
    /// Build a service from validated startup options.
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        options: &ModelOptions,
    ) -> Result<Self, GenerationError> {
        let metadata = ServiceMetadata::from_options(options)?;
        if options.max_length == 0 {
            return Err(GenerationError::invalid_argument(
                "max_length",
                "must be greater than 0",
            ));
        }
        let pool = StepPool::new(options.step_workers)?;

        info!(
            "Generation service ready for model '{}' ({} step workers)",
            metadata.model_id(),
            pool.workers()
        );
        Ok(Self {
            metadata,
            default_max_length: options.max_length,
            decode_loop: DecodeLoop::new(engine, pool),
        })
    }

    pub fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }

    /// `max_length` applied to raw generations that omit `max_tokens`.
    pub fn default_max_length(&self) -> u32 {
        self.default_max_length
    }

    /// Generate the assistant's reply to `history` and append it as a new
    /// assistant turn.
    ///
    /// On cancellation the text produced so far is returned with
    /// [`FinishReason::Cancelled`] and the history is left untouched, as it is
    /// on failure. Only a reply that reached the end of sequence is recorded.
    pub async fn generate(
        &self,
        history: &mut ConversationHistory,
        settings: &GenerationSettings,
        cancel: CancellationToken,
    ) -> Result<ChatCompletion, GenerationError> {
        trace!(
            "Chat completion started with message: {:?}",
            history.last_user_message()
        );

        let prompt = assemble(history);
        let params = map_settings(settings);
        debug!("Engine params: {}", Pretty(&params));

        let drained = self
            .drain(prompt.clone(), params, cancel)
            .await
            .inspect_err(|e| error!("Chat completion failed for prompt {:?}: {}", prompt, e))?;

        if drained.finish_reason == FinishReason::EndOfSequence {
            history.add_assistant_message(drained.text.clone());
            trace!("Chat completion succeeded");
        } else {
            debug!(
                "Chat completion cancelled; partial reply of {} chunks not added to history",
                drained.chunk_count
            );
        }

        Ok(ChatCompletion {
            text: drained.text,
            chunk_count: drained.chunk_count,
            finish_reason: drained.finish_reason,
            elapsed: drained.elapsed,
        })
    }

    /// Stream the assistant's reply to `history` chunk by chunk.
    ///
    /// The history is not modified; see [`ChatStream::commit`].
    pub fn stream(
        &self,
        history: &ConversationHistory,
        settings: &GenerationSettings,
        cancel: CancellationToken,
    ) -> ChatStream {
        trace!(
            "Streaming chat completion started with message: {:?}",
            history.last_user_message()
        );

        let prompt = assemble(history);
        let params = map_settings(settings);
        debug!("Engine params: {}", Pretty(&params));

        let decode = self.decode_loop.run(prompt.clone(), params, cancel);
        ChatStream {
            inner: shape(decode),
            prompt,
            text: String::new(),
            chunk_count: 0,
            failed: false,
            committed: false,
        }
    }

    /// Generate a continuation of `input` with no chat template.
    ///
    /// `max_tokens` falls back to the configured default length.
    pub async fn generate_text(
        &self,
        input: &str,
        settings: &GenerationSettings,
        cancel: CancellationToken,
    ) -> Result<TextCompletion, GenerationError> {
        trace!("Text generation started for input: {:?}", input);

        let params = map_settings(&self.with_default_length(settings));
        debug!("Engine params: {}", Pretty(&params));

        let drained = self
            .drain(input.to_string(), params, cancel)
            .await
            .inspect_err(|e| error!("Text generation failed for input {:?}: {}", input, e))?;

        trace!(
            "Text generation finished with {} chunks ({:?})",
            drained.chunk_count,
            drained.finish_reason
        );
        Ok(TextCompletion {
            text: drained.text,
            chunk_count: drained.chunk_count,
            finish_reason: drained.finish_reason,
            elapsed: drained.elapsed,
        })
    }

    fn with_default_length(&self, settings: &GenerationSettings) -> GenerationSettings {
        let mut settings = settings.clone();
        if settings.max_tokens.is_none() {
            let max_length = i32::try_from(self.default_max_length).unwrap_or(i32::MAX);
            settings.max_tokens = Some(max_length);
        }
        settings
    }

    async fn drain(
        &self,
        prompt: String,
        params: EngineParams,
        cancel: CancellationToken,
    ) -> Result<Drained, GenerationError> {
        let started = Instant::now();
        let mut shaped = shape(self.decode_loop.run(prompt, params, cancel));

        let mut text = String::new();
        let mut chunk_count = 0;
        while let Some(chunk) = shaped.next().await {
            text.push_str(&chunk?);
            chunk_count += 1;
        }

        let finish_reason = shaped
            .get_ref()
            .finish_reason()
            .unwrap_or(FinishReason::EndOfSequence);
        if finish_reason == FinishReason::Cancelled {
            debug!("Generation cancelled after {} chunks", chunk_count);
        }

        Ok(Drained {
            text,
            chunk_count,
            finish_reason,
            elapsed: started.elapsed(),
        })
    }
}

/// Shaped chunks of a streaming chat completion.
///
/// Yields each chunk as it is decoded and keeps the concatenated text. An
/// engine failure is yielded once, after which the stream ends.
pub struct ChatStream {
    inner: ShapedStream<DecodeStream>,
    prompt: String,
    text: String,
    chunk_count: usize,
    failed: bool,
    committed: bool,
}

impl ChatStream {
    pub fn request_id(&self) -> RequestId {
        self.inner.get_ref().request_id()
    }

    /// Text streamed so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Set once the stream has ended without an error.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        if self.failed {
            None
        } else {
            self.inner.get_ref().finish_reason()
        }
    }

    /// Append the streamed text to `history` as an assistant turn.
    ///
    /// Only a stream that reached the end of sequence is committed, and only
    /// once; failed and cancelled streams leave the history untouched.
    /// Returns whether a turn was appended.
    pub fn commit(&mut self, history: &mut ConversationHistory) -> bool {
        if self.committed || self.finish_reason() != Some(FinishReason::EndOfSequence) {
            return false;
        }
        history.add_assistant_message(self.text.clone());
        self.committed = true;
        true
    }
}

impl Stream for ChatStream {
    type Item = Result<String, GenerationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);

        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                this.text.push_str(chunk);
                this.chunk_count += 1;
            }
            Poll::Ready(Some(Err(e))) => {
                this.failed = true;
                error!(
                    "Streaming chat completion failed for prompt {:?}: {}",
                    this.prompt, e
                );
            }
            Poll::Ready(None) if !this.failed => {
                trace!(
                    "Streaming chat completion succeeded ({:?}, {} chunks)",
                    this.inner.get_ref().finish_reason(),
                    this.chunk_count
                );
            }
            _ => {}
        }
        polled
    }
}

impl FusedStream for ChatStream {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("request_id", &self.request_id())
            .field("chunk_count", &self.chunk_count)
            .field("finish_reason", &self.finish_reason())
            .finish_non_exhaustive()
    }
}
