//! # Decode loop
//!
//! Drives token-by-token generation for one request:
//!
//! 1. encode the prompt and open a [`GenerationSession`] (on a step worker)
//! 2. while the session is not done: check cancellation, run one step on a
//!    step worker, take exactly the newest token, decode it, emit a chunk
//! 3. release the session on every exit path
//!
//! [`DecodeStream`] is lazy: step *n + 1* is only submitted when the consumer
//! polls again after receiving chunk *n*. The session is moved into the worker
//! for the step and handed back with the result, so no two steps of one
//! session are ever in flight together. Cancellation is observed only between
//! steps; a step that already started is allowed to finish and its chunk is
//! delivered. A step still waiting for a free worker when the token fires
//! never starts.
//!
//! [`GenerationSession`]: crate::engine::GenerationSession

use futures::future::BoxFuture;
use futures::stream::{FusedStream, Stream};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::engine::{EngineError, InferenceEngine};
use crate::error::GenerationError;
use crate::mapper::EngineParams;
use crate::types::{FinishReason, RequestId};

pub mod pool;
pub mod session;

pub use pool::StepPool;
pub use session::ActiveSession;

/// Whether a chunk is the first one emitted for its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    First,
    Subsequent,
}

/// Decoded text for exactly one generated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub position: ChunkPosition,
    /// 0-based index of this chunk within its session.
    pub index: usize,
}

impl TextChunk {
    pub fn new(text: impl Into<String>, index: usize) -> Self {
        let position = if index == 0 {
            ChunkPosition::First
        } else {
            ChunkPosition::Subsequent
        };
        Self {
            text: text.into(),
            position,
            index,
        }
    }

    pub fn is_first(&self) -> bool {
        self.position == ChunkPosition::First
    }
}

type OpenFuture = BoxFuture<'static, Result<Result<ActiveSession, EngineError>, GenerationError>>;
/// Resolves to `None` when the step was abandoned by cancellation before it
/// started; the session has then already been released.
type StepFuture = BoxFuture<
    'static,
    Result<Option<(ActiveSession, Result<String, EngineError>)>, GenerationError>,
>;

/// Runs decode loops against a shared engine.
#[derive(Clone)]
pub struct DecodeLoop {
    engine: Arc<dyn InferenceEngine>,
    pool: StepPool,
}

impl DecodeLoop {
    pub fn new(engine: Arc<dyn InferenceEngine>, pool: StepPool) -> Self {
        Self { engine, pool }
    }

    pub fn pool(&self) -> &StepPool {
        &self.pool
    }

    /// Start generating for `prompt`. Nothing runs until the stream is polled.
    pub fn run(&self, prompt: String, params: EngineParams, cancel: CancellationToken) -> DecodeStream {
        let request_id = RequestId::new();
        debug!(
            "Request {}: starting decode loop ({} prompt bytes, {} engine options)",
            request_id,
            prompt.len(),
            params.len()
        );

        let engine = Arc::clone(&self.engine);
        let opening: OpenFuture = self.pool.submit(move || -> Result<ActiveSession, EngineError> {
            let encoded = engine.encode(&prompt)?;
            trace!("Encoded prompt into {} tokens", encoded.len());
            let session = engine.new_session(encoded, &params)?;
            Ok(ActiveSession::new(session))
        });

        DecodeStream {
            request_id,
            state: DecodeState::Opening(opening),
            engine: Arc::clone(&self.engine),
            pool: self.pool.clone(),
            cancel,
            emitted: 0,
            finish_reason: None,
            started: Instant::now(),
        }
    }
}

impl std::fmt::Debug for DecodeLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeLoop")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

enum DecodeState {
    Opening(OpenFuture),
    Ready(ActiveSession),
    Stepping(StepFuture),
    Finished,
}

/// Finite, non-restartable stream of [`TextChunk`]s for one request.
///
/// Ends with `None` when the engine reports done or cancellation is observed.
/// An engine failure is yielded once as `Err(GenerationError::GenerationFailed)`
/// and then the stream ends; chunks already yielded stand.
pub struct DecodeStream {
    request_id: RequestId,
    state: DecodeState,
    engine: Arc<dyn InferenceEngine>,
    pool: StepPool,
    cancel: CancellationToken,
    emitted: usize,
    finish_reason: Option<FinishReason>,
    started: Instant,
}

impl DecodeStream {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Why the stream ended. `None` while running or after a failure.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Number of chunks yielded so far.
    pub fn chunks_emitted(&self) -> usize {
        self.emitted
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn finish(&mut self, reason: FinishReason) {
        debug!(
            "Request {}: decode loop finished ({:?}) after {} chunks in {:?}",
            self.request_id,
            reason,
            self.emitted,
            self.started.elapsed()
        );
        self.finish_reason = Some(reason);
        self.state = DecodeState::Finished;
    }

    fn fail(&mut self, err: GenerationError) -> Poll<Option<Result<TextChunk, GenerationError>>> {
        error!(
            "Request {}: decode loop failed after {} chunks: {}",
            self.request_id, self.emitted, err
        );
        self.state = DecodeState::Finished;
        Poll::Ready(Some(Err(err)))
    }

    fn submit_step(&self, session: ActiveSession) -> StepFuture {
        let engine = Arc::clone(&self.engine);
        self.pool.submit_unless_cancelled(self.cancel.clone(), move || {
            let mut session = session;
            let text = session
                .step()
                .and_then(|()| session.newest_token())
                .and_then(|token| engine.decode(&[token]));
            (session, text)
        })
    }
}

impl Stream for DecodeStream {
    type Item = Result<TextChunk, GenerationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match std::mem::replace(&mut this.state, DecodeState::Finished) {
                DecodeState::Opening(mut opening) => match opening.as_mut().poll(cx) {
                    Poll::Pending => {
                        this.state = DecodeState::Opening(opening);
                        return Poll::Pending;
                    }
                    Poll::Ready(Ok(Ok(session))) => {
                        trace!("Request {}: session opened", this.request_id);
                        this.state = DecodeState::Ready(session);
                    }
                    Poll::Ready(Ok(Err(engine_error))) => {
                        return this.fail(GenerationError::GenerationFailed(engine_error));
                    }
                    Poll::Ready(Err(worker_error)) => return this.fail(worker_error),
                },
                DecodeState::Ready(session) => {
                    if session.is_done() {
                        drop(session);
                        this.finish(FinishReason::EndOfSequence);
                        return Poll::Ready(None);
                    }
                    if this.cancel.is_cancelled() {
                        drop(session);
                        this.finish(FinishReason::Cancelled);
                        return Poll::Ready(None);
                    }
                    this.state = DecodeState::Stepping(this.submit_step(session));
                }
                DecodeState::Stepping(mut stepping) => match stepping.as_mut().poll(cx) {
                    Poll::Pending => {
                        this.state = DecodeState::Stepping(stepping);
                        return Poll::Pending;
                    }
                    Poll::Ready(Ok(None)) => {
                        debug!(
                            "Request {}: cancelled while waiting for a step worker",
                            this.request_id
                        );
                        this.finish(FinishReason::Cancelled);
                        return Poll::Ready(None);
                    }
                    Poll::Ready(Ok(Some((session, Ok(text))))) => {
                        let chunk = TextChunk::new(text, this.emitted);
                        trace!(
                            "Request {}: chunk {} = {:?}",
                            this.request_id,
                            chunk.index,
                            chunk.text
                        );
                        this.emitted += 1;
                        this.state = DecodeState::Ready(session);
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Poll::Ready(Ok(Some((session, Err(engine_error))))) => {
                        drop(session);
                        return this.fail(GenerationError::GenerationFailed(engine_error));
                    }
                    Poll::Ready(Err(worker_error)) => return this.fail(worker_error),
                },
                DecodeState::Finished => return Poll::Ready(None),
            }
        }
    }
}

impl FusedStream for DecodeStream {
    fn is_terminated(&self) -> bool {
        matches!(self.state, DecodeState::Finished)
    }
}
