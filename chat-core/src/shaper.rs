//! Output shaping for decoded chunks.
//!
//! The tokenizer often starts the first generated token with a word-boundary
//! space. Only that one space is removed; every later chunk passes verbatim.

use futures::stream::{FusedStream, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::decode::{ChunkPosition, TextChunk};
use crate::error::GenerationError;

/// Text of `chunk` after shaping.
pub fn shape_chunk(chunk: TextChunk) -> String {
    let TextChunk { text, position, .. } = chunk;
    if position == ChunkPosition::First {
        if let Some(rest) = text.strip_prefix(' ') {
            return rest.to_string();
        }
    }
    text
}

/// Wrap a chunk stream so it yields shaped text.
pub fn shape<S>(chunks: S) -> ShapedStream<S>
where
    S: Stream<Item = Result<TextChunk, GenerationError>> + Unpin,
{
    ShapedStream { inner: chunks }
}

/// Stream adapter returned by [`shape`].
#[derive(Debug)]
pub struct ShapedStream<S> {
    inner: S,
}

impl<S> ShapedStream<S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Stream for ShapedStream<S>
where
    S: Stream<Item = Result<TextChunk, GenerationError>> + Unpin,
{
    type Item = Result<String, GenerationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner)
            .poll_next(cx)
            .map(|item| item.map(|chunk| chunk.map(shape_chunk)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> FusedStream for ShapedStream<S>
where
    S: FusedStream<Item = Result<TextChunk, GenerationError>> + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
