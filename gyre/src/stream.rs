//! Writing lazily produced streams through a pipeline.
//!
//! A [`ChunkedInput`] yields its payload in slices instead of one large
//! allocation. [`ChunkedWriteHandler`] sits on the outbound path and
//! drains each offered input into byte messages no larger than its chunk
//! size, so a multi-megabyte stream never occupies more than one chunk of
//! memory inside the pipeline.

use std::io::{self, Read};

use bytes::Bytes;

use crate::buffer::HolderKind;
use crate::handler::{Handler, HandlerContext};

/// A pull-based chunk producer.
pub trait ChunkedInput: 'static {
    /// Produces the next chunk, at most `max_len` bytes. `Ok(None)` means
    /// no chunk is available right now; combined with
    /// [`is_end_of_input`](Self::is_end_of_input) it signals exhaustion.
    fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>>;

    /// Whether the producer has nothing further to offer.
    fn is_end_of_input(&self) -> bool;
}

/// Adapts any [`Read`] into a [`ChunkedInput`].
pub struct ChunkedStream<R> {
    reader: R,
    done: bool,
}

impl<R: Read + 'static> ChunkedStream<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: Read + 'static> ChunkedInput for ChunkedStream<R> {
    fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; max_len];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            self.done = true;
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    fn is_end_of_input(&self) -> bool {
        self.done
    }
}

/// Outbound message wrapper carrying a chunk producer into the pipeline.
pub struct ChunkedPayload(pub Box<dyn ChunkedInput>);

impl ChunkedPayload {
    /// Wraps `input` for writing into a pipeline.
    pub fn new(input: impl ChunkedInput) -> Self {
        Self(Box::new(input))
    }
}

const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Drains [`ChunkedPayload`] messages from the outbound path into byte
/// slices of at most the configured chunk size. Inputs offered while a
/// previous one is still draining are queued and emitted strictly in
/// offer order. Other outbound messages pass through unchanged, and the
/// inbound path is untouched.
pub struct ChunkedWriteHandler {
    chunk_size: usize,
    queue: std::collections::VecDeque<Box<dyn ChunkedInput>>,
}

impl Default for ChunkedWriteHandler {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkedWriteHandler {
    /// Creates a handler emitting chunks of at most `chunk_size` bytes.
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            chunk_size,
            queue: std::collections::VecDeque::new(),
        }
    }

    /// Pulls every queued input dry, pushing its chunks toward the sink.
    fn drain_queue(&mut self, ctx: &HandlerContext) -> io::Result<bool> {
        let mut produced = false;
        while let Some(input) = self.queue.front_mut() {
            loop {
                match input.read_chunk(self.chunk_size)? {
                    Some(chunk) => {
                        ctx.next_outbound().push(Box::new(chunk));
                        produced = true;
                    }
                    None => break,
                }
            }
            if input.is_end_of_input() {
                self.queue.pop_front();
            } else {
                // Producer is not exhausted but has nothing right now; it
                // will be re-polled on the next outbound fire.
                break;
            }
        }
        Ok(produced)
    }
}

impl Handler for ChunkedWriteHandler {
    fn name(&self) -> &str {
        "chunked-write-handler"
    }

    fn inbound_kind(&self) -> HolderKind {
        HolderKind::Bytes
    }

    fn outbound_kind(&self) -> HolderKind {
        HolderKind::Messages
    }

    fn inbound_updated(&mut self, ctx: &HandlerContext) {
        ctx.forward_inbound();
        ctx.fire_inbound_updated();
    }

    fn outbound_updated(&mut self, ctx: &HandlerContext) {
        loop {
            let msg = match ctx.outbound().pop_message() {
                Some(msg) => msg,
                None => break,
            };
            match msg.downcast::<ChunkedPayload>() {
                Ok(payload) => self.queue.push_back(payload.0),
                Err(msg) => {
                    // Not ours; let it continue toward the sink.
                    ctx.next_outbound().push(msg);
                }
            }
        }
        match self.drain_queue(ctx) {
            Ok(_) => ctx.fire_outbound_updated(),
            Err(err) => {
                self.queue.pop_front();
                ctx.fire_exception_caught(Box::new(err));
            }
        }
    }
}
