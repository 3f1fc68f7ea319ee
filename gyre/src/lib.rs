//! # Gyre - Channel/Pipeline Networking Runtime
//!
//! `gyre` is a non-blocking networking runtime for Rust built around three
//! ideas: a **single-threaded event loop** that serializes all work for a
//! set of channels, a **channel** abstraction representing one transport
//! endpoint, and a **pipeline** of handlers through which inbound bytes
//! ascend and outbound messages descend.
//!
//! ## Core Concepts
//!
//! ### Event Loop
//!
//! An [`EventLoop`] owns exactly one worker thread, started lazily on the
//! first submission. Tasks submitted with [`EventLoop::execute`] run in
//! FIFO order on that thread; delayed and periodic tasks are admitted with
//! [`EventLoop::schedule`], [`EventLoop::schedule_at_fixed_rate`] and
//! [`EventLoop::schedule_with_fixed_delay`]. Shutdown is orderly: accepted
//! tasks still run, a cleanup hook runs exactly once, and
//! [`EventLoop::await_termination`] observes the end of the lifecycle.
//!
//! ### Channel
//!
//! A [`Channel`] is a cheap cloneable handle to a transport endpoint bound
//! to exactly one event loop. All channel state lives on the loop thread;
//! operations invoked from other threads are bounced through the loop's
//! queue as tagged operations and complete a [`Completion`] token. Server
//! channels reject `connect`/`disconnect`/`flush` and discard outbound
//! traffic.
//!
//! ### Pipeline
//!
//! A [`Pipeline`] is an ordered chain of [`Handler`]s. Each handler
//! declares the buffer kind it consumes per direction; the pipeline
//! allocates a matching [`BufferHolder`] for each. Handlers never block:
//! they consume their buffer, push into the neighbouring context's buffer,
//! and fire the next handler awake.
//!
//! ## Example: a passthrough pipeline
//!
//! ```
//! use gyre::{Handler, HandlerContext, HolderKind, Pipeline};
//!
//! struct Upper;
//!
//! impl Handler for Upper {
//!     fn name(&self) -> &str {
//!         "upper"
//!     }
//!
//!     fn inbound_kind(&self) -> HolderKind {
//!         HolderKind::Bytes
//!     }
//!
//!     fn inbound_updated(&mut self, ctx: &HandlerContext) {
//!         let data = ctx.inbound().take_bytes();
//!         let upper: Vec<u8> = data.iter().map(|b| b.to_ascii_uppercase()).collect();
//!         if let Some(mut next) = ctx.next_inbound() {
//!             next.push(Box::new(upper));
//!         }
//!         ctx.fire_inbound_updated();
//!     }
//! }
//!
//! let pipeline = Pipeline::new();
//! pipeline.add_back(Upper);
//! pipeline.finalize();
//! pipeline.feed_inbound_bytes(b"hello");
//! ```
//!
//! ## Threading Model
//!
//! Everything attached to one event loop is single-threaded: pipelines,
//! handlers, buffer holders and codec state need no locks because only the
//! loop's worker touches them. The cross-thread surface is the loop's
//! submission queue and the [`Completion`] tokens it completes.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod buffer;
pub(crate) mod channel;
pub(crate) mod completion;
pub(crate) mod error;
pub(crate) mod event_loop;
pub(crate) mod handler;
pub(crate) mod misuse;
pub(crate) mod pipeline;
pub(crate) mod stream;
pub(crate) mod transport;

/// Directional buffer variants and their kind discriminant.
pub use buffer::{BufferHolder, HolderKind};
/// Channel handle and the feed used by I/O producers.
pub use channel::{Channel, ChannelFeed};
/// One-shot completion tokens.
pub use completion::Completion;
/// Error taxonomy shared by loops, channels and pipelines.
pub use error::{Error, Result};
/// Single-threaded executor with deadline scheduling.
pub use event_loop::{EventLoop, EventLoopBuilder, ScheduledHandle};
/// Handler trait and per-handler pipeline context.
pub use handler::{Handler, HandlerContext};
/// Shared-resource instance counting.
pub use misuse::MisuseDetector;
/// Ordered handler chain.
pub use pipeline::Pipeline;
/// Chunked producers and the outbound handler that drains them.
pub use stream::{ChunkedInput, ChunkedPayload, ChunkedStream, ChunkedWriteHandler};
/// Transport capability record and the in-memory test transport.
pub use transport::{EmbeddedProbe, EmbeddedTransport, Transport};
