//! Handler trait and handler context.
//!
//! A [`Handler`] is one stage of a channel's pipeline. It declares the
//! kind of buffer it consumes in each direction and is woken with
//! [`inbound_updated`](Handler::inbound_updated) /
//! [`outbound_updated`](Handler::outbound_updated) whenever new data lands
//! in the matching buffer. A handler never blocks: it consumes what its
//! buffer holds, pushes results into the neighbouring context's buffer,
//! fires the corresponding primitive, and returns.
//!
//! ## Traversal
//!
//! ```text
//!                                                   | write()
//!   +-----------------------------------------------+-------------+
//!   |                       Pipeline                |             |
//!   |                                              \|/            |
//!   |   +---------+---------+-----------+-----------+--------+    |
//!   |   |                    Handler  N                      |    |
//!   |   +---------+---------+-----------+-----------+--------+    |
//!   |            /|\                                |             |
//!   |             |  fire_inbound_updated()         |  fire_outbound_updated()
//!   |             |                                \|/            |
//!   |   +---------+---------+-----------+-----------+--------+    |
//!   |   |                    Handler  1                      |    |
//!   |   +---------+---------+-----------+-----------+--------+    |
//!   |            /|\                                |             |
//!   +-------------+---------------------------------+-------------+
//!                 | inbound byte holder             | outbound sink
//!                 | (transport read)               \|/ (transport flush)
//! ```
//!
//! Inbound data ascends head→tail; outbound data descends tail→head and
//! finally lands in the channel's outbound sink holder, from where the
//! transport flushes it.
//!
//! ## Events
//!
//! Channel lifecycle events (`channel_active`, `channel_inactive`,
//! `exception_caught`, `user_event`) walk the inbound chain exactly once,
//! head to tail. The default implementations pass each event through
//! unchanged; override to intercept.

use std::any::Any;
use std::cell::{RefCell, RefMut};
use std::error::Error as StdError;
use std::rc::Rc;

use log::{trace, warn};

use crate::buffer::{transfer, BufferHolder, HolderKind};
use crate::pipeline::PipelineCore;

/// A single stage of a pipeline.
pub trait Handler: 'static {
    /// The handler's name, used for diagnostics and removal. Should be
    /// unique within a pipeline.
    fn name(&self) -> &str;

    /// Kind of the buffer this handler consumes on the inbound path.
    fn inbound_kind(&self) -> HolderKind {
        HolderKind::Messages
    }

    /// Kind of the buffer this handler consumes on the outbound path.
    fn outbound_kind(&self) -> HolderKind {
        HolderKind::Messages
    }

    /// The channel became active. Default: pass through.
    fn channel_active(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_active();
    }

    /// The channel became inactive. Default: pass through.
    fn channel_inactive(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_inactive();
    }

    /// An error travelled up the pipeline. Default: pass through; an
    /// exception that reaches the tail unhandled is logged.
    fn exception_caught(&mut self, ctx: &HandlerContext, cause: Box<dyn StdError>) {
        ctx.fire_exception_caught(cause);
    }

    /// An application-defined event travelled up the pipeline. Default:
    /// pass through.
    fn user_event(&mut self, ctx: &HandlerContext, event: Box<dyn Any>) {
        ctx.fire_user_event(event);
    }

    /// New data is available in this handler's inbound buffer.
    fn inbound_updated(&mut self, ctx: &HandlerContext);

    /// New data is available in this handler's outbound buffer. Default:
    /// move it unchanged toward the channel sink.
    fn outbound_updated(&mut self, ctx: &HandlerContext) {
        ctx.forward_outbound();
        ctx.fire_outbound_updated();
    }
}

/// A handler's view of its pipeline neighbourhood.
///
/// Contexts are constructed per invocation and hold only reference-counted
/// aliases of the pipeline arena; neighbours are addressed by index.
pub struct HandlerContext {
    pub(crate) pipeline: Rc<PipelineCore>,
    pub(crate) name: String,
    pub(crate) inbound: Rc<RefCell<BufferHolder>>,
    pub(crate) outbound: Rc<RefCell<BufferHolder>>,
    /// Inbound successor (towards the tail), if any.
    pub(crate) next_inbound: Option<(usize, Rc<RefCell<BufferHolder>>)>,
    /// Outbound successor's buffer: the preceding node's outbound holder,
    /// or the channel sink at the head of the pipeline.
    pub(crate) next_outbound: Rc<RefCell<BufferHolder>>,
    /// Outbound successor's index; `None` means the sink.
    pub(crate) next_outbound_index: Option<usize>,
}

impl HandlerContext {
    /// Name of the handler this context belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the owning channel, or `None` when the pipeline runs
    /// detached (e.g. in tests).
    pub fn channel_id(&self) -> Option<u32> {
        self.pipeline.channel_id()
    }

    /// This handler's inbound buffer.
    pub fn inbound(&self) -> RefMut<'_, BufferHolder> {
        self.inbound.borrow_mut()
    }

    /// This handler's outbound buffer.
    pub fn outbound(&self) -> RefMut<'_, BufferHolder> {
        self.outbound.borrow_mut()
    }

    /// The next inbound context's buffer, or `None` at the tail.
    pub fn next_inbound(&self) -> Option<RefMut<'_, BufferHolder>> {
        self.next_inbound.as_ref().map(|(_, buf)| buf.borrow_mut())
    }

    /// The next outbound context's buffer (the channel sink at the head).
    pub fn next_outbound(&self) -> RefMut<'_, BufferHolder> {
        self.next_outbound.borrow_mut()
    }

    /// Wakes the next inbound handler. Inbound data firing past the tail
    /// is dropped with a warning.
    pub fn fire_inbound_updated(&self) {
        match &self.next_inbound {
            Some((index, _)) => self.pipeline.invoke_inbound(*index),
            None => warn!(
                "inbound fire from \"{}\" reached the tail of the pipeline",
                self.name
            ),
        }
    }

    /// Wakes the next outbound handler; at the head of the pipeline this
    /// notifies the channel that the sink holds flushable data.
    pub fn fire_outbound_updated(&self) {
        match self.next_outbound_index {
            Some(index) => self.pipeline.invoke_outbound(index),
            None => self.pipeline.notify_write(),
        }
    }

    /// Propagates the channel-active event.
    pub fn fire_channel_active(&self) {
        match &self.next_inbound {
            Some((index, _)) => self.pipeline.invoke_channel_active(*index),
            None => trace!("channel_active reached the tail of the pipeline"),
        }
    }

    /// Propagates the channel-inactive event.
    pub fn fire_channel_inactive(&self) {
        match &self.next_inbound {
            Some((index, _)) => self.pipeline.invoke_channel_inactive(*index),
            None => trace!("channel_inactive reached the tail of the pipeline"),
        }
    }

    /// Propagates an exception event. An exception no handler recovers
    /// from is logged at the tail.
    pub fn fire_exception_caught(&self, cause: Box<dyn StdError>) {
        match &self.next_inbound {
            Some((index, _)) => self.pipeline.invoke_exception_caught(*index, cause),
            None => warn!(
                "unhandled exception reached the tail of the pipeline: {}",
                cause
            ),
        }
    }

    /// Propagates a user event.
    pub fn fire_user_event(&self, event: Box<dyn Any>) {
        match &self.next_inbound {
            Some((index, _)) => self.pipeline.invoke_user_event(*index, event),
            None => trace!("user event reached the tail of the pipeline"),
        }
    }

    /// Moves everything in this handler's inbound buffer into the next
    /// inbound context's buffer unchanged. At the tail the data is dropped.
    pub fn forward_inbound(&self) {
        match &self.next_inbound {
            Some((_, next)) => transfer(&mut self.inbound.borrow_mut(), &mut next.borrow_mut()),
            None => {
                let mut inbound = self.inbound.borrow_mut();
                if !inbound.is_empty() {
                    trace!(
                        "dropping {} unconsumed inbound payload(s) at the pipeline tail",
                        inbound.len()
                    );
                    drain(&mut inbound);
                }
            }
        }
    }

    /// Moves everything in this handler's outbound buffer into the next
    /// outbound context's buffer unchanged.
    pub fn forward_outbound(&self) {
        transfer(
            &mut self.outbound.borrow_mut(),
            &mut self.next_outbound.borrow_mut(),
        );
    }
}

fn drain(holder: &mut BufferHolder) {
    match holder {
        BufferHolder::Bytes(buf) => {
            buf.clear();
        }
        BufferHolder::Messages(queue) => {
            queue.clear();
        }
        BufferHolder::Discard => {}
    }
}
