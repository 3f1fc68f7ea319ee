//! The handler pipeline.
//!
//! A [`Pipeline`] is an ordered chain of [`Handler`]s attached to one
//! channel. The pipeline owns an arena of per-handler nodes; each node
//! carries the handler itself plus the two buffers of the kinds the
//! handler declared. Contexts address their neighbours by arena index, so
//! there are no cyclic owning references between the pipeline and its
//! handlers.
//!
//! Pipelines can also be driven standalone (no channel, no event loop):
//! feed bytes or messages in with [`feed_inbound`](Pipeline::feed_inbound),
//! write messages out with [`write`](Pipeline::write), and inspect the
//! outbound sink with [`drain_sink_bytes`](Pipeline::drain_sink_bytes).
//! This is how the codec tests exercise handlers without any I/O.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::rc::Rc;

use log::{trace, warn};

use crate::buffer::{BufferHolder, HolderKind};
use crate::error::Error;
use crate::handler::{Handler, HandlerContext};

pub(crate) struct Node {
    name: String,
    handler: Rc<RefCell<dyn Handler>>,
    inbound: Rc<RefCell<BufferHolder>>,
    outbound: Rc<RefCell<BufferHolder>>,
}

pub(crate) struct PipelineCore {
    channel_id: Cell<Option<u32>>,
    nodes: RefCell<Vec<Node>>,
    finalized: Cell<bool>,
    sink: Rc<RefCell<BufferHolder>>,
    write_notify: RefCell<Option<Rc<dyn Fn()>>>,
}

impl PipelineCore {
    pub(crate) fn channel_id(&self) -> Option<u32> {
        self.channel_id.get()
    }

    /// Builds a context for the node at `index` from the current arena
    /// layout. Borrows of the arena are released before the caller invokes
    /// the handler, so handlers are free to fire into their neighbours.
    fn context_at(self: &Rc<Self>, index: usize) -> Option<(Rc<RefCell<dyn Handler>>, HandlerContext)> {
        let nodes = self.nodes.borrow();
        let node = nodes.get(index)?;
        let next_inbound = nodes
            .get(index + 1)
            .map(|next| (index + 1, Rc::clone(&next.inbound)));
        let (next_outbound_index, next_outbound) = if index == 0 {
            (None, Rc::clone(&self.sink))
        } else {
            (Some(index - 1), Rc::clone(&nodes[index - 1].outbound))
        };
        let ctx = HandlerContext {
            pipeline: Rc::clone(self),
            name: node.name.clone(),
            inbound: Rc::clone(&node.inbound),
            outbound: Rc::clone(&node.outbound),
            next_inbound,
            next_outbound,
            next_outbound_index,
        };
        Some((Rc::clone(&node.handler), ctx))
    }

    pub(crate) fn invoke_inbound(self: &Rc<Self>, index: usize) {
        if let Some((handler, ctx)) = self.context_at(index) {
            handler.borrow_mut().inbound_updated(&ctx);
        }
    }

    pub(crate) fn invoke_outbound(self: &Rc<Self>, index: usize) {
        if let Some((handler, ctx)) = self.context_at(index) {
            handler.borrow_mut().outbound_updated(&ctx);
        }
    }

    pub(crate) fn invoke_channel_active(self: &Rc<Self>, index: usize) {
        if let Some((handler, ctx)) = self.context_at(index) {
            handler.borrow_mut().channel_active(&ctx);
        }
    }

    pub(crate) fn invoke_channel_inactive(self: &Rc<Self>, index: usize) {
        if let Some((handler, ctx)) = self.context_at(index) {
            handler.borrow_mut().channel_inactive(&ctx);
        }
    }

    pub(crate) fn invoke_exception_caught(self: &Rc<Self>, index: usize, cause: Box<dyn StdError>) {
        if let Some((handler, ctx)) = self.context_at(index) {
            handler.borrow_mut().exception_caught(&ctx, cause);
        }
    }

    pub(crate) fn invoke_user_event(self: &Rc<Self>, index: usize, event: Box<dyn Any>) {
        if let Some((handler, ctx)) = self.context_at(index) {
            handler.borrow_mut().user_event(&ctx, event);
        }
    }

    pub(crate) fn notify_write(&self) {
        let notify = self.write_notify.borrow().clone();
        if let Some(notify) = notify {
            notify();
        }
    }
}

/// An ordered chain of handlers bound to one channel (or run standalone).
///
/// Cloning yields another handle to the same chain; pipelines are
/// single-threaded and never cross an event-loop boundary.
#[derive(Clone)]
pub struct Pipeline {
    core: Rc<PipelineCore>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty pipeline whose outbound sink is a byte holder.
    pub fn new() -> Self {
        Self::with_sink(BufferHolder::bytes())
    }

    /// Creates an empty pipeline with the given outbound sink; server
    /// channels pass a discard holder here.
    pub fn with_sink(sink: BufferHolder) -> Self {
        Self {
            core: Rc::new(PipelineCore {
                channel_id: Cell::new(None),
                nodes: RefCell::new(Vec::new()),
                finalized: Cell::new(false),
                sink: Rc::new(RefCell::new(sink)),
                write_notify: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn set_channel_id(&self, id: u32) {
        self.core.channel_id.set(Some(id));
    }

    /// Appends `handler` at the tail. Buffers of the handler's declared
    /// kinds are allocated immediately; call [`finalize`](Self::finalize)
    /// before driving the pipeline.
    pub fn add_back(&self, handler: impl Handler) {
        let node = Self::node_for(handler);
        self.core.nodes.borrow_mut().push(node);
        self.core.finalized.set(false);
    }

    /// Inserts `handler` at the head.
    pub fn add_front(&self, handler: impl Handler) {
        let node = Self::node_for(handler);
        self.core.nodes.borrow_mut().insert(0, node);
        self.core.finalized.set(false);
    }

    fn node_for(handler: impl Handler) -> Node {
        let inbound = BufferHolder::for_kind(handler.inbound_kind());
        let outbound = BufferHolder::for_kind(handler.outbound_kind());
        Node {
            name: handler.name().to_string(),
            handler: Rc::new(RefCell::new(handler)),
            inbound: Rc::new(RefCell::new(inbound)),
            outbound: Rc::new(RefCell::new(outbound)),
        }
    }

    /// Removes every handler named `name`.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let mut nodes = self.core.nodes.borrow_mut();
        let before = nodes.len();
        nodes.retain(|node| node.name != name);
        if nodes.len() == before {
            return Err(Error::HandlerNotFound(name.to_string()));
        }
        self.core.finalized.set(false);
        Ok(())
    }

    /// Number of handlers in the chain.
    pub fn len(&self) -> usize {
        self.core.nodes.borrow().len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.core.nodes.borrow().is_empty()
    }

    /// Marks the chain complete after mutation. Must be called before the
    /// pipeline is driven.
    pub fn finalize(&self) {
        if log::log_enabled!(log::Level::Trace) {
            let nodes = self.core.nodes.borrow();
            let chain: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
            trace!("pipeline finalized: [{}]", chain.join(" -> "));
        }
        self.core.finalized.set(true);
    }

    fn assert_finalized(&self) {
        assert!(
            self.core.finalized.get(),
            "pipeline must be finalized before use"
        );
    }

    /// Pushes a payload into the head handler's inbound buffer and wakes
    /// it. With no handlers installed the payload is dropped with a
    /// warning.
    pub fn feed_inbound(&self, msg: Box<dyn Any>) {
        self.assert_finalized();
        let head = {
            let nodes = self.core.nodes.borrow();
            nodes.first().map(|node| Rc::clone(&node.inbound))
        };
        match head {
            Some(inbound) => {
                inbound.borrow_mut().push(msg);
                self.core.invoke_inbound(0);
            }
            None => warn!("inbound payload fed into an empty pipeline"),
        }
    }

    /// Appends raw bytes to the head handler's inbound byte buffer and
    /// wakes it.
    pub fn feed_inbound_bytes(&self, data: &[u8]) {
        self.assert_finalized();
        let head = {
            let nodes = self.core.nodes.borrow();
            nodes.first().map(|node| Rc::clone(&node.inbound))
        };
        match head {
            Some(inbound) => {
                inbound.borrow_mut().push_bytes(data);
                self.core.invoke_inbound(0);
            }
            None => warn!("inbound bytes fed into an empty pipeline"),
        }
    }

    /// Pushes a message into the tail handler's outbound buffer and wakes
    /// it. With no handlers installed the message lands directly in the
    /// sink.
    pub fn write(&self, msg: Box<dyn Any>) {
        self.assert_finalized();
        let tail = {
            let nodes = self.core.nodes.borrow();
            nodes.last().map(|node| (nodes.len() - 1, Rc::clone(&node.outbound)))
        };
        match tail {
            Some((index, outbound)) => {
                outbound.borrow_mut().push(msg);
                self.core.invoke_outbound(index);
            }
            None => {
                self.core.sink.borrow_mut().push(msg);
                self.core.notify_write();
            }
        }
    }

    /// Fires the channel-active event through the chain.
    pub fn fire_channel_active(&self) {
        self.assert_finalized();
        self.core.invoke_channel_active(0);
    }

    /// Fires the channel-inactive event through the chain.
    pub fn fire_channel_inactive(&self) {
        self.assert_finalized();
        self.core.invoke_channel_inactive(0);
    }

    /// Fires an exception event through the chain. With no handlers the
    /// exception is logged.
    pub fn fire_exception_caught(&self, cause: Box<dyn StdError>) {
        self.assert_finalized();
        if self.is_empty() {
            warn!("unhandled exception in empty pipeline: {}", cause);
            return;
        }
        self.core.invoke_exception_caught(0, cause);
    }

    /// Fires a user event through the chain.
    pub fn fire_user_event(&self, event: Box<dyn Any>) {
        self.assert_finalized();
        self.core.invoke_user_event(0, event);
    }

    /// Removes and returns all bytes accumulated in the outbound sink.
    pub fn drain_sink_bytes(&self) -> bytes::BytesMut {
        self.core.sink.borrow_mut().take_bytes()
    }

    /// Whether the outbound sink currently holds flushable data.
    pub fn sink_is_empty(&self) -> bool {
        self.core.sink.borrow().is_empty()
    }

    pub(crate) fn with_sink_mut<R>(&self, f: impl FnOnce(&mut BufferHolder) -> R) -> R {
        f(&mut self.core.sink.borrow_mut())
    }

    /// Installs the callback invoked whenever outbound data reaches the
    /// sink, i.e. when there is something to flush.
    pub fn set_write_notify(&self, notify: Rc<dyn Fn()>) {
        *self.core.write_notify.borrow_mut() = Some(notify);
    }

    /// Kind of the outbound sink holder.
    pub fn sink_kind(&self) -> HolderKind {
        self.core.sink.borrow().kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::collections::VecDeque;

    /// Forwards bytes unchanged in both directions.
    struct Passthrough {
        name: &'static str,
    }

    impl Handler for Passthrough {
        fn name(&self) -> &str {
            self.name
        }

        fn inbound_kind(&self) -> HolderKind {
            HolderKind::Bytes
        }

        fn outbound_kind(&self) -> HolderKind {
            HolderKind::Bytes
        }

        fn inbound_updated(&mut self, ctx: &HandlerContext) {
            ctx.forward_inbound();
            ctx.fire_inbound_updated();
        }
    }

    /// Collects every inbound byte it sees; never forwards.
    struct ByteCollector {
        seen: Rc<RefCell<BytesMut>>,
    }

    impl Handler for ByteCollector {
        fn name(&self) -> &str {
            "collector"
        }

        fn inbound_kind(&self) -> HolderKind {
            HolderKind::Bytes
        }

        fn inbound_updated(&mut self, ctx: &HandlerContext) {
            let data = ctx.inbound().take_bytes();
            self.seen.borrow_mut().extend_from_slice(&data);
        }
    }

    /// Records lifecycle events in order.
    struct EventRecorder {
        events: Rc<RefCell<Vec<String>>>,
        name: &'static str,
    }

    impl Handler for EventRecorder {
        fn name(&self) -> &str {
            self.name
        }

        fn inbound_kind(&self) -> HolderKind {
            HolderKind::Bytes
        }

        fn channel_active(&mut self, ctx: &HandlerContext) {
            self.events.borrow_mut().push(format!("{}:active", self.name));
            ctx.fire_channel_active();
        }

        fn channel_inactive(&mut self, ctx: &HandlerContext) {
            self.events
                .borrow_mut()
                .push(format!("{}:inactive", self.name));
            ctx.fire_channel_inactive();
        }

        fn exception_caught(&mut self, ctx: &HandlerContext, cause: Box<dyn StdError>) {
            self.events
                .borrow_mut()
                .push(format!("{}:exception:{}", self.name, cause));
            ctx.fire_exception_caught(cause);
        }

        fn inbound_updated(&mut self, ctx: &HandlerContext) {
            ctx.forward_inbound();
            ctx.fire_inbound_updated();
        }
    }

    #[test]
    fn inbound_bytes_traverse_head_to_tail_in_order() {
        let seen = Rc::new(RefCell::new(BytesMut::new()));
        let pipeline = Pipeline::new();
        pipeline.add_back(Passthrough { name: "first" });
        pipeline.add_back(Passthrough { name: "second" });
        pipeline.add_back(ByteCollector { seen: Rc::clone(&seen) });
        pipeline.finalize();

        // 64 KiB of the cycling byte pattern, fed in irregular slices.
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i & 0xff) as u8).collect();
        for chunk in payload.chunks(1500) {
            pipeline.feed_inbound_bytes(chunk);
        }
        assert_eq!(&seen.borrow()[..], &payload[..]);

        // Three copies concatenate in order.
        seen.borrow_mut().clear();
        for _ in 0..3 {
            for chunk in payload.chunks(8192) {
                pipeline.feed_inbound_bytes(chunk);
            }
        }
        assert_eq!(seen.borrow().len(), 3 * payload.len());
        for (i, byte) in seen.borrow().iter().enumerate() {
            assert_eq!(*byte, (i & 0xff) as u8, "mismatch at offset {}", i);
        }
    }

    #[test]
    fn outbound_writes_descend_to_the_sink() {
        let pipeline = Pipeline::new();
        pipeline.add_back(Passthrough { name: "only" });
        pipeline.finalize();

        pipeline.write(Box::new(BytesMut::from(&b"hello "[..])));
        pipeline.write(Box::new(BytesMut::from(&b"world"[..])));
        assert_eq!(&pipeline.drain_sink_bytes()[..], b"hello world");
        assert!(pipeline.sink_is_empty());
    }

    #[test]
    fn discard_sink_swallows_outbound_traffic() {
        let pipeline = Pipeline::with_sink(BufferHolder::discard());
        pipeline.add_back(Passthrough { name: "only" });
        pipeline.finalize();

        pipeline.write(Box::new(BytesMut::from(&b"dropped"[..])));
        assert!(pipeline.sink_is_empty());
        assert_eq!(pipeline.sink_kind(), HolderKind::Discard);
        assert!(pipeline.drain_sink_bytes().is_empty());
    }

    #[test]
    fn events_walk_the_chain_once_in_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.add_back(EventRecorder {
            events: Rc::clone(&events),
            name: "a",
        });
        pipeline.add_back(EventRecorder {
            events: Rc::clone(&events),
            name: "b",
        });
        pipeline.finalize();

        pipeline.fire_channel_active();
        pipeline.fire_exception_caught(Box::new(Error::UnsupportedOperation));
        pipeline.fire_channel_inactive();

        assert_eq!(
            *events.borrow(),
            vec![
                "a:active",
                "b:active",
                "a:exception:operation not supported by this channel",
                "b:exception:operation not supported by this channel",
                "a:inactive",
                "b:inactive",
            ]
        );
    }

    #[test]
    fn remove_drops_the_named_handler() {
        let pipeline = Pipeline::new();
        pipeline.add_back(Passthrough { name: "keep" });
        pipeline.add_back(Passthrough { name: "drop" });
        pipeline.finalize();
        assert_eq!(pipeline.len(), 2);

        pipeline.remove("drop").unwrap();
        pipeline.finalize();
        assert_eq!(pipeline.len(), 1);
        assert!(matches!(
            pipeline.remove("missing"),
            Err(Error::HandlerNotFound(_))
        ));
    }

    #[test]
    fn write_notify_fires_when_the_sink_fills() {
        let notified = Rc::new(Cell::new(0u32));
        let pipeline = Pipeline::new();
        pipeline.add_back(Passthrough { name: "only" });
        pipeline.finalize();
        let n = Rc::clone(&notified);
        pipeline.set_write_notify(Rc::new(move || n.set(n.get() + 1)));

        pipeline.write(Box::new(BytesMut::from(&b"x"[..])));
        assert_eq!(notified.get(), 1);
    }

    /// A decoder-shaped handler: bytes in, length-prefixed frames out as
    /// messages.
    struct FrameDecoder;

    impl Handler for FrameDecoder {
        fn name(&self) -> &str {
            "frame-decoder"
        }

        fn inbound_kind(&self) -> HolderKind {
            HolderKind::Bytes
        }

        fn inbound_updated(&mut self, ctx: &HandlerContext) {
            loop {
                let frame = {
                    let mut inbound = ctx.inbound();
                    let buf = inbound.as_bytes_mut();
                    if buf.is_empty() {
                        break;
                    }
                    let frame_len = buf[0] as usize;
                    if buf.len() < 1 + frame_len {
                        break;
                    }
                    let mut frame = buf.split_to(1 + frame_len);
                    let _ = frame.split_to(1);
                    frame
                };
                if let Some(mut next) = ctx.next_inbound() {
                    next.push(Box::new(frame));
                }
                ctx.fire_inbound_updated();
            }
        }
    }

    struct FrameCollector {
        frames: Rc<RefCell<VecDeque<BytesMut>>>,
    }

    impl Handler for FrameCollector {
        fn name(&self) -> &str {
            "frame-collector"
        }

        fn inbound_updated(&mut self, ctx: &HandlerContext) {
            while let Some(msg) = ctx.inbound().pop_message() {
                let frame = msg.downcast::<BytesMut>().expect("frame message");
                self.frames.borrow_mut().push_back(*frame);
            }
        }
    }

    #[test]
    fn byte_to_message_boundary_respects_declared_kinds() {
        let frames = Rc::new(RefCell::new(VecDeque::new()));
        let pipeline = Pipeline::new();
        pipeline.add_back(FrameDecoder);
        pipeline.add_back(FrameCollector {
            frames: Rc::clone(&frames),
        });
        pipeline.finalize();

        // Two frames split across three reads.
        pipeline.feed_inbound_bytes(&[3, b'a']);
        assert!(frames.borrow().is_empty());
        pipeline.feed_inbound_bytes(&[b'b', b'c', 2]);
        pipeline.feed_inbound_bytes(&[b'x', b'y']);

        let collected: Vec<BytesMut> = frames.borrow_mut().drain(..).collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(&collected[0][..], b"abc");
        assert_eq!(&collected[1][..], b"xy");
    }
}
