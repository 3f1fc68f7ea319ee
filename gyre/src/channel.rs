//! Channels: bidirectional transport endpoints bound to one event loop.
//!
//! A [`Channel`] value is a cheap, cloneable, thread-safe handle. The
//! channel's mutable state — pipeline, buffer holders, transport — lives in
//! a loop-local inner object created when the channel is registered and
//! only ever touched on the loop's worker thread. Operations called from
//! the loop thread run inline on the inner object; operations called from
//! anywhere else are packaged as a tagged [`ChannelOp`] and pushed through
//! the loop's task queue, so they serialize with all other loop work.
//!
//! Every operation returns a [`Completion`] completed on the loop.
//!
//! Server channels are restricted: their outbound sink is a discard
//! holder, and `connect`, `disconnect` and `flush` fail with
//! [`Error::UnsupportedOperation`] on the loop thread, additionally firing
//! an exception-caught event through the pipeline.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use log::{trace, warn};

use crate::buffer::HolderKind;
use crate::completion::Completion;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::pipeline::Pipeline;
use crate::transport::Transport;

static NEXT_CHANNEL_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    /// Channels registered to the event loop running on this thread.
    static REGISTRY: RefCell<HashMap<u32, Rc<RefCell<ChannelInner>>>> =
        RefCell::new(HashMap::new());
}

type Initializer = Box<dyn FnOnce(&Pipeline) + Send>;

/// Parts held until registration moves them onto the loop thread.
struct PendingParts {
    transport: Box<dyn Transport>,
    initializer: Initializer,
    sink_kind: HolderKind,
}

struct ChannelShared {
    id: u32,
    parent: Option<u32>,
    server: bool,
    event_loop: Mutex<Option<EventLoop>>,
    local_addr: Mutex<Option<SocketAddr>>,
    remote_addr: Mutex<Option<SocketAddr>>,
    registered: AtomicBool,
    close_dispatched: AtomicBool,
    closed: AtomicBool,
    close_token: Completion,
    pending: Mutex<Option<PendingParts>>,
}

/// Loop-local channel state. Only the worker thread of the owning event
/// loop ever touches this.
struct ChannelInner {
    shared: Arc<ChannelShared>,
    pipeline: Pipeline,
    transport: Box<dyn Transport>,
    inactive_fired: bool,
}

/// A cross-thread dispatchable channel operation.
pub(crate) enum ChannelOp {
    Bind {
        addr: SocketAddr,
        token: Completion,
    },
    Connect {
        remote: SocketAddr,
        local: Option<SocketAddr>,
        token: Completion,
    },
    Disconnect {
        token: Completion,
    },
    Flush {
        token: Completion,
    },
    Write {
        msg: Box<dyn Any + Send>,
        token: Completion,
    },
    Close {
        token: Completion,
    },
    InboundBytes {
        data: BytesMut,
    },
    InboundEof,
    InboundError {
        error: io::Error,
    },
}

impl ChannelOp {
    fn token(&self) -> Option<Completion> {
        match self {
            ChannelOp::Bind { token, .. }
            | ChannelOp::Connect { token, .. }
            | ChannelOp::Disconnect { token }
            | ChannelOp::Flush { token }
            | ChannelOp::Write { token, .. }
            | ChannelOp::Close { token } => Some(token.clone()),
            ChannelOp::InboundBytes { .. }
            | ChannelOp::InboundEof
            | ChannelOp::InboundError { .. } => None,
        }
    }
}

/// Handle through which I/O producers (socket readers, acceptors) feed a
/// channel. Every call lands on the channel's event loop as a tagged
/// operation.
#[derive(Clone)]
pub struct ChannelFeed {
    id: u32,
    event_loop: EventLoop,
}

impl ChannelFeed {
    /// Identity of the fed channel.
    pub fn channel_id(&self) -> u32 {
        self.id
    }

    /// The channel's event loop.
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// Delivers received bytes to the channel's pipeline.
    pub fn bytes_received(&self, data: BytesMut) {
        self.submit(ChannelOp::InboundBytes { data });
    }

    /// Signals end-of-stream; the channel closes.
    pub fn eof(&self) {
        self.submit(ChannelOp::InboundEof);
    }

    /// Reports an I/O error; fired through the pipeline as an
    /// exception-caught event.
    pub fn error(&self, error: io::Error) {
        self.submit(ChannelOp::InboundError { error });
    }

    fn submit(&self, op: ChannelOp) {
        let id = self.id;
        if self.event_loop.in_event_loop() {
            apply_op(id, op);
        } else if self.event_loop.execute(move || apply_op(id, op)).is_err() {
            trace!(
                "dropping inbound event for channel {}: event loop shut down",
                id
            );
        }
    }
}

/// A bidirectional transport endpoint bound to exactly one event loop.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Channel {
    /// Creates an ordinary (client or accepted) channel. The pipeline is
    /// built by `initializer` on the event loop at registration time.
    pub fn new(
        transport: impl Transport + 'static,
        initializer: impl FnOnce(&Pipeline) + Send + 'static,
    ) -> Self {
        Self::build(Box::new(transport), Box::new(initializer), false, None)
    }

    /// Creates a server channel: discard outbound sink; `connect`,
    /// `disconnect` and `flush` are unsupported.
    pub fn server(
        transport: impl Transport + 'static,
        initializer: impl FnOnce(&Pipeline) + Send + 'static,
    ) -> Self {
        Self::build(Box::new(transport), Box::new(initializer), true, None)
    }

    /// Creates a child channel of `parent` (used by acceptors for inbound
    /// connections).
    pub fn child_of(
        parent: &Channel,
        transport: impl Transport + 'static,
        initializer: impl FnOnce(&Pipeline) + Send + 'static,
    ) -> Self {
        Self::build(
            Box::new(transport),
            Box::new(initializer),
            false,
            Some(parent.id()),
        )
    }

    fn build(
        transport: Box<dyn Transport>,
        initializer: Initializer,
        server: bool,
        parent: Option<u32>,
    ) -> Self {
        let sink_kind = if server {
            HolderKind::Discard
        } else {
            HolderKind::Bytes
        };
        Self {
            shared: Arc::new(ChannelShared {
                id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                parent,
                server,
                event_loop: Mutex::new(None),
                local_addr: Mutex::new(None),
                remote_addr: Mutex::new(None),
                registered: AtomicBool::new(false),
                close_dispatched: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_token: Completion::new(),
                pending: Mutex::new(Some(PendingParts {
                    transport,
                    initializer,
                    sink_kind,
                })),
            }),
        }
    }

    /// Process-wide unique identity of this channel.
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// Identity of the parent channel, for accepted children.
    pub fn parent_id(&self) -> Option<u32> {
        self.shared.parent
    }

    /// Whether this is a server channel.
    pub fn is_server(&self) -> bool {
        self.shared.server
    }

    /// Whether the channel has been registered to an event loop.
    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::Acquire)
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// The event loop this channel is bound to.
    pub fn event_loop(&self) -> Option<EventLoop> {
        self.shared.event_loop.lock().unwrap().clone()
    }

    /// Local socket address, `None` while unknown.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap()
    }

    /// Remote socket address, `None` while unknown.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.shared.remote_addr.lock().unwrap()
    }

    /// Binds the channel to `event_loop`. One-shot: a second call fails
    /// with [`Error::AlreadyRegistered`]. The pipeline is constructed and
    /// finalized on the loop thread before the token completes.
    pub fn register(&self, event_loop: &EventLoop) -> Completion {
        let token = Completion::new();
        if self.shared.registered.swap(true, Ordering::AcqRel) {
            token.try_failure(Error::AlreadyRegistered);
            return token;
        }
        let parts = match self.shared.pending.lock().unwrap().take() {
            Some(parts) => parts,
            None => {
                token.try_failure(Error::AlreadyRegistered);
                return token;
            }
        };
        *self.shared.event_loop.lock().unwrap() = Some(event_loop.clone());
        let shared = Arc::clone(&self.shared);
        let feed_loop = event_loop.clone();
        let loop_token = token.clone();
        let result = event_loop.execute(move || {
            register_on_loop(shared, parts, feed_loop, loop_token);
        });
        if let Err(err) = result {
            token.try_failure(err);
        }
        token
    }

    /// Binds a local address. Server channels become active once bound.
    pub fn bind(&self, addr: SocketAddr) -> Completion {
        let token = Completion::new();
        self.dispatch(ChannelOp::Bind {
            addr,
            token: token.clone(),
        });
        token
    }

    /// Connects to `remote`, optionally from `local`. Unsupported on
    /// server channels.
    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> Completion {
        let token = Completion::new();
        self.dispatch(ChannelOp::Connect {
            remote,
            local,
            token: token.clone(),
        });
        token
    }

    /// Tears the connection down. Unsupported on server channels.
    pub fn disconnect(&self) -> Completion {
        let token = Completion::new();
        self.dispatch(ChannelOp::Disconnect {
            token: token.clone(),
        });
        token
    }

    /// Drains the outbound sink to the transport. Unsupported on server
    /// channels.
    pub fn flush(&self) -> Completion {
        let token = Completion::new();
        self.dispatch(ChannelOp::Flush {
            token: token.clone(),
        });
        token
    }

    /// Writes a message into the pipeline's tail outbound buffer. The
    /// encoded result accumulates in the outbound sink until
    /// [`flush`](Self::flush).
    pub fn write(&self, msg: impl Any + Send) -> Completion {
        let token = Completion::new();
        self.dispatch(ChannelOp::Write {
            msg: Box::new(msg),
            token: token.clone(),
        });
        token
    }

    /// Writes a message and flushes. The returned token tracks the flush.
    pub fn write_and_flush(&self, msg: impl Any + Send) -> Completion {
        self.write(msg);
        self.flush()
    }

    /// Closes the channel. Idempotent: every call returns the same token,
    /// which completes after the pipeline has observed the
    /// channel-inactive event.
    pub fn close(&self) -> Completion {
        let token = self.shared.close_token.clone();
        if !self.shared.close_dispatched.swap(true, Ordering::AcqRel) {
            self.dispatch(ChannelOp::Close {
                token: token.clone(),
            });
        }
        token
    }

    fn dispatch(&self, op: ChannelOp) {
        let event_loop = self.shared.event_loop.lock().unwrap().clone();
        let event_loop = match event_loop {
            Some(event_loop) => event_loop,
            None => {
                if let Some(token) = op.token() {
                    token.try_failure(Error::NotRegistered);
                }
                return;
            }
        };
        let id = self.shared.id;
        if event_loop.in_event_loop() {
            apply_op(id, op);
        } else {
            let token = op.token();
            if let Err(err) = event_loop.execute(move || apply_op(id, op)) {
                if let Some(token) = token {
                    token.try_failure(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("server", &self.shared.server)
            .field("registered", &self.is_registered())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn register_on_loop(
    shared: Arc<ChannelShared>,
    parts: PendingParts,
    event_loop: EventLoop,
    token: Completion,
) {
    let pipeline = Pipeline::with_sink(crate::buffer::BufferHolder::for_kind(parts.sink_kind));
    pipeline.set_channel_id(shared.id);
    (parts.initializer)(&pipeline);
    pipeline.finalize();

    let mut transport = parts.transport;
    transport.attach(ChannelFeed {
        id: shared.id,
        event_loop,
    });

    let id = shared.id;
    if !shared.server {
        // Outbound data reaching the sink schedules a flush; an explicit
        // flush() is still available to force one.
        pipeline.set_write_notify(Rc::new(move || {
            apply_op(
                id,
                ChannelOp::Flush {
                    token: Completion::new(),
                },
            );
        }));
    }
    let already_active = transport.is_active();
    let inner = ChannelInner {
        shared,
        pipeline: pipeline.clone(),
        transport,
        inactive_fired: false,
    };
    REGISTRY.with(|registry| {
        registry.borrow_mut().insert(id, Rc::new(RefCell::new(inner)));
    });
    trace!("channel {} registered", id);
    if already_active {
        pipeline.fire_channel_active();
    }
    token.try_success();
}

/// Applies a tagged operation to the channel's loop-local state. Runs on
/// the loop thread only.
pub(crate) fn apply_op(id: u32, op: ChannelOp) {
    let inner = REGISTRY.with(|registry| registry.borrow().get(&id).cloned());
    let inner = match inner {
        Some(inner) => inner,
        None => {
            // Deregistered (closed) or registered to a different loop.
            match op {
                ChannelOp::Close { token } => {
                    token.try_success();
                }
                op => {
                    if let Some(token) = op.token() {
                        token.try_failure(Error::ChannelClosed);
                    }
                }
            }
            return;
        }
    };

    match op {
        ChannelOp::Bind { addr, token } => {
            let (result, server) = {
                let mut inner = inner.borrow_mut();
                let result = inner.transport.do_bind(addr);
                if result.is_ok() {
                    let local = inner.transport.local_addr().or(Some(addr));
                    *inner.shared.local_addr.lock().unwrap() = local;
                }
                (result, inner.shared.server)
            };
            match result {
                Ok(()) => {
                    if server {
                        let pipeline = inner.borrow().pipeline.clone();
                        pipeline.fire_channel_active();
                    }
                    token.try_success();
                }
                Err(err) => {
                    token.try_failure(err);
                }
            }
        }
        ChannelOp::Connect {
            remote,
            local,
            token,
        } => {
            if reject_if_server(&inner, &token) {
                return;
            }
            let result = {
                let mut inner = inner.borrow_mut();
                let result = inner.transport.do_connect(remote, local);
                if result.is_ok() {
                    let shared = &inner.shared;
                    *shared.local_addr.lock().unwrap() =
                        inner.transport.local_addr().or(local);
                    *shared.remote_addr.lock().unwrap() =
                        inner.transport.remote_addr().or(Some(remote));
                }
                result
            };
            match result {
                Ok(()) => {
                    let pipeline = inner.borrow().pipeline.clone();
                    pipeline.fire_channel_active();
                    token.try_success();
                }
                Err(err) => {
                    token.try_failure(err);
                }
            }
        }
        ChannelOp::Disconnect { token } => {
            if reject_if_server(&inner, &token) {
                return;
            }
            let result = {
                let mut inner = inner.borrow_mut();
                let result = inner.transport.do_disconnect();
                if result.is_ok() {
                    *inner.shared.remote_addr.lock().unwrap() = None;
                }
                result
            };
            match result {
                Ok(()) => {
                    fire_inactive_once(&inner);
                    token.try_success();
                }
                Err(err) => {
                    token.try_failure(err);
                }
            }
        }
        ChannelOp::Flush { token } => {
            if reject_if_server(&inner, &token) {
                return;
            }
            let result = {
                let mut borrow = inner.borrow_mut();
                let ChannelInner {
                    pipeline,
                    transport,
                    ..
                } = &mut *borrow;
                pipeline.with_sink_mut(|sink| transport.do_flush(sink))
            };
            match result {
                Ok(()) => {
                    token.try_success();
                }
                Err(err) => {
                    token.try_failure(err);
                }
            }
        }
        ChannelOp::Write { msg, token } => {
            let pipeline = inner.borrow().pipeline.clone();
            pipeline.write(msg);
            token.try_success();
        }
        ChannelOp::Close { token } => {
            close_on_loop(id, &inner, token);
        }
        ChannelOp::InboundBytes { data } => {
            let pipeline = inner.borrow().pipeline.clone();
            pipeline.feed_inbound(Box::new(data));
        }
        ChannelOp::InboundEof => {
            trace!("channel {} reached end of stream", id);
            let (shared, token) = {
                let borrow = inner.borrow();
                (Arc::clone(&borrow.shared), borrow.shared.close_token.clone())
            };
            shared.close_dispatched.store(true, Ordering::Release);
            close_on_loop(id, &inner, token);
        }
        ChannelOp::InboundError { error } => {
            let pipeline = inner.borrow().pipeline.clone();
            pipeline.fire_exception_caught(Box::new(Error::Io(error)));
        }
    }
}

/// Fails `token` and fires an exception-caught event when the channel is a
/// server channel. Returns `true` if the op was rejected.
fn reject_if_server(inner: &Rc<RefCell<ChannelInner>>, token: &Completion) -> bool {
    let (server, pipeline) = {
        let borrow = inner.borrow();
        (borrow.shared.server, borrow.pipeline.clone())
    };
    if !server {
        return false;
    }
    token.try_failure(Error::UnsupportedOperation);
    pipeline.fire_exception_caught(Box::new(Error::UnsupportedOperation));
    true
}

fn fire_inactive_once(inner: &Rc<RefCell<ChannelInner>>) {
    let pipeline = {
        let mut borrow = inner.borrow_mut();
        if borrow.inactive_fired {
            return;
        }
        borrow.inactive_fired = true;
        borrow.pipeline.clone()
    };
    pipeline.fire_channel_inactive();
}

fn close_on_loop(id: u32, inner: &Rc<RefCell<ChannelInner>>, token: Completion) {
    let shared = {
        let mut borrow = inner.borrow_mut();
        if let Err(err) = borrow.transport.do_close() {
            warn!("channel {} transport close failed: {}", id, err);
        }
        Arc::clone(&borrow.shared)
    };
    shared.closed.store(true, Ordering::Release);
    // The pipeline observes the inactive event before the token completes.
    fire_inactive_once(inner);
    REGISTRY.with(|registry| {
        registry.borrow_mut().remove(&id);
    });
    trace!("channel {} closed and deregistered", id);
    token.try_success();
}
