//! Bootstrap APIs for wiring gyre channels to real TCP sockets.
//!
//! A [`Bootstrap`] connects outbound channels; a [`ServerBootstrap`] binds
//! a listener and spawns a child channel per accepted connection. Both
//! take a pipeline initializer that runs on the event loop for every
//! channel they create:
//!
//! ```no_run
//! use gyre::EventLoop;
//! use gyre_bootstrap::Bootstrap;
//!
//! let event_loop = EventLoop::new();
//! let mut bootstrap = Bootstrap::new(event_loop.clone());
//! bootstrap.pipeline(|pipeline| {
//!     // pipeline.add_back(...);
//! });
//! let channel = bootstrap.connect("127.0.0.1:8080".parse().unwrap()).unwrap();
//! # let _ = channel;
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;
use wg::WaitGroup;

use gyre::{Channel, Error, EventLoop, Pipeline};

mod tcp;

pub use tcp::{AcceptorTransport, StreamTransport};

use tcp::AcceptorShared;

const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Completion causes live behind an `Arc`; rebuild an owned error for
/// `Result` returns.
fn owned_cause(cause: &Error) -> Error {
    match cause {
        Error::Io(err) => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
        Error::UnsupportedOperation => Error::UnsupportedOperation,
        Error::RejectedExecution => Error::RejectedExecution,
        Error::Cancelled => Error::Cancelled,
        Error::AlreadyRegistered => Error::AlreadyRegistered,
        Error::NotRegistered => Error::NotRegistered,
        Error::ChannelClosed => Error::ChannelClosed,
        Error::HandlerNotFound(name) => Error::HandlerNotFound(name.clone()),
    }
}

fn await_token(token: gyre::Completion) -> Result<(), Error> {
    token.wait();
    match token.cause() {
        None => Ok(()),
        Some(cause) => Err(owned_cause(&cause)),
    }
}

/// Connects outbound channels over TCP.
pub struct Bootstrap {
    event_loop: EventLoop,
    initializer: Option<Arc<dyn Fn(&Pipeline) + Send + Sync>>,
    read_buffer_size: usize,
    wg: WaitGroup,
    channels: Mutex<Vec<Channel>>,
}

impl Bootstrap {
    /// Creates a bootstrap whose channels register to `event_loop`.
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            event_loop,
            initializer: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            wg: WaitGroup::new(),
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Installs the pipeline initializer run for every connected channel.
    pub fn pipeline(&mut self, initializer: impl Fn(&Pipeline) + Send + Sync + 'static) -> &mut Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Sets the reader thread's buffer size.
    pub fn read_buffer_size(&mut self, read_buffer_size: usize) -> &mut Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    /// Registers and connects a channel to `addr`, blocking until the
    /// connect completes.
    pub fn connect(&self, addr: SocketAddr) -> Result<Channel, Error> {
        let initializer = Arc::clone(
            self.initializer
                .as_ref()
                .expect("pipeline initializer not set"),
        );
        let transport =
            StreamTransport::new(self.read_buffer_size).with_wait_group(self.wg.clone());
        let channel = Channel::new(transport, move |pipeline| initializer(pipeline));
        await_token(channel.register(&self.event_loop))?;
        await_token(channel.connect(addr, None))?;
        trace!("bootstrap connected channel {} to {}", channel.id(), addr);
        self.channels.lock().unwrap().push(channel.clone());
        Ok(channel)
    }

    /// Closes every channel this bootstrap opened.
    pub fn stop(&self) {
        let channels: Vec<Channel> = self.channels.lock().unwrap().drain(..).collect();
        for channel in channels {
            channel.close().wait_timeout(Duration::from_secs(5));
        }
    }

    /// Closes every channel, then joins the reader threads.
    pub fn graceful_stop(&self) {
        self.stop();
        self.wg.wait();
    }
}

/// Binds a server channel and spawns a child channel per accepted
/// connection.
pub struct ServerBootstrap {
    event_loop: EventLoop,
    child_initializer: Option<Arc<dyn Fn(&Pipeline) + Send + Sync>>,
    read_buffer_size: usize,
    shared: Mutex<Option<Arc<AcceptorShared>>>,
    server_channel: Mutex<Option<Channel>>,
}

impl ServerBootstrap {
    /// Creates a server bootstrap on `event_loop`.
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            event_loop,
            child_initializer: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            shared: Mutex::new(None),
            server_channel: Mutex::new(None),
        }
    }

    /// Installs the pipeline initializer run for every accepted child
    /// channel.
    pub fn child_pipeline(
        &mut self,
        initializer: impl Fn(&Pipeline) + Send + Sync + 'static,
    ) -> &mut Self {
        self.child_initializer = Some(Arc::new(initializer));
        self
    }

    /// Sets the child reader threads' buffer size.
    pub fn read_buffer_size(&mut self, read_buffer_size: usize) -> &mut Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    /// Binds `addr` and starts accepting. Returns the server channel;
    /// its `local_addr` carries the actual bound address (useful with
    /// port 0).
    pub fn bind(&self, addr: SocketAddr) -> Result<Channel, Error> {
        let child_initializer = Arc::clone(
            self.child_initializer
                .as_ref()
                .expect("child pipeline initializer not set"),
        );
        let shared = Arc::new(AcceptorShared {
            parent: Mutex::new(None),
            child_initializer,
            read_buffer_size: self.read_buffer_size,
            local_addr: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            wg: WaitGroup::new(),
        });
        let transport = AcceptorTransport::new(Arc::clone(&shared));
        let channel = Channel::server(transport, |_| {});
        *shared.parent.lock().unwrap() = Some(channel.clone());

        await_token(channel.register(&self.event_loop))?;
        await_token(channel.bind(addr))?;
        trace!(
            "bootstrap bound server channel {} on {:?}",
            channel.id(),
            channel.local_addr()
        );
        *self.shared.lock().unwrap() = Some(shared);
        *self.server_channel.lock().unwrap() = Some(channel.clone());
        Ok(channel)
    }

    /// Stops accepting and closes the server channel.
    pub fn stop(&self) {
        if let Some(shared) = self.shared.lock().unwrap().take() {
            shared.shutdown();
        }
        if let Some(channel) = self.server_channel.lock().unwrap().take() {
            channel.close().wait_timeout(Duration::from_secs(5));
        }
    }

    /// Stops accepting, closes the server channel, and joins the acceptor
    /// and child reader threads.
    pub fn graceful_stop(&self) {
        let shared = self.shared.lock().unwrap().clone();
        self.stop();
        if let Some(shared) = shared {
            shared.wg.wait();
        }
    }
}
