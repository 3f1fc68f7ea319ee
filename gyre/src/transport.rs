//! Transport capability record.
//!
//! A [`Transport`] supplies the concrete I/O operations a channel needs:
//! bind, connect, disconnect, flush, close. The channel never talks to a
//! socket itself; it drives the transport from its event loop and hands it
//! the outbound buffer holder to drain on flush. Transports that produce
//! inbound data (socket readers, acceptors) receive a
//! [`ChannelFeed`](crate::ChannelFeed) at registration and push bytes, EOF
//! and errors through it — each arrives on the channel's event loop as a
//! tagged operation.
//!
//! Server transports simply leave `do_connect`/`do_disconnect`/`do_flush`
//! to the default stubs, which report [`Error::UnsupportedOperation`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

use crate::buffer::BufferHolder;
use crate::channel::ChannelFeed;
use crate::error::{Error, Result};

/// The I/O capabilities backing a channel.
pub trait Transport: Send {
    /// Called once on the event loop when the channel is registered,
    /// before any other operation. Transports that produce inbound data
    /// keep the feed.
    fn attach(&mut self, feed: ChannelFeed) {
        let _ = feed;
    }

    /// Binds a local address (servers and clients that pin their source
    /// address).
    fn do_bind(&mut self, addr: SocketAddr) -> Result<()> {
        let _ = addr;
        Err(Error::UnsupportedOperation)
    }

    /// Establishes a connection to `remote`, optionally from `local`.
    fn do_connect(&mut self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<()> {
        let _ = (remote, local);
        Err(Error::UnsupportedOperation)
    }

    /// Tears the connection down without closing the channel.
    fn do_disconnect(&mut self) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    /// Drains the channel's outbound holder to the wire.
    fn do_flush(&mut self, outbound: &mut BufferHolder) -> Result<()> {
        let _ = outbound;
        Err(Error::UnsupportedOperation)
    }

    /// Releases all transport resources.
    fn do_close(&mut self) -> Result<()>;

    /// Whether the transport is already live at registration time (e.g. an
    /// accepted socket). Active transports fire `channel_active` as soon
    /// as the channel is registered.
    fn is_active(&self) -> bool {
        false
    }

    /// Local address, once known.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Remote address, once known.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// An in-memory transport: flushed bytes are captured instead of written
/// to a socket, and inbound bytes are injected by hand through the
/// [`EmbeddedProbe`]. Useful for exercising channels and codecs without
/// any I/O.
pub struct EmbeddedTransport {
    probe: EmbeddedProbe,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

impl EmbeddedTransport {
    /// Creates the transport and the probe used to observe and drive it.
    pub fn new() -> (Self, EmbeddedProbe) {
        let probe = EmbeddedProbe {
            flushed: Arc::new(Mutex::new(Vec::new())),
            feed: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (
            Self {
                probe: probe.clone(),
                local: None,
                remote: None,
            },
            probe,
        )
    }
}

impl Transport for EmbeddedTransport {
    fn attach(&mut self, feed: ChannelFeed) {
        *self.probe.feed.lock().unwrap() = Some(feed);
    }

    fn do_bind(&mut self, addr: SocketAddr) -> Result<()> {
        self.local = Some(addr);
        Ok(())
    }

    fn do_connect(&mut self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<()> {
        self.remote = Some(remote);
        if local.is_some() {
            self.local = local;
        }
        Ok(())
    }

    fn do_disconnect(&mut self) -> Result<()> {
        self.remote = None;
        Ok(())
    }

    fn do_flush(&mut self, outbound: &mut BufferHolder) -> Result<()> {
        let data = outbound.take_bytes();
        self.probe.flushed.lock().unwrap().extend_from_slice(&data);
        Ok(())
    }

    fn do_close(&mut self) -> Result<()> {
        self.probe.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }
}

/// Observer half of an [`EmbeddedTransport`].
#[derive(Clone)]
pub struct EmbeddedProbe {
    flushed: Arc<Mutex<Vec<u8>>>,
    feed: Arc<Mutex<Option<ChannelFeed>>>,
    closed: Arc<AtomicBool>,
}

impl EmbeddedProbe {
    /// All bytes flushed so far, drained.
    pub fn take_flushed(&self) -> Vec<u8> {
        std::mem::take(&mut self.flushed.lock().unwrap())
    }

    /// Whether any flushed bytes are pending.
    pub fn has_flushed(&self) -> bool {
        !self.flushed.lock().unwrap().is_empty()
    }

    /// Injects inbound bytes as if the wire had produced them.
    ///
    /// # Panics
    ///
    /// Panics if the channel has not been registered yet.
    pub fn feed_bytes(&self, data: &[u8]) {
        self.feed()
            .expect("channel not registered")
            .bytes_received(BytesMut::from(data));
    }

    /// Signals end-of-stream from the wire.
    pub fn feed_eof(&self) {
        self.feed().expect("channel not registered").eof();
    }

    /// The channel feed, once the channel is registered.
    pub fn feed(&self) -> Option<ChannelFeed> {
        self.feed.lock().unwrap().clone()
    }

    /// Whether `do_close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
