//! Blocking TCP transports.
//!
//! [`StreamTransport`] backs ordinary channels with a `std::net::TcpStream`
//! plus one reader thread that feeds received bytes into the channel's
//! event loop. [`AcceptorTransport`] backs server channels: it binds a
//! listener and accepts connections on a dedicated thread, wrapping each
//! inbound socket in a child channel registered to the same loop.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use bytes::BytesMut;
use log::{debug, trace, warn};
use wg::WaitGroup;

use gyre::{BufferHolder, Channel, ChannelFeed, Error, Pipeline, Result, Transport};

pub(crate) type ChildInitializer = Arc<dyn Fn(&Pipeline) + Send + Sync>;

const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

fn spawn_reader(
    stream: TcpStream,
    feed: ChannelFeed,
    read_buffer_size: usize,
    wg: &WaitGroup,
) -> std::io::Result<()> {
    let worker = wg.add(1);
    let channel_id = feed.channel_id();
    thread::Builder::new()
        .name(format!("gyre-tcp-reader-{}", channel_id))
        .spawn(move || {
            let mut stream = stream;
            let mut buf = vec![0u8; read_buffer_size];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        trace!("channel {} stream reached EOF", channel_id);
                        feed.eof();
                        break;
                    }
                    Ok(n) => {
                        trace!("channel {} stream read {} bytes", channel_id, n);
                        feed.bytes_received(BytesMut::from(&buf[..n]));
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        // Shutdown from our own side surfaces here too;
                        // the channel is already closing then.
                        debug!("channel {} stream read error: {}", channel_id, err);
                        feed.error(err);
                        feed.eof();
                        break;
                    }
                }
            }
            worker.done();
        })
        .map(|_| ())
}

/// TCP capability record for ordinary channels.
pub struct StreamTransport {
    stream: Option<TcpStream>,
    feed: Option<ChannelFeed>,
    read_buffer_size: usize,
    wg: WaitGroup,
    /// Accepted sockets are live before registration.
    accepted: bool,
}

impl Default for StreamTransport {
    fn default() -> Self {
        Self::new(DEFAULT_READ_BUFFER_SIZE)
    }
}

impl StreamTransport {
    /// Creates an unconnected transport; `do_connect` establishes the
    /// stream.
    pub fn new(read_buffer_size: usize) -> Self {
        Self {
            stream: None,
            feed: None,
            read_buffer_size,
            wg: WaitGroup::new(),
            accepted: false,
        }
    }

    /// Wraps an already-accepted socket; the reader starts as soon as the
    /// channel is registered.
    pub fn accepted(stream: TcpStream, read_buffer_size: usize) -> Self {
        Self {
            stream: Some(stream),
            feed: None,
            read_buffer_size,
            wg: WaitGroup::new(),
            accepted: true,
        }
    }

    /// Tracks the reader thread on `wg` so a bootstrap can join it during
    /// graceful stop.
    pub fn with_wait_group(mut self, wg: WaitGroup) -> Self {
        self.wg = wg;
        self
    }

    fn start_reader(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .expect("reader started without a stream")
            .try_clone()
            .map_err(Error::Io)?;
        let feed = self
            .feed
            .clone()
            .expect("transport attached before reader start");
        spawn_reader(stream, feed, self.read_buffer_size, &self.wg).map_err(Error::Io)
    }
}

impl Transport for StreamTransport {
    fn attach(&mut self, feed: ChannelFeed) {
        self.feed = Some(feed);
        if self.accepted {
            if let Err(err) = self.start_reader() {
                warn!("failed to start reader for accepted socket: {}", err);
            }
        }
    }

    fn do_connect(&mut self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                "transport already connected",
            )));
        }
        if local.is_some() {
            debug!("local address binding is not supported; ignoring");
        }
        let stream = TcpStream::connect(remote).map_err(Error::Io)?;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        self.start_reader()
    }

    fn do_disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(Shutdown::Both).ok();
        }
        Ok(())
    }

    fn do_flush(&mut self, outbound: &mut BufferHolder) -> Result<()> {
        let data = outbound.take_bytes();
        if data.is_empty() {
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                ErrorKind::NotConnected,
                "transport not connected",
            ))
        })?;
        stream.write_all(&data).map_err(Error::Io)?;
        stream.flush().map_err(Error::Io)
    }

    fn do_close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(Shutdown::Both).ok();
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.accepted && self.stream.is_some()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }
}

/// State shared between the server bootstrap, the acceptor transport, and
/// the accept thread.
pub(crate) struct AcceptorShared {
    pub(crate) parent: Mutex<Option<Channel>>,
    pub(crate) child_initializer: ChildInitializer,
    pub(crate) read_buffer_size: usize,
    pub(crate) local_addr: Mutex<Option<SocketAddr>>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) wg: WaitGroup,
}

impl AcceptorShared {
    /// Stops the accept loop: raises the flag and pokes the listener with
    /// a throwaway connection so `accept` returns.
    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(addr) = *self.local_addr.lock().unwrap() {
            let _ = TcpStream::connect(addr);
        }
    }
}

/// TCP capability record for server channels. Connect, disconnect and
/// flush stay on the rejecting defaults.
pub struct AcceptorTransport {
    shared: Arc<AcceptorShared>,
    feed: Option<ChannelFeed>,
}

impl AcceptorTransport {
    pub(crate) fn new(shared: Arc<AcceptorShared>) -> Self {
        Self { shared, feed: None }
    }
}

impl Transport for AcceptorTransport {
    fn attach(&mut self, feed: ChannelFeed) {
        self.feed = Some(feed);
    }

    fn do_bind(&mut self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).map_err(Error::Io)?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;
        *self.shared.local_addr.lock().unwrap() = Some(local_addr);

        let shared = Arc::clone(&self.shared);
        let event_loop = self
            .feed
            .as_ref()
            .expect("transport attached before bind")
            .event_loop()
            .clone();
        let worker = shared.wg.add(1);
        thread::Builder::new()
            .name(format!("gyre-tcp-acceptor-{}", local_addr.port()))
            .spawn(move || {
                run_acceptor(listener, shared, event_loop);
                worker.done();
            })
            .map_err(Error::Io)?;
        Ok(())
    }

    fn do_close(&mut self) -> Result<()> {
        self.shared.shutdown();
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap()
    }
}

fn run_acceptor(listener: TcpListener, shared: Arc<AcceptorShared>, event_loop: gyre::EventLoop) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if shared.shutdown.load(Ordering::Acquire) {
                    trace!("acceptor draining wake-up connection from {}", peer_addr);
                    break;
                }
                let parent = match shared.parent.lock().unwrap().clone() {
                    Some(parent) => parent,
                    None => {
                        warn!("accepted {} before the server channel was wired", peer_addr);
                        continue;
                    }
                };
                trace!("accepted connection from {}", peer_addr);
                stream.set_nodelay(true).ok();
                let initializer = Arc::clone(&shared.child_initializer);
                let child = Channel::child_of(
                    &parent,
                    StreamTransport::accepted(stream, shared.read_buffer_size)
                        .with_wait_group(shared.wg.clone()),
                    move |pipeline| initializer(pipeline),
                );
                child.register(&event_loop);
            }
            Err(err) => {
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                warn!("listener accept error: {}", err);
                break;
            }
        }
    }
    trace!("acceptor thread exiting");
}
