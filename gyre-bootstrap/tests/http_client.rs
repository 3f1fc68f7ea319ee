//! The HTTP client codec against a minimal scripted HTTP server over
//! loopback TCP.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gyre::{EventLoop, Handler, HandlerContext};
use gyre_bootstrap::Bootstrap;
use gyre_codec::{HttpChunk, HttpClientCodec, HttpRequest, HttpResponse};

/// Collects decoded responses and body chunks.
struct ResponseCollector {
    responses: Arc<Mutex<Vec<(u16, Vec<u8>)>>>,
    body: Arc<Mutex<Vec<u8>>>,
    complete: Arc<Mutex<usize>>,
}

impl Handler for ResponseCollector {
    fn name(&self) -> &str {
        "response-collector"
    }

    fn inbound_updated(&mut self, ctx: &HandlerContext) {
        while let Some(msg) = ctx.inbound().pop_message() {
            let msg = match msg.downcast::<HttpResponse>() {
                Ok(response) => {
                    self.responses
                        .lock()
                        .unwrap()
                        .push((response.status.as_u16(), response.content.to_vec()));
                    if !response.is_chunked() {
                        *self.complete.lock().unwrap() += 1;
                    }
                    continue;
                }
                Err(msg) => msg,
            };
            if let Ok(chunk) = msg.downcast::<HttpChunk>() {
                if chunk.is_last() {
                    *self.complete.lock().unwrap() += 1;
                } else {
                    self.body.lock().unwrap().extend_from_slice(&chunk.data);
                }
            }
        }
    }
}

fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    pred()
}

/// One-shot HTTP server: reads a request head, writes `response`, closes.
fn scripted_server(response: &'static [u8]) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let mut head = Vec::new();
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        head.extend_from_slice(&buf[..n]);
                        if head.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            stream.write_all(response).unwrap();
            stream.flush().unwrap();
        }
    });
    addr
}

#[test]
fn get_with_fixed_length_response() {
    let addr = scripted_server(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");

    let event_loop = EventLoop::new();
    let responses = Arc::new(Mutex::new(Vec::new()));
    let body = Arc::new(Mutex::new(Vec::new()));
    let complete = Arc::new(Mutex::new(0));

    let mut bootstrap = Bootstrap::new(event_loop.clone());
    let (r, b, c) = (
        Arc::clone(&responses),
        Arc::clone(&body),
        Arc::clone(&complete),
    );
    bootstrap.pipeline(move |pipeline| {
        pipeline.add_back(HttpClientCodec::new());
        pipeline.add_back(ResponseCollector {
            responses: Arc::clone(&r),
            body: Arc::clone(&b),
            complete: Arc::clone(&c),
        });
    });

    let channel = bootstrap.connect(addr).unwrap();
    let mut request = HttpRequest::get("/greeting");
    request
        .headers
        .insert(http::header::HOST, "localhost".parse().unwrap());
    channel.write_and_flush(request).wait();

    assert!(wait_until(Duration::from_secs(5), || {
        *complete.lock().unwrap() == 1
    }));
    let responses = responses.lock().unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].0, 200);
    assert_eq!(responses[0].1, b"hello world");

    bootstrap.graceful_stop();
    event_loop.shutdown();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}

#[test]
fn get_with_chunked_response() {
    let addr = scripted_server(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          6\r\nstream\r\n3\r\ning\r\n0\r\n\r\n",
    );

    let event_loop = EventLoop::new();
    let responses = Arc::new(Mutex::new(Vec::new()));
    let body = Arc::new(Mutex::new(Vec::new()));
    let complete = Arc::new(Mutex::new(0));

    let mut bootstrap = Bootstrap::new(event_loop.clone());
    let (r, b, c) = (
        Arc::clone(&responses),
        Arc::clone(&body),
        Arc::clone(&complete),
    );
    bootstrap.pipeline(move |pipeline| {
        pipeline.add_back(HttpClientCodec::new());
        pipeline.add_back(ResponseCollector {
            responses: Arc::clone(&r),
            body: Arc::clone(&b),
            complete: Arc::clone(&c),
        });
    });

    let channel = bootstrap.connect(addr).unwrap();
    channel.write_and_flush(HttpRequest::get("/stream")).wait();

    assert!(wait_until(Duration::from_secs(5), || {
        *complete.lock().unwrap() == 1
    }));
    assert_eq!(responses.lock().unwrap()[0].0, 200);
    assert_eq!(body.lock().unwrap().as_slice(), b"streaming");

    bootstrap.graceful_stop();
    event_loop.shutdown();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}
