//! End-to-end client codec behavior through a standalone pipeline.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::BytesMut;
use gyre::{Handler, HandlerContext, Pipeline};
use gyre_codec::{HttpChunk, HttpClientCodec, HttpRequest, HttpResponse};
use http::Method;

/// What the application handler above the codec observed.
#[derive(Debug)]
enum Seen {
    Response { status: u16, chunked: bool, content: Vec<u8> },
    Chunk { data: Vec<u8>, last: bool },
    Raw(Vec<u8>),
    Exception(String),
}

struct Sink {
    seen: Rc<RefCell<Vec<Seen>>>,
}

impl Handler for Sink {
    fn name(&self) -> &str {
        "sink"
    }

    fn exception_caught(&mut self, _ctx: &HandlerContext, cause: Box<dyn std::error::Error>) {
        self.seen
            .borrow_mut()
            .push(Seen::Exception(cause.to_string()));
    }

    fn inbound_updated(&mut self, ctx: &HandlerContext) {
        while let Some(msg) = ctx.inbound().pop_message() {
            let msg = match msg.downcast::<HttpResponse>() {
                Ok(response) => {
                    self.seen.borrow_mut().push(Seen::Response {
                        status: response.status.as_u16(),
                        chunked: response.is_chunked(),
                        content: response.content.to_vec(),
                    });
                    continue;
                }
                Err(msg) => msg,
            };
            let msg = match msg.downcast::<HttpChunk>() {
                Ok(chunk) => {
                    self.seen.borrow_mut().push(Seen::Chunk {
                        data: chunk.data.to_vec(),
                        last: chunk.is_last(),
                    });
                    continue;
                }
                Err(msg) => msg,
            };
            match msg.downcast::<BytesMut>() {
                Ok(data) => self.seen.borrow_mut().push(Seen::Raw(data.to_vec())),
                Err(_) => panic!("unexpected inbound message type"),
            }
        }
    }
}

fn client_pipeline(codec: HttpClientCodec) -> (Pipeline, Rc<RefCell<Vec<Seen>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let pipeline = Pipeline::new();
    pipeline.add_back(codec);
    pipeline.add_back(Sink {
        seen: Rc::clone(&seen),
    });
    pipeline.finalize();
    (pipeline, seen)
}

#[test]
fn correlates_requests_with_responses() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (pipeline, seen) = client_pipeline(HttpClientCodec::new());

    pipeline.write(Box::new(HttpRequest::get("/a")));
    pipeline.write(Box::new(HttpRequest::get("/b")));
    let wire = pipeline.drain_sink_bytes();
    let text = std::str::from_utf8(&wire).unwrap();
    assert!(text.starts_with("GET /a HTTP/1.1\r\n"));
    assert!(text.contains("GET /b HTTP/1.1\r\n"));

    // Both responses arrive pipelined in one read.
    pipeline.feed_inbound_bytes(
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\naa\
          HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
    );

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert!(
        matches!(&seen[0], Seen::Response { status: 200, chunked: false, content } if content == b"aa")
    );
    assert!(
        matches!(&seen[1], Seen::Response { status: 404, chunked: false, content } if content.is_empty())
    );
}

#[test]
fn head_responses_are_empty_bodied_despite_headers() {
    let (pipeline, seen) = client_pipeline(HttpClientCodec::new());

    pipeline.write(Box::new(HttpRequest::new(Method::HEAD, "/doc")));
    pipeline.drain_sink_bytes();

    // Content-Length describes the GET-equivalent body; none follows.
    pipeline.feed_inbound_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n");

    {
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(matches!(
            &seen[0],
            Seen::Response { status: 200, chunked: false, content } if content.is_empty()
        ));
    }

    // The decoder is back at message start: a second exchange works.
    pipeline.write(Box::new(HttpRequest::get("/next")));
    pipeline.drain_sink_bytes();
    pipeline.feed_inbound_bytes(b"HTTP/1.1 204 No Content\r\n\r\n");
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn hundred_continue_does_not_consume_a_queued_method() {
    let (pipeline, seen) = client_pipeline(HttpClientCodec::new());

    pipeline.write(Box::new(HttpRequest::new(Method::HEAD, "/upload")));
    pipeline.drain_sink_bytes();

    pipeline.feed_inbound_bytes(b"HTTP/1.1 100 Continue\r\n\r\n");
    // The real response still sees the HEAD method in the queue.
    pipeline.feed_inbound_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n");

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert!(matches!(&seen[0], Seen::Response { status: 100, .. }));
    assert!(matches!(
        &seen[1],
        Seen::Response { status: 200, content, .. } if content.is_empty()
    ));
}

#[test]
fn connect_200_switches_to_tunnel_passthrough() {
    let (pipeline, seen) = client_pipeline(HttpClientCodec::new());

    pipeline.write(Box::new(HttpRequest::new(
        Method::CONNECT,
        "example.com:443",
    )));
    let wire = pipeline.drain_sink_bytes();
    assert!(wire.starts_with(b"CONNECT example.com:443 HTTP/1.1\r\n"));

    pipeline.feed_inbound_bytes(b"HTTP/1.1 200 Connection Established\r\n\r\n");
    // Everything after the 200 is opaque tunnel traffic, even when it
    // looks like HTTP.
    pipeline.feed_inbound_bytes(b"\x16\x03\x01\x02\x00rawtls");
    pipeline.feed_inbound_bytes(b"HTTP/1.1 200 OK\r\n\r\n");

    {
        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(matches!(&seen[0], Seen::Response { status: 200, .. }));
        assert!(matches!(&seen[1], Seen::Raw(data) if data == b"\x16\x03\x01\x02\x00rawtls"));
        assert!(matches!(&seen[2], Seen::Raw(data) if data.starts_with(b"HTTP/1.1 200 OK")));
    }

    // Outbound raw bytes pass through unencoded too.
    pipeline.write(Box::new(BytesMut::from(&b"tunnel-out"[..])));
    assert_eq!(&pipeline.drain_sink_bytes()[..], b"tunnel-out");
}

#[test]
fn chunked_responses_stream_through_as_chunks() {
    let (pipeline, seen) =
        client_pipeline(HttpClientCodec::with_options(4096, 8192, 8192, true));

    pipeline.write(Box::new(HttpRequest::get("/stream")));
    pipeline.drain_sink_bytes();

    pipeline.feed_inbound_bytes(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n",
    );

    let seen = seen.borrow();
    assert_eq!(seen.len(), 4);
    assert!(matches!(&seen[0], Seen::Response { chunked: true, .. }));
    assert!(matches!(&seen[1], Seen::Chunk { data, last: false } if data == b"wiki"));
    assert!(matches!(&seen[2], Seen::Chunk { data, last: false } if data == b"pedia"));
    assert!(matches!(&seen[3], Seen::Chunk { data: _, last: true }));
}

#[test]
fn chunked_requests_count_once_at_the_last_chunk() {
    let (pipeline, seen) =
        client_pipeline(HttpClientCodec::with_options(4096, 8192, 8192, true));

    let mut request = HttpRequest::new(Method::POST, "/upload");
    request.set_chunked(true);
    pipeline.write(Box::new(request));
    pipeline.write(Box::new(HttpChunk::data(&b"part one"[..])));
    pipeline.write(Box::new(HttpChunk::data(&b"part two"[..])));
    pipeline.write(Box::new(HttpChunk::last()));

    let wire = pipeline.drain_sink_bytes();
    let text = std::str::from_utf8(&wire).unwrap();
    assert!(text.contains("transfer-encoding: chunked"));
    assert!(text.ends_with("0\r\n\r\n"));

    // One complete response balances the one finished request: closing
    // the channel afterwards raises nothing.
    pipeline.feed_inbound_bytes(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n");
    pipeline.fire_channel_inactive();
    assert!(!seen
        .borrow()
        .iter()
        .any(|s| matches!(s, Seen::Exception(_))));
}

#[test]
fn premature_closure_names_the_missing_response_count() {
    let (pipeline, seen) =
        client_pipeline(HttpClientCodec::with_options(4096, 8192, 8192, true));

    pipeline.write(Box::new(HttpRequest::get("/one")));
    pipeline.write(Box::new(HttpRequest::get("/two")));
    pipeline.drain_sink_bytes();

    // Channel dies with zero responses delivered.
    pipeline.fire_channel_inactive();

    let seen = seen.borrow();
    let exceptions: Vec<&String> = seen
        .iter()
        .filter_map(|s| match s {
            Seen::Exception(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(
        exceptions[0],
        "channel gone inactive with 2 missing response(s)"
    );
}

#[test]
fn balanced_exchanges_raise_no_premature_closure() {
    let (pipeline, seen) =
        client_pipeline(HttpClientCodec::with_options(4096, 8192, 8192, true));

    for i in 0..3 {
        pipeline.write(Box::new(HttpRequest::get(format!("/{}", i))));
    }
    pipeline.drain_sink_bytes();
    for _ in 0..3 {
        pipeline.feed_inbound_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    }
    pipeline.fire_channel_inactive();

    let seen = seen.borrow();
    assert_eq!(
        seen.iter()
            .filter(|s| matches!(s, Seen::Response { .. }))
            .count(),
        3
    );
    assert!(!seen.iter().any(|s| matches!(s, Seen::Exception(_))));
}

#[test]
fn read_until_close_body_completes_on_inactive() {
    let (pipeline, seen) =
        client_pipeline(HttpClientCodec::with_options(4096, 8192, 8192, true));

    pipeline.write(Box::new(HttpRequest::get("/legacy")));
    pipeline.drain_sink_bytes();

    // No framing headers: body runs to connection close.
    pipeline.feed_inbound_bytes(b"HTTP/1.1 200 OK\r\n\r\nsome old body");
    pipeline.fire_channel_inactive();

    let seen = seen.borrow();
    assert!(matches!(&seen[0], Seen::Response { chunked: true, .. }));
    assert!(matches!(&seen[1], Seen::Chunk { data, last: false } if data == b"some old body"));
    assert!(matches!(&seen[2], Seen::Chunk { last: true, .. }));
    // The close completed the response, so nothing is missing.
    assert!(!seen.iter().any(|s| matches!(s, Seen::Exception(_))));
}

#[test]
fn decode_errors_surface_as_exception_events() {
    let (pipeline, seen) = client_pipeline(HttpClientCodec::with_options(16, 8192, 8192, false));

    pipeline.write(Box::new(HttpRequest::get("/")));
    pipeline.drain_sink_bytes();
    pipeline.feed_inbound_bytes(b"HTTP/1.1 200 this-status-line-never-ends-and-keeps-going");

    let seen = seen.borrow();
    assert!(matches!(&seen[0], Seen::Exception(text) if text.contains("initial line")));
}
