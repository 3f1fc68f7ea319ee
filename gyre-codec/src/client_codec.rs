//! Client-side HTTP codec handler.
//!
//! One bidirectional pipeline handler pairing an [`HttpRequestEncoder`]
//! over outbound messages with an [`HttpResponseDecoder`] over inbound
//! bytes, plus the state neither can manage alone:
//!
//! - a **correlation queue** of in-flight request methods, consumed by the
//!   decoder's body policy so HEAD and CONNECT responses are framed
//!   correctly;
//! - a **tunnel latch**: after a `200` response to `CONNECT` the codec
//!   stops parsing and passes bytes through verbatim in both directions;
//! - an optional **outstanding counter** that, on channel-inactive, fires
//!   a [`PrematureClosure`] naming how many responses never arrived.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use http::Method;
use log::{debug, warn};

use gyre::{Handler, HandlerContext, HolderKind};

use crate::error::PrematureClosure;
use crate::message::{HttpChunk, HttpObject, HttpRequest, HttpResponse};
use crate::request_encoder::HttpRequestEncoder;
use crate::response_decoder::{default_content_always_empty, HttpResponseDecoder};

/// Default `max_initial_line_length`.
pub const DEFAULT_MAX_INITIAL_LINE_LENGTH: usize = 4096;
/// Default `max_header_size`.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8192;
/// Default `max_chunk_size`.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8192;

/// State shared between the handler and the decoder's body policy.
struct CodecShared {
    /// One method per request whose headers went out and whose response
    /// head has not been parsed yet.
    queue: VecDeque<Method>,
    /// Latched after a successful CONNECT; the channel is a raw tunnel.
    done: bool,
}

fn client_body_policy(shared: &Rc<RefCell<CodecShared>>, response: &HttpResponse) -> bool {
    // 100-continue is interim; it does not consume a queued method.
    if response.status.as_u16() == 100 {
        return true;
    }
    let mut shared = shared.borrow_mut();
    let method = match shared.queue.pop_front() {
        Some(method) => method,
        None => {
            // A response can only follow a written request; an empty queue
            // means the peer spoke out of turn.
            warn!("response received with no outstanding request method");
            return default_content_always_empty(response);
        }
    };
    if method == Method::HEAD {
        return true;
    }
    if method == Method::CONNECT && response.status.as_u16() == 200 {
        debug!("CONNECT established; switching to tunnel pass-through");
        shared.done = true;
        shared.queue.clear();
        return true;
    }
    default_content_always_empty(response)
}

/// The client codec pipeline handler: bytes inbound, HTTP messages (or
/// raw bytes once tunnelling) outbound.
pub struct HttpClientCodec {
    shared: Rc<RefCell<CodecShared>>,
    encoder: HttpRequestEncoder,
    decoder: HttpResponseDecoder,
    fail_on_missing_response: bool,
    outstanding: i64,
}

impl Default for HttpClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientCodec {
    /// Creates a codec with the default limits and premature-closure
    /// detection disabled.
    pub fn new() -> Self {
        Self::with_options(
            DEFAULT_MAX_INITIAL_LINE_LENGTH,
            DEFAULT_MAX_HEADER_SIZE,
            DEFAULT_MAX_CHUNK_SIZE,
            false,
        )
    }

    /// Creates a codec with explicit decoder limits and the
    /// fail-on-missing-response switch.
    pub fn with_options(
        max_initial_line_length: usize,
        max_header_size: usize,
        max_chunk_size: usize,
        fail_on_missing_response: bool,
    ) -> Self {
        let shared = Rc::new(RefCell::new(CodecShared {
            queue: VecDeque::new(),
            done: false,
        }));
        let policy_shared = Rc::clone(&shared);
        let decoder = HttpResponseDecoder::with_policy(
            max_initial_line_length,
            max_header_size,
            max_chunk_size,
            Box::new(move |response| client_body_policy(&policy_shared, response)),
        );
        Self {
            shared,
            encoder: HttpRequestEncoder::new(),
            decoder,
            fail_on_missing_response,
            outstanding: 0,
        }
    }

    fn in_tunnel(&self) -> bool {
        self.shared.borrow().done
    }

    /// Applies the outstanding-counter decrement rules to a decoded
    /// object: a non-chunked response or a terminal chunk ends exactly one
    /// response.
    fn account_decoded(&mut self, object: &HttpObject) {
        if !self.fail_on_missing_response {
            return;
        }
        match object {
            HttpObject::Response(response) if !response.is_chunked() => {
                self.outstanding -= 1;
            }
            HttpObject::Chunk(chunk) if chunk.is_last() => {
                self.outstanding -= 1;
            }
            _ => {}
        }
    }

    fn forward(ctx: &HandlerContext, object: HttpObject) {
        if let Some(mut next) = ctx.next_inbound() {
            match object {
                HttpObject::Response(response) => next.push(Box::new(response)),
                HttpObject::Chunk(chunk) => next.push(Box::new(chunk)),
            }
        }
        ctx.fire_inbound_updated();
    }
}

impl Handler for HttpClientCodec {
    fn name(&self) -> &str {
        "http-client-codec"
    }

    fn inbound_kind(&self) -> HolderKind {
        HolderKind::Bytes
    }

    fn outbound_kind(&self) -> HolderKind {
        HolderKind::Messages
    }

    fn inbound_updated(&mut self, ctx: &HandlerContext) {
        loop {
            if self.in_tunnel() {
                // Raw pass-through: no HTTP framing past this point.
                let data = ctx.inbound().take_bytes();
                if !data.is_empty() {
                    if let Some(mut next) = ctx.next_inbound() {
                        next.push(Box::new(data));
                    }
                    ctx.fire_inbound_updated();
                }
                return;
            }
            let decoded = {
                let mut inbound = ctx.inbound();
                self.decoder.decode(inbound.as_bytes_mut())
            };
            match decoded {
                Ok(Some(object)) => {
                    self.account_decoded(&object);
                    Self::forward(ctx, object);
                }
                Ok(None) => return,
                Err(err) => {
                    ctx.fire_exception_caught(Box::new(err));
                    return;
                }
            }
        }
    }

    fn outbound_updated(&mut self, ctx: &HandlerContext) {
        loop {
            let msg = match ctx.outbound().pop_message() {
                Some(msg) => msg,
                None => break,
            };
            let mut encoded = BytesMut::new();
            let msg = match msg.downcast::<HttpRequest>() {
                Ok(request) => {
                    if !self.in_tunnel() {
                        self.shared
                            .borrow_mut()
                            .queue
                            .push_back(request.method.clone());
                    }
                    self.encoder.encode_request(&request, &mut encoded);
                    if self.fail_on_missing_response && !request.is_chunked() {
                        self.outstanding += 1;
                    }
                    ctx.next_outbound().push(Box::new(encoded));
                    continue;
                }
                Err(msg) => msg,
            };
            let msg = match msg.downcast::<HttpChunk>() {
                Ok(chunk) => {
                    self.encoder.encode_chunk(&chunk, &mut encoded);
                    if self.fail_on_missing_response && chunk.is_last() {
                        self.outstanding += 1;
                    }
                    ctx.next_outbound().push(Box::new(encoded));
                    continue;
                }
                Err(msg) => msg,
            };
            let msg = match msg.downcast::<BytesMut>() {
                // Raw bytes (tunnel traffic) pass through untouched.
                Ok(data) => {
                    ctx.next_outbound().push(data);
                    continue;
                }
                Err(msg) => msg,
            };
            match msg.downcast::<Bytes>() {
                Ok(data) => {
                    ctx.next_outbound().push(data);
                }
                Err(msg) => {
                    // Not ours; keep it moving toward the sink.
                    ctx.next_outbound().push(msg);
                }
            }
        }
        ctx.fire_outbound_updated();
    }

    fn channel_inactive(&mut self, ctx: &HandlerContext) {
        // A read-until-close body completes now; that response is no
        // longer missing.
        if let Some(object) = self.decoder.finish() {
            self.account_decoded(&object);
            Self::forward(ctx, object);
        }
        if self.fail_on_missing_response && self.outstanding > 0 {
            ctx.fire_exception_caught(Box::new(PrematureClosure {
                missing: self.outstanding,
            }));
        }
        ctx.fire_channel_inactive();
    }
}
