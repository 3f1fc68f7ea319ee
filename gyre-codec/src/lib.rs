//! # Gyre Codec - HTTP/1.1 Client Codec
//!
//! `gyre-codec` provides the HTTP/1.1 client-side codec for the gyre
//! pipeline: message types, a request encoder, an incremental response
//! decoder, and the [`HttpClientCodec`] handler that couples them with the
//! state management plain encoder/decoder pairs lack — request/response
//! method correlation, HEAD and CONNECT handling, tunnel pass-through
//! after a successful CONNECT, and optional premature-closure detection.
//!
//! ## Building a client pipeline
//!
//! ```
//! use gyre::Pipeline;
//! use gyre_codec::{HttpClientCodec, HttpRequest};
//!
//! let pipeline = Pipeline::new();
//! pipeline.add_back(HttpClientCodec::new());
//! // pipeline.add_back(your_response_handler);
//! pipeline.finalize();
//!
//! pipeline.write(Box::new(HttpRequest::get("/")));
//! let wire_bytes = pipeline.drain_sink_bytes();
//! assert!(wire_bytes.starts_with(b"GET / HTTP/1.1\r\n"));
//! ```
//!
//! ## Decoded message stream
//!
//! Inbound bytes decode into [`HttpResponse`] messages followed, for
//! chunk-delivered bodies, by [`HttpChunk`]s ending with a terminal chunk.
//! After a `200` response to `CONNECT`, inbound bytes emerge as raw
//! `BytesMut` messages with no HTTP parsing and outbound raw bytes pass
//! through unencoded.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod client_codec;
pub(crate) mod error;
pub(crate) mod message;
pub(crate) mod request_encoder;
pub(crate) mod response_decoder;

/// The paired client codec handler and its tunables.
pub use client_codec::{
    HttpClientCodec, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_HEADER_SIZE,
    DEFAULT_MAX_INITIAL_LINE_LENGTH,
};
/// Codec error types.
pub use error::{DecodeError, PrematureClosure};
/// HTTP message value types.
pub use message::{HttpChunk, HttpObject, HttpRequest, HttpResponse};
/// Standalone request encoder.
pub use request_encoder::HttpRequestEncoder;
/// Standalone response decoder and its body-presence hook.
pub use response_decoder::{default_content_always_empty, ContentPolicy, HttpResponseDecoder};
