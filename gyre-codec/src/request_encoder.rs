//! HTTP/1.1 request encoder.

use bytes::BytesMut;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::Version;

use crate::message::{HttpChunk, HttpRequest};

/// Encodes [`HttpRequest`]s and their body [`HttpChunk`]s into wire
/// bytes. The encoder remembers whether the request in flight was chunked
/// so it knows how to frame subsequent chunks.
#[derive(Default)]
pub struct HttpRequestEncoder {
    chunked_mode: bool,
}

impl HttpRequestEncoder {
    /// Creates an encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the request line, headers, and any inline body. Missing
    /// framing headers are filled in from the request's body shape.
    pub fn encode_request(&mut self, request: &HttpRequest, out: &mut BytesMut) {
        out.extend_from_slice(request.method.as_str().as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(request.uri.as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(version_text(request.version));
        out.extend_from_slice(b"\r\n");

        for (name, value) in request.headers.iter() {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if request.is_chunked() && !request.headers.contains_key(TRANSFER_ENCODING) {
            out.extend_from_slice(b"transfer-encoding: chunked\r\n");
        }
        if !request.is_chunked()
            && !request.content.is_empty()
            && !request.headers.contains_key(CONTENT_LENGTH)
        {
            out.extend_from_slice(
                format!("content-length: {}\r\n", request.content.len()).as_bytes(),
            );
        }
        out.extend_from_slice(b"\r\n");

        if !request.is_chunked() {
            out.extend_from_slice(&request.content);
        }
        self.chunked_mode = request.is_chunked();
    }

    /// Writes one body chunk. In chunked mode each chunk carries its hex
    /// size line and the terminal chunk emits the `0\r\n\r\n` trailer;
    /// otherwise chunk data passes through verbatim.
    pub fn encode_chunk(&mut self, chunk: &HttpChunk, out: &mut BytesMut) {
        if !self.chunked_mode {
            out.extend_from_slice(&chunk.data);
            return;
        }
        if chunk.is_last() {
            out.extend_from_slice(b"0\r\n\r\n");
            self.chunked_mode = false;
            return;
        }
        if chunk.data.is_empty() {
            return;
        }
        out.extend_from_slice(format!("{:x}\r\n", chunk.data.len()).as_bytes());
        out.extend_from_slice(&chunk.data);
        out.extend_from_slice(b"\r\n");
    }
}

fn version_text(version: Version) -> &'static [u8] {
    match version {
        Version::HTTP_10 => b"HTTP/1.0",
        _ => b"HTTP/1.1",
    }
}
