//! HTTP/1.1 message types carried through the pipeline.
//!
//! A message with `is_chunked() == true` announces that its body follows
//! as a series of [`HttpChunk`]s terminated by a chunk whose
//! [`is_last`](HttpChunk::is_last) is true. A non-chunked message carries
//! its whole body in `content`.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Request target as written on the request line.
    pub uri: String,
    /// Protocol version.
    pub version: Version,
    /// Request headers.
    pub headers: HeaderMap,
    /// Body for non-chunked requests.
    pub content: Bytes,
    chunked: bool,
}

impl HttpRequest {
    /// Creates a bodiless HTTP/1.1 request.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            content: Bytes::new(),
            chunked: false,
        }
    }

    /// `GET` convenience constructor.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Whether the body follows as separate chunks.
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Marks the body as chunk-delivered.
    pub fn set_chunked(&mut self, chunked: bool) {
        self.chunked = chunked;
    }
}

/// An inbound HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Protocol version.
    pub version: Version,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body for non-chunked responses.
    pub content: Bytes,
    chunked: bool,
}

impl HttpResponse {
    /// Creates a bodiless HTTP/1.1 response.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            content: Bytes::new(),
            chunked: false,
        }
    }

    /// Whether the body follows as separate chunks.
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Marks the body as chunk-delivered.
    pub fn set_chunked(&mut self, chunked: bool) {
        self.chunked = chunked;
    }
}

/// One slice of a chunk-delivered body. A chunk with `is_last() == true`
/// terminates the body; it carries no data.
#[derive(Debug, Clone)]
pub struct HttpChunk {
    /// Chunk payload; empty for the terminal chunk.
    pub data: Bytes,
    last: bool,
}

impl HttpChunk {
    /// Creates a data chunk.
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            last: false,
        }
    }

    /// Creates the terminal chunk.
    pub fn last() -> Self {
        Self {
            data: Bytes::new(),
            last: true,
        }
    }

    /// Whether this chunk terminates the body.
    pub fn is_last(&self) -> bool {
        self.last
    }
}

/// A decoded unit produced by the response decoder.
#[derive(Debug)]
pub enum HttpObject {
    /// Response head (with body attached when non-chunked).
    Response(HttpResponse),
    /// Body slice of a chunk-delivered response.
    Chunk(HttpChunk),
}
