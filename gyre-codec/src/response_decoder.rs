//! Incremental HTTP/1.1 response decoder.
//!
//! The decoder consumes from a `BytesMut` and yields at most one
//! [`HttpObject`] per call, returning `Ok(None)` when it needs more input.
//! Body framing is decided when the head completes:
//!
//! - the [`ContentPolicy`] hook may declare the body empty (the client
//!   codec hooks HEAD/CONNECT handling in here);
//! - `Transfer-Encoding: chunked` bodies and fixed bodies larger than
//!   `max_chunk_size` are delivered as [`HttpChunk`]s capped at
//!   `max_chunk_size`, terminated by a last chunk;
//! - small fixed bodies are aggregated into the response's `content`;
//! - responses with no framing information are read until close;
//!   [`finish`](HttpResponseDecoder::finish) emits their terminal chunk.
//!
//! Every response therefore terminates with exactly one of: a non-chunked
//! [`HttpResponse`], or an [`HttpChunk`] whose `is_last()` is true.

use bytes::Buf;
use bytes::BytesMut;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode, Version};
use log::trace;

use crate::error::DecodeError;
use crate::message::{HttpChunk, HttpObject, HttpResponse};

const MAX_HEADERS: usize = 64;

/// Hook consulted with each parsed response head; returning `true`
/// declares the body empty regardless of headers.
pub type ContentPolicy = Box<dyn FnMut(&HttpResponse) -> bool>;

/// The decoder's built-in body-presence heuristic: informational, `204`
/// and `304` responses never carry a body. Custom policies fall through to
/// this.
pub fn default_content_always_empty(response: &HttpResponse) -> bool {
    response.status.is_informational()
        || response.status == StatusCode::NO_CONTENT
        || response.status == StatusCode::NOT_MODIFIED
}

enum DecodeState {
    ReadHead,
    ReadFixedContent {
        response: Box<HttpResponse>,
        remaining: usize,
    },
    ReadFixedChunks {
        remaining: u64,
    },
    ReadChunkSize,
    ReadChunkData {
        remaining: u64,
    },
    ReadChunkDelimiter,
    ReadChunkFooter,
    ReadUntilClose,
}

/// Streaming HTTP/1.1 response decoder.
pub struct HttpResponseDecoder {
    max_initial_line_length: usize,
    max_header_size: usize,
    max_chunk_size: usize,
    policy: ContentPolicy,
    state: DecodeState,
}

impl HttpResponseDecoder {
    /// Creates a decoder with the default content policy.
    pub fn new(
        max_initial_line_length: usize,
        max_header_size: usize,
        max_chunk_size: usize,
    ) -> Self {
        Self::with_policy(
            max_initial_line_length,
            max_header_size,
            max_chunk_size,
            Box::new(default_content_always_empty),
        )
    }

    /// Creates a decoder with a custom content policy.
    pub fn with_policy(
        max_initial_line_length: usize,
        max_header_size: usize,
        max_chunk_size: usize,
        policy: ContentPolicy,
    ) -> Self {
        Self {
            max_initial_line_length,
            max_header_size,
            max_chunk_size,
            policy,
            state: DecodeState::ReadHead,
        }
    }

    /// Decodes the next object from `src`, or `Ok(None)` when more input
    /// is needed.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HttpObject>, DecodeError> {
        loop {
            match std::mem::replace(&mut self.state, DecodeState::ReadHead) {
                DecodeState::ReadHead => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    match self.decode_head(src)? {
                        Some(object) => return Ok(Some(object)),
                        // Head complete, body aggregation pending.
                        None if matches!(self.state, DecodeState::ReadFixedContent { .. }) => {
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                DecodeState::ReadFixedContent {
                    mut response,
                    remaining,
                } => {
                    if src.len() < remaining {
                        self.state = DecodeState::ReadFixedContent {
                            response,
                            remaining,
                        };
                        return Ok(None);
                    }
                    response.content = src.split_to(remaining).freeze();
                    return Ok(Some(HttpObject::Response(*response)));
                }
                DecodeState::ReadFixedChunks { remaining } => {
                    if remaining == 0 {
                        return Ok(Some(HttpObject::Chunk(HttpChunk::last())));
                    }
                    if src.is_empty() {
                        self.state = DecodeState::ReadFixedChunks { remaining };
                        return Ok(None);
                    }
                    let take = src
                        .len()
                        .min(self.max_chunk_size)
                        .min(remaining as usize);
                    let data = src.split_to(take).freeze();
                    self.state = DecodeState::ReadFixedChunks {
                        remaining: remaining - take as u64,
                    };
                    return Ok(Some(HttpObject::Chunk(HttpChunk::data(data))));
                }
                DecodeState::ReadChunkSize => {
                    let line_end = match find_crlf(src) {
                        Some(pos) => pos,
                        None => {
                            if src.len() > self.max_initial_line_length {
                                return Err(DecodeError::InvalidChunkSize);
                            }
                            self.state = DecodeState::ReadChunkSize;
                            return Ok(None);
                        }
                    };
                    let size = parse_chunk_size(&src[..line_end])?;
                    src.advance(line_end + 2);
                    if size == 0 {
                        self.state = DecodeState::ReadChunkFooter;
                    } else {
                        self.state = DecodeState::ReadChunkData { remaining: size };
                    }
                }
                DecodeState::ReadChunkData { remaining } => {
                    if src.is_empty() {
                        self.state = DecodeState::ReadChunkData { remaining };
                        return Ok(None);
                    }
                    let take = src
                        .len()
                        .min(self.max_chunk_size)
                        .min(remaining as usize);
                    let data = src.split_to(take).freeze();
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        DecodeState::ReadChunkDelimiter
                    } else {
                        DecodeState::ReadChunkData { remaining }
                    };
                    return Ok(Some(HttpObject::Chunk(HttpChunk::data(data))));
                }
                DecodeState::ReadChunkDelimiter => {
                    if src.len() < 2 {
                        self.state = DecodeState::ReadChunkDelimiter;
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(DecodeError::InvalidChunkDelimiter);
                    }
                    src.advance(2);
                    self.state = DecodeState::ReadChunkSize;
                }
                DecodeState::ReadChunkFooter => {
                    let line_end = match find_crlf(src) {
                        Some(pos) => pos,
                        None => {
                            if src.len() > self.max_header_size {
                                return Err(DecodeError::HeadersTooLarge {
                                    limit: self.max_header_size,
                                });
                            }
                            self.state = DecodeState::ReadChunkFooter;
                            return Ok(None);
                        }
                    };
                    let blank = line_end == 0;
                    if !blank {
                        trace!("ignoring response trailer line");
                    }
                    src.advance(line_end + 2);
                    if blank {
                        return Ok(Some(HttpObject::Chunk(HttpChunk::last())));
                    }
                    self.state = DecodeState::ReadChunkFooter;
                }
                DecodeState::ReadUntilClose => {
                    if src.is_empty() {
                        self.state = DecodeState::ReadUntilClose;
                        return Ok(None);
                    }
                    let take = src.len().min(self.max_chunk_size);
                    let data = src.split_to(take).freeze();
                    self.state = DecodeState::ReadUntilClose;
                    return Ok(Some(HttpObject::Chunk(HttpChunk::data(data))));
                }
            }
        }
    }

    /// Signals end-of-stream. Emits the terminal chunk of a body that was
    /// being read until close; any other mid-message state is abandoned.
    pub fn finish(&mut self) -> Option<HttpObject> {
        match std::mem::replace(&mut self.state, DecodeState::ReadHead) {
            DecodeState::ReadUntilClose => Some(HttpObject::Chunk(HttpChunk::last())),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Parses the head, decides body framing, and either emits the
    /// response or leaves a `ReadFixedContent` aggregation pending
    /// (signalled by returning `None` with the state set).
    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Option<HttpObject>, DecodeError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut slots);
        let head_len = match parsed.parse(&src[..])? {
            httparse::Status::Complete(head_len) => head_len,
            httparse::Status::Partial => {
                self.enforce_head_limits(src, src.len())?;
                return Ok(None);
            }
        };
        self.enforce_head_limits(src, head_len)?;

        let code = parsed.code.expect("complete head has a status code");
        let status =
            StatusCode::from_u16(code).map_err(|_| DecodeError::InvalidStatus(code))?;
        let version = match parsed.version.expect("complete head has a version") {
            0 => Version::HTTP_10,
            _ => Version::HTTP_11,
        };
        let mut headers = HeaderMap::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| DecodeError::InvalidHeader)?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|_| DecodeError::InvalidHeader)?;
            headers.append(name, value);
        }
        src.advance(head_len);

        let mut response = HttpResponse::new(status);
        response.version = version;
        response.headers = headers;

        if (self.policy)(&response) {
            return Ok(Some(HttpObject::Response(response)));
        }
        if is_transfer_chunked(&response.headers) {
            response.set_chunked(true);
            self.state = DecodeState::ReadChunkSize;
            return Ok(Some(HttpObject::Response(response)));
        }
        match content_length(&response.headers)? {
            Some(0) => Ok(Some(HttpObject::Response(response))),
            Some(length) if length > self.max_chunk_size as u64 => {
                response.set_chunked(true);
                self.state = DecodeState::ReadFixedChunks { remaining: length };
                Ok(Some(HttpObject::Response(response)))
            }
            Some(length) => {
                self.state = DecodeState::ReadFixedContent {
                    response: Box::new(response),
                    remaining: length as usize,
                };
                Ok(None)
            }
            None => {
                response.set_chunked(true);
                self.state = DecodeState::ReadUntilClose;
                Ok(Some(HttpObject::Response(response)))
            }
        }
    }

    fn enforce_head_limits(&self, src: &BytesMut, upto: usize) -> Result<(), DecodeError> {
        let head = &src[..upto];
        match find_crlf(head) {
            None => {
                if head.len() > self.max_initial_line_length {
                    return Err(DecodeError::InitialLineTooLong {
                        limit: self.max_initial_line_length,
                    });
                }
            }
            Some(line_end) => {
                if line_end > self.max_initial_line_length {
                    return Err(DecodeError::InitialLineTooLong {
                        limit: self.max_initial_line_length,
                    });
                }
                if head.len() - line_end > self.max_header_size {
                    return Err(DecodeError::HeadersTooLarge {
                        limit: self.max_header_size,
                    });
                }
            }
        }
        Ok(())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, DecodeError> {
    let size_part = line
        .split(|byte| *byte == b';')
        .next()
        .unwrap_or_default();
    let text = std::str::from_utf8(size_part)
        .map_err(|_| DecodeError::InvalidChunkSize)?
        .trim();
    u64::from_str_radix(text, 16).map_err(|_| DecodeError::InvalidChunkSize)
}

fn is_transfer_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, DecodeError> {
    match headers.get(CONTENT_LENGTH) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|text| text.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or(DecodeError::InvalidContentLength),
    }
}
