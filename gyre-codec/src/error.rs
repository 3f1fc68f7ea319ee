//! Codec error types.

use thiserror::Error;

/// Malformed HTTP surfaced by the response decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The status line did not terminate within the configured limit.
    #[error("initial line exceeds {limit} bytes")]
    InitialLineTooLong {
        /// Configured `max_initial_line_length`.
        limit: usize,
    },

    /// The header block did not terminate within the configured limit.
    #[error("header block exceeds {limit} bytes")]
    HeadersTooLarge {
        /// Configured `max_header_size`.
        limit: usize,
    },

    /// The response head failed to parse.
    #[error("malformed response head: {0}")]
    Malformed(#[from] httparse::Error),

    /// A header carried a name or value `http` rejects.
    #[error("invalid header in response")]
    InvalidHeader,

    /// The status code was outside the representable range.
    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    /// `Content-Length` was present but not a valid length.
    #[error("invalid content-length header")]
    InvalidContentLength,

    /// A chunk-size line was malformed or overlong.
    #[error("invalid chunk size line")]
    InvalidChunkSize,

    /// Chunk data was not followed by CRLF.
    #[error("invalid chunk delimiter")]
    InvalidChunkDelimiter,
}

/// The channel went inactive while responses were still owed.
#[derive(Debug, Error)]
#[error("channel gone inactive with {missing} missing response(s)")]
pub struct PrematureClosure {
    /// Number of requests whose responses never arrived.
    pub missing: i64,
}
