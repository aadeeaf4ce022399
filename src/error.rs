//! Error taxonomy for the whole crate.
//!
//! One flat `quick_error!` enum rather than a per-module hierarchy: every
//! fallible operation in a connection's lifetime funnels into a decision
//! of "close the connection" vs. "respond 4xx and keep going", so callers
//! gain little from nested error types and lose a lot of ergonomics.

use std::io;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        PoolExhausted {
            description("connection's memory pool is exhausted")
        }
        BadRequestLine {
            description("malformed request line")
        }
        BadHeaderLine {
            description("malformed header line")
        }
        UnsupportedVersion {
            description("unsupported HTTP version")
        }
        ContentLengthInvalid {
            description("invalid Content-Length header")
        }
        DuplicateContentLength {
            description("duplicate Content-Length header")
        }
        ConflictingBodyLength {
            description("both Content-Length and Transfer-Encoding present")
        }
        ChunkSizeInvalid {
            description("invalid chunk size line")
        }
        RequestTooLarge {
            description("request exceeds the connection's memory pool")
        }
        HeaderTooLarge {
            description("a single header line exceeds the connection's memory pool")
        }
        FirstByteTimeout {
            description("client did not send the first byte of a request in time")
        }
        HeaderTimeout {
            description("client did not finish sending headers in time")
        }
        BodyTimeout {
            description("client did not finish sending the request body in time")
        }
        KeepAliveTimeout {
            description("idle keep-alive connection timed out")
        }
        HandlerPanicked {
            description("request handler panicked")
        }
        NoHandlerMatched {
            description("no handler registered for the request path")
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
