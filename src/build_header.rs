//! Status-line / header / body-framing state machine for the write side
//! of a connection.
//!
//! This is the same state diagram as a conventional serializer built
//! around a growable output buffer, just retargeted: instead of writing
//! into a socket-backed `Buf`, every `write_*` call here appends into a
//! connection's pool-backed `PoolBuf`, and `add_date` goes through
//! `httpdate` instead of hand-rolled RFC 1123 formatting.

use std::fmt::Display;

use crate::enums::Version;
use crate::pool::{MemoryPool, PoolBuf};

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("header value contains invalid characters")
        }
        TransferEncodingAfterContentLength {
            description("Transfer-Encoding added when Content-Length is already set")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        CantDetermineBodySize {
            description("neither Content-Length nor Transfer-Encoding is present")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set via their own methods")
        }
        RequireBodyless {
            description("this message must not contain a body length field")
        }
        PoolExhausted {
            description("connection's memory pool is exhausted while writing headers")
        }
    }
}

impl From<crate::pool::PoolExhausted> for HeaderError {
    fn from(_: crate::pool::PoolExhausted) -> HeaderError {
        HeaderError::PoolExhausted
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Body {
    Normal,
    Head,
    Denied,
}

#[derive(Debug)]
pub enum MessageState {
    ResponseStart { version: Version, body: Body, close: bool },
    FinalResponseStart { version: Version, body: Body, close: bool },
    Headers { body: Body, close: bool },
    FixedHeaders { is_head: bool, close: bool, content_length: u64 },
    ChunkedHeaders { is_head: bool, close: bool },
    CloseDelimitedHeaders { is_head: bool, close: bool },
    Bodyless,
    FixedBody { is_head: bool, content_length: u64 },
    ChunkedBody { is_head: bool },
    CloseDelimitedBody { is_head: bool },
    Done,
}

fn invalid_header(value: &[u8]) -> bool {
    value.iter().any(|&b| b == b'\r' || b == b'\n')
}

fn append(pool: &mut MemoryPool, buf: &mut PoolBuf, data: &[u8]) -> Result<(), HeaderError> {
    buf.append(pool, data).map_err(|_| HeaderError::PoolExhausted)
}

impl MessageState {
    pub fn new(version: Version, close: bool, is_head: bool) -> MessageState {
        let body = if is_head { Body::Head } else { Body::Normal };
        MessageState::ResponseStart { version, body, close }
    }

    /// Write a 100 (Continue) interim response. The real response follows
    /// in a later `response_status` call against the same buffer.
    pub fn response_continue(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf) -> Result<(), HeaderError> {
        match *self {
            MessageState::ResponseStart { version, body, close } => {
                append(pool, buf, format!("{} 100 Continue\r\n\r\n", version).as_bytes())?;
                *self = MessageState::FinalResponseStart { version, body, close };
                Ok(())
            }
            ref state => panic!("response_continue() called on response in state {:?}", state),
        }
    }

    /// Write the status line. Per the wire format this core targets, the
    /// line carries only the version and code, no reason phrase (unlike
    /// the `100 Continue` interim line, which is a fixed literal).
    pub fn response_status(
        &mut self,
        pool: &mut MemoryPool,
        buf: &mut PoolBuf,
        code: u16,
    ) -> Result<(), HeaderError> {
        match *self {
            MessageState::ResponseStart { version, mut body, close }
            | MessageState::FinalResponseStart { version, mut body, close } => {
                assert!(code != 100, "100 is not a valid final status code");
                append(pool, buf, format!("{} {}\r\n", version, code).as_bytes())?;
                if (100..200).contains(&code) || code == 204 || code == 304 {
                    body = Body::Denied;
                }
                *self = MessageState::Headers { body, close };
                Ok(())
            }
            ref state => panic!("response_status() called on response in state {:?}", state),
        }
    }

    fn write_header(
        &mut self,
        pool: &mut MemoryPool,
        buf: &mut PoolBuf,
        name: &str,
        value: &[u8],
    ) -> Result<(), HeaderError> {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        if invalid_header(value) {
            return Err(HeaderError::InvalidHeaderValue);
        }
        append(pool, buf, name.as_bytes())?;
        append(pool, buf, b": ")?;
        append(pool, buf, value)?;
        append(pool, buf, b"\r\n")?;
        Ok(())
    }

    fn write_formatted<D: Display>(
        &mut self,
        pool: &mut MemoryPool,
        buf: &mut PoolBuf,
        name: &str,
        value: D,
    ) -> Result<(), HeaderError> {
        self.write_header(pool, buf, name, format!("{}", value).as_bytes())
    }

    pub fn add_header(
        &mut self,
        pool: &mut MemoryPool,
        buf: &mut PoolBuf,
        name: &str,
        value: &[u8],
    ) -> Result<(), HeaderError> {
        if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(HeaderError::BodyLengthHeader);
        }
        match *self {
            MessageState::Headers { .. } | MessageState::FixedHeaders { .. } | MessageState::ChunkedHeaders { .. } => {
                self.write_header(pool, buf, name, value)
            }
            ref state => panic!("add_header() called on message in state {:?}", state),
        }
    }

    /// Format the current time as an RFC 1123 `Date` header, via
    /// `httpdate`.
    pub fn add_date(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf) -> Result<(), HeaderError> {
        let now = std::time::SystemTime::now();
        self.write_formatted(pool, buf, "Date", httpdate::fmt_http_date(now))
    }

    pub fn add_length(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf, n: u64) -> Result<(), HeaderError> {
        match *self {
            MessageState::FixedHeaders { .. } => Err(HeaderError::DuplicateContentLength),
            MessageState::ChunkedHeaders { .. } => Err(HeaderError::ContentLengthAfterTransferEncoding),
            MessageState::Headers { body: Body::Denied, .. } => Err(HeaderError::RequireBodyless),
            MessageState::Headers { body, close } => {
                self.write_formatted(pool, buf, "Content-Length", n)?;
                *self = MessageState::FixedHeaders { is_head: body == Body::Head, close, content_length: n };
                Ok(())
            }
            ref state => panic!("add_length() called on message in state {:?}", state),
        }
    }

    pub fn add_chunked(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf) -> Result<(), HeaderError> {
        match *self {
            MessageState::FixedHeaders { .. } => Err(HeaderError::TransferEncodingAfterContentLength),
            MessageState::ChunkedHeaders { .. } => Err(HeaderError::DuplicateTransferEncoding),
            MessageState::Headers { body: Body::Denied, .. } => Err(HeaderError::RequireBodyless),
            MessageState::Headers { body, close } => {
                self.write_header(pool, buf, "Transfer-Encoding", b"chunked")?;
                *self = MessageState::ChunkedHeaders { is_head: body == Body::Head, close };
                Ok(())
            }
            ref state => panic!("add_chunked() called on message in state {:?}", state),
        }
    }

    /// Declare that the body is framed implicitly by the connection
    /// closing once the writer is done with it: no `Content-Length`, no
    /// `Transfer-Encoding`. Only sound when `close` is already set on
    /// this message, since that's the only way the peer can find the
    /// end of the body — callers must force `close` themselves before
    /// reaching for this (an unknown-length body, e.g. from a callback
    /// whose total output isn't known up front).
    pub fn add_close_delimited(&mut self, _pool: &mut MemoryPool, _buf: &mut PoolBuf) -> Result<(), HeaderError> {
        match *self {
            MessageState::Headers { body: Body::Denied, .. } => Err(HeaderError::RequireBodyless),
            MessageState::Headers { body, close } => {
                *self = MessageState::CloseDelimitedHeaders { is_head: body == Body::Head, close };
                Ok(())
            }
            ref state => panic!("add_close_delimited() called on message in state {:?}", state),
        }
    }

    /// Record that `n` bytes of body were written straight to the
    /// socket, bypassing `buf` entirely (used when streaming a callback-
    /// or file-backed response so an arbitrarily long body never has to
    /// fit inside the connection's fixed-size pool). Mirrors
    /// `write_body`'s length bookkeeping without touching the buffer.
    pub fn note_streamed_bytes(&mut self, n: u64) {
        match self {
            MessageState::FixedBody { content_length, .. } => {
                assert!(
                    n <= *content_length,
                    "fixed size response overflow: {} bytes left, got {} more",
                    content_length,
                    n
                );
                *content_length -= n;
            }
            MessageState::ChunkedBody { .. } | MessageState::CloseDelimitedBody { .. } => {}
            ref state => panic!("note_streamed_bytes() called on message in state {:?}", state),
        }
    }

    pub fn is_started(&self) -> bool {
        !matches!(
            *self,
            MessageState::ResponseStart { .. } | MessageState::FinalResponseStart { .. }
        )
    }

    pub fn done_headers(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf) -> Result<bool, HeaderError> {
        if matches!(
            *self,
            MessageState::Headers { close: true, .. }
                | MessageState::FixedHeaders { close: true, .. }
                | MessageState::ChunkedHeaders { close: true, .. }
                | MessageState::CloseDelimitedHeaders { close: true, .. }
        ) {
            self.write_header(pool, buf, "Connection", b"close")?;
        }
        let expect_body = match *self {
            MessageState::Headers { body: Body::Denied, .. } => {
                *self = MessageState::Bodyless;
                false
            }
            MessageState::Headers { body: Body::Normal, .. } | MessageState::Headers { body: Body::Head, .. } => {
                return Err(HeaderError::CantDetermineBodySize);
            }
            MessageState::FixedHeaders { is_head, content_length, .. } => {
                *self = MessageState::FixedBody { is_head, content_length };
                !is_head
            }
            MessageState::ChunkedHeaders { is_head, .. } => {
                *self = MessageState::ChunkedBody { is_head };
                !is_head
            }
            MessageState::CloseDelimitedHeaders { is_head, .. } => {
                *self = MessageState::CloseDelimitedBody { is_head };
                !is_head
            }
            ref state => panic!("done_headers() called on message in state {:?}", state),
        };
        append(pool, buf, b"\r\n")?;
        Ok(expect_body)
    }

    pub fn write_body(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf, data: &[u8]) {
        match *self {
            MessageState::Bodyless => panic!("message must not contain a body"),
            MessageState::FixedBody { is_head, ref mut content_length } => {
                assert!(
                    data.len() as u64 <= *content_length,
                    "fixed size response overflow: {} bytes left, got {} more",
                    content_length,
                    data.len()
                );
                if !is_head {
                    append(pool, buf, data).expect("pool exhausted mid-body");
                }
                *content_length -= data.len() as u64;
            }
            MessageState::ChunkedBody { is_head } => {
                if !is_head && !data.is_empty() {
                    append(pool, buf, format!("{:x}\r\n", data.len()).as_bytes()).expect("pool exhausted mid-body");
                    append(pool, buf, data).expect("pool exhausted mid-body");
                    append(pool, buf, b"\r\n").expect("pool exhausted mid-body");
                }
            }
            MessageState::CloseDelimitedBody { is_head } => {
                if !is_head && !data.is_empty() {
                    append(pool, buf, data).expect("pool exhausted mid-body");
                }
            }
            ref state => panic!("write_body() called on message in state {:?}", state),
        }
    }

    pub fn is_after_headers(&self) -> bool {
        matches!(
            *self,
            MessageState::Bodyless
                | MessageState::Done
                | MessageState::FixedBody { .. }
                | MessageState::ChunkedBody { .. }
                | MessageState::CloseDelimitedBody { .. }
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self, MessageState::Done)
    }

    pub fn done(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf) {
        match *self {
            MessageState::Bodyless => *self = MessageState::Done,
            MessageState::FixedBody { is_head: true, .. }
            | MessageState::ChunkedBody { is_head: true }
            | MessageState::CloseDelimitedBody { is_head: true } => *self = MessageState::Done,
            MessageState::FixedBody { is_head: false, content_length: 0 } => *self = MessageState::Done,
            MessageState::FixedBody { is_head: false, content_length } => {
                panic!("tried to close message with {} bytes remaining", content_length)
            }
            MessageState::ChunkedBody { is_head: false } => {
                append(pool, buf, b"0\r\n\r\n").expect("pool exhausted at trailer");
                *self = MessageState::Done;
            }
            MessageState::CloseDelimitedBody { is_head: false } => *self = MessageState::Done,
            MessageState::Done => {}
            ref state => panic!("done() called on response in state {:?}", state),
        }
    }

    /// Same as `done()`, but for a chunked body, emits the given trailer
    /// fields between the terminating zero-size chunk and the final
    /// blank line, per the chunked trailer grammar.
    pub fn done_with_trailers(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf, trailers: &[(String, Vec<u8>)]) {
        if trailers.is_empty() {
            return self.done(pool, buf);
        }
        match *self {
            MessageState::ChunkedBody { is_head: true } => *self = MessageState::Done,
            MessageState::ChunkedBody { is_head: false } => {
                append(pool, buf, b"0\r\n").expect("pool exhausted at trailer");
                for (name, value) in trailers {
                    self.write_header(pool, buf, name, value).expect("invalid trailer");
                }
                append(pool, buf, b"\r\n").expect("pool exhausted at trailer");
                *self = MessageState::Done;
            }
            // A close-delimited body has no envelope to hang trailers off
            // of; the connection is closing anyway, so fall through to a
            // plain `done()`.
            MessageState::CloseDelimitedBody { .. } => self.done(pool, buf),
            ref state => panic!("done_with_trailers() called on message in state {:?}", state),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::enums::Version;

    fn render(version: Version, close: bool, fun: impl FnOnce(&mut MessageState, &mut MemoryPool, &mut PoolBuf)) -> String {
        let mut pool = MemoryPool::new(4096);
        let mut buf = PoolBuf::new();
        let mut state = MessageState::new(version, close, false);
        fun(&mut state, &mut pool, &mut buf);
        String::from_utf8(buf.as_slice(&pool).to_vec()).unwrap()
    }

    #[test]
    fn minimal_response() {
        let out = render(Version::Http11, false, |msg, pool, buf| {
            msg.response_status(pool, buf, 200).unwrap();
            msg.add_length(pool, buf, 0).unwrap();
            msg.done_headers(pool, buf).unwrap();
        });
        assert_eq!(out, "HTTP/1.1 200\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn close_connection_adds_header() {
        let out = render(Version::Http11, true, |msg, pool, buf| {
            msg.response_status(pool, buf, 200).unwrap();
            msg.add_length(pool, buf, 0).unwrap();
            msg.done_headers(pool, buf).unwrap();
        });
        assert_eq!(out, "HTTP/1.1 200\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn chunked_body_round_trip() {
        let out = render(Version::Http11, false, |msg, pool, buf| {
            msg.response_status(pool, buf, 200).unwrap();
            msg.add_chunked(pool, buf).unwrap();
            msg.done_headers(pool, buf).unwrap();
            msg.write_body(pool, buf, b"hello");
            msg.done(pool, buf);
        });
        assert_eq!(
            out,
            "HTTP/1.1 200\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn head_response_suppresses_body_bytes_but_keeps_length() {
        let mut pool = MemoryPool::new(4096);
        let mut buf = PoolBuf::new();
        let mut state = MessageState::new(Version::Http11, false, true);
        state.response_status(&mut pool, &mut buf, 200).unwrap();
        state.add_length(&mut pool, &mut buf, 500).unwrap();
        state.done_headers(&mut pool, &mut buf).unwrap();
        state.write_body(&mut pool, &mut buf, b"hello");
        state.done(&mut pool, &mut buf);
        let out = String::from_utf8(buf.as_slice(&pool).to_vec()).unwrap();
        assert_eq!(out, "HTTP/1.1 200\r\nContent-Length: 500\r\n\r\n");
    }

    #[test]
    fn close_delimited_body_has_no_length_framing() {
        let out = render(Version::Http11, true, |msg, pool, buf| {
            msg.response_status(pool, buf, 200).unwrap();
            msg.add_close_delimited(pool, buf).unwrap();
            msg.done_headers(pool, buf).unwrap();
            msg.write_body(pool, buf, b"first-");
            msg.note_streamed_bytes(6);
            msg.write_body(pool, buf, b"second");
            msg.note_streamed_bytes(6);
            msg.done(pool, buf);
        });
        assert_eq!(out, "HTTP/1.1 200\r\nConnection: close\r\n\r\nfirst-second");
    }

    #[test]
    fn informational_status_rejects_length() {
        let mut pool = MemoryPool::new(4096);
        let mut buf = PoolBuf::new();
        let mut state = MessageState::new(Version::Http11, false, false);
        state.response_status(&mut pool, &mut buf, 142).unwrap();
        assert!(state.add_length(&mut pool, &mut buf, 500).is_err());
        state.done_headers(&mut pool, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf.as_slice(&pool).to_vec()).unwrap(), "HTTP/1.1 142\r\n\r\n");
    }
}
