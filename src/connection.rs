//! The per-connection HTTP/1.1 state machine.
//!
//! Drives one socket end to end: read a request line and headers
//! (handling obsolete line folding), decide how the body is framed,
//! answer `Expect: 100-continue`, read the body (fixed-length or
//! chunked), dispatch to a handler, write the response, and either loop
//! for the next pipelined/keep-alive request or close. One `Connection`
//! owns exactly one `MemoryPool` for its entire lifetime; between
//! requests the pool is compacted with `reset()` rather than replaced.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::build_header::MessageState;
use crate::chunked;
use crate::config::Config;
use crate::dispatch::RequestDispatch;
use crate::enums::{HttpStatus, Method, Status, Version};
use crate::error::{Error, Result};
use crate::headers::{self, HeaderStore, ValueKind};
use crate::parse::cookie::parse_cookie_header;
use crate::parse::header_block::{HeaderBlockParser, Progress};
use crate::parse::line::{next_line, LineResult};
use crate::parse::request_line::parse_request_line;
use crate::parse::url_arg::parse_url_args;
use crate::pool::{MemoryPool, PoolBuf};
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    UrlReceived,
    HeaderPartReceived,
    HeadersReceived,
    BodyReceiving,
    RequestComplete,
    ResponseHeadersSent,
    ResponseBodySending,
    FootersSent,
    Closed,
}

enum BodyFraming {
    None,
    Fixed(u64),
    Chunked,
}

/// Which logical clock a blocking read is charged against. The socket's own
/// read timeout (set once, coarsely, by the daemon) just bounds how long a
/// single `read()` call can block; it's what makes the `last_activity`
/// check below actually get polled instead of blocking forever.
#[derive(Debug, Clone, Copy)]
enum TimeoutPhase {
    FirstByte,
    KeepAlive,
    Header,
    Body,
}

fn timeout_error(phase: TimeoutPhase) -> Error {
    match phase {
        TimeoutPhase::FirstByte => Error::FirstByteTimeout,
        TimeoutPhase::KeepAlive => Error::KeepAliveTimeout,
        TimeoutPhase::Header => Error::HeaderTimeout,
        TimeoutPhase::Body => Error::BodyTimeout,
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock)
}

/// Block until at least one byte arrives, a real socket error occurs, or
/// `timeout` has elapsed since `last_activity` with no progress — checked
/// once per `read()` return, per the socket's own (coarser) read timeout.
fn blocking_read<S: Read>(
    stream: &mut S,
    buf: &mut [u8],
    last_activity: &mut Instant,
    timeout: Duration,
    phase: TimeoutPhase,
) -> Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(n) => {
                if n > 0 {
                    *last_activity = Instant::now();
                }
                return Ok(n);
            }
            Err(e) if is_timeout(&e) => {
                if last_activity.elapsed() >= timeout {
                    return Err(timeout_error(phase));
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

/// Read bytes into `buf`'s tail until `next_line` can find a terminator
/// past `scanned_from`, growing the pool-backed buffer as needed.
#[allow(clippy::too_many_arguments)]
fn read_line<S: Read>(
    stream: &mut S,
    pool: &mut MemoryPool,
    buf: &mut PoolBuf,
    scanned_from: &mut usize,
    last_activity: &mut Instant,
    timeout: Duration,
    phase: TimeoutPhase,
) -> Result<crate::parse::line::Line> {
    loop {
        let tail = &buf.as_slice(pool)[*scanned_from..];
        match next_line(tail) {
            LineResult::Line(l) => return Ok(l),
            LineResult::NeedMore => {
                *scanned_from = buf.len().saturating_sub(64).max(*scanned_from);
                let chunk = buf.reserve_tail(pool, 4096).map_err(|_| Error::HeaderTooLarge)?;
                let n = blocking_read(stream, pool.get_mut(chunk.clone()), last_activity, timeout, phase)?;
                if n == 0 {
                    return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed")));
                }
                buf.advance(n);
            }
        }
    }
}

pub struct Connection {
    pool: MemoryPool,
    config: Arc<Config>,
    state: ConnectionState,
    last_activity: Instant,
    first_request: bool,
}

impl Connection {
    pub fn new(config: Arc<Config>) -> Connection {
        let pool_size = config.get_pool_size();
        Connection {
            pool: MemoryPool::new(pool_size),
            config,
            state: ConnectionState::Init,
            last_activity: Instant::now(),
            first_request: true,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve requests on `stream` until the peer closes the connection,
    /// a protocol error occurs, or a response demands `Connection: close`.
    pub fn serve<S: Read + Write>(&mut self, stream: &mut S, dispatch: &RequestDispatch) -> Result<()> {
        let mut read_buf = PoolBuf::new();
        loop {
            self.state = ConnectionState::Init;
            match self.serve_one(stream, dispatch, &mut read_buf) {
                Ok(true) => continue,
                Ok(false) => {
                    self.state = ConnectionState::Closed;
                    return Ok(());
                }
                Err(e) => {
                    if let Some(code) = exhaustion_status(&e, self.state) {
                        write_minimal_status(stream, code);
                    }
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
            }
        }
    }

    /// Serve exactly one request, reusing whatever unconsumed bytes
    /// `read_buf` already holds from a pipelined read during the
    /// previous request. Returns `Ok(true)` to keep the connection open
    /// for another request, `Ok(false)` to close gracefully.
    fn serve_one<S: Read + Write>(&mut self, stream: &mut S, dispatch: &RequestDispatch, read_buf: &mut PoolBuf) -> Result<bool> {
        let mut scanned = 0usize;

        self.state = ConnectionState::UrlReceived;
        self.last_activity = Instant::now();
        let (first_byte_phase, first_byte_timeout) = if self.first_request {
            (TimeoutPhase::FirstByte, self.config.get_first_byte_timeout())
        } else {
            (TimeoutPhase::KeepAlive, self.config.get_keep_alive_timeout())
        };
        let request_line_bytes = read_line(
            stream,
            &mut self.pool,
            read_buf,
            &mut scanned,
            &mut self.last_activity,
            first_byte_timeout,
            first_byte_phase,
        )?;
        self.first_request = false;
        let line_slice = read_buf.as_slice(&self.pool)[..request_line_bytes.len].to_vec();
        let parsed_line = parse_request_line(&line_slice);
        let method = Method::parse(&line_slice[parsed_line.method.clone()]);
        let url = String::from_utf8_lossy(&line_slice[parsed_line.url.clone()]).into_owned();
        let query = parsed_line.query.clone().map(|r| String::from_utf8_lossy(&line_slice[r]).into_owned());
        let version = if line_slice[parsed_line.version.clone()].ends_with(b"1.0") {
            Version::Http10
        } else {
            Version::Http11
        };
        read_buf.consume(request_line_bytes.consumed);
        scanned = 0;

        self.state = ConnectionState::HeaderPartReceived;
        self.last_activity = Instant::now();
        let header_timeout = self.config.get_header_timeout();
        let mut store = HeaderStore::new();
        let mut block_parser = HeaderBlockParser::new();
        loop {
            let line = read_line(
                stream,
                &mut self.pool,
                read_buf,
                &mut scanned,
                &mut self.last_activity,
                header_timeout,
                TimeoutPhase::Header,
            )?;
            let abs_start = read_buf_base(read_buf);
            let line_range = abs_start..(abs_start + line.len);
            match block_parser
                .process_line(&mut self.pool, &mut store, ValueKind::HEADER, line_range)
                .map_err(|_| Error::BadHeaderLine)?
            {
                Progress::Continue => {
                    read_buf.consume(line.consumed);
                    scanned = 0;
                }
                Progress::Done => {
                    read_buf.consume(line.consumed);
                    break;
                }
            }
        }
        self.state = ConnectionState::HeadersReceived;

        if let Some(cookie_header) = find_header_range(&self.pool, &store, "Cookie") {
            parse_cookie_header(&self.pool, cookie_header, &mut store);
        }
        if let Some(q) = &query {
            let range = self.pool.allocate(q.len(), false).ok_or(Error::PoolExhausted)?;
            self.pool.write(range.clone(), q.as_bytes());
            parse_url_args(&mut self.pool, range, ValueKind::GET_ARG, &mut store).ok_or(Error::PoolExhausted)?;
        }

        let close_requested = store
            .lookup(&self.pool, ValueKind::HEADER, "Connection")
            .map(|v| headers::is_close(v.as_bytes()))
            .unwrap_or(false);
        let wants_continue = store
            .lookup(&self.pool, ValueKind::HEADER, "Expect")
            .map(|v| headers::is_continue(v.as_bytes()))
            .unwrap_or(false);

        let framing = self.determine_framing(&store)?;

        if wants_continue {
            let mut msg = MessageState::new(version, false, false);
            let mut write_buf = PoolBuf::new();
            msg.response_continue(&mut self.pool, &mut write_buf).map_err(|_| Error::PoolExhausted)?;
            write_all_from(stream, &self.pool, &write_buf)?;
        }

        self.state = ConnectionState::BodyReceiving;
        self.last_activity = Instant::now();
        let body_range = self.read_body(stream, read_buf, &mut scanned, &framing, &mut store)?;

        if let Some(ct) = store.lookup(&self.pool, ValueKind::HEADER, "Content-Type") {
            if ct.starts_with("application/x-www-form-urlencoded") && !body_range.is_empty() {
                let copy = self.pool.allocate(body_range.len(), false).ok_or(Error::PoolExhausted)?;
                let bytes = self.pool.get(body_range.clone()).to_vec();
                self.pool.write(copy.clone(), &bytes);
                parse_url_args(&mut self.pool, copy, ValueKind::POST_ARG, &mut store).ok_or(Error::PoolExhausted)?;
            }
        }

        self.state = ConnectionState::RequestComplete;
        let body_bytes = self.pool.get(body_range.clone()).to_vec();
        let request = Request {
            pool: &self.pool,
            headers: &store,
            method: method.clone(),
            url: &url,
            query: query.as_deref(),
            version,
            body: &body_bytes,
        };
        let response = match dispatch.find_handler(&url) {
            Some(handler) => handler(&request),
            None => Response::from_buffer(Status::NotFound, Vec::new()),
        };

        self.state = ConnectionState::ResponseHeadersSent;
        let do_close = close_requested || version == Version::Http10;
        let keep_alive = self.write_response(stream, &response, version, do_close, method.is_head())?;

        self.state = ConnectionState::FootersSent;
        let _ = scanned;
        read_buf.keep_alive_reset(&mut self.pool, self.config.get_pool_size());

        Ok(keep_alive)
    }

    fn determine_framing(&self, store: &HeaderStore) -> Result<BodyFraming> {
        let content_lengths: Vec<&str> = store
            .iter_kind(ValueKind::HEADER)
            .filter(|e| headers::text(&self.pool, e.name.clone()).eq_ignore_ascii_case("Content-Length"))
            .map(|e| headers::text(&self.pool, e.value.clone()))
            .collect();
        if let Some(first) = content_lengths.first() {
            if content_lengths.iter().any(|v| v.trim() != first.trim()) {
                return Err(Error::DuplicateContentLength);
            }
        }
        let content_length = content_lengths.first().copied();
        let transfer_encoding = store.lookup(&self.pool, ValueKind::HEADER, "Transfer-Encoding");
        match (content_length, transfer_encoding) {
            (Some(_), Some(te)) if headers::is_chunked(te.as_bytes()) => Err(Error::ConflictingBodyLength),
            (_, Some(te)) if headers::is_chunked(te.as_bytes()) => Ok(BodyFraming::Chunked),
            (Some(cl), _) => {
                let n: u64 = cl.trim().parse().map_err(|_| Error::ContentLengthInvalid)?;
                Ok(BodyFraming::Fixed(n))
            }
            (None, _) => Ok(BodyFraming::None),
        }
    }

    fn read_body<S: Read>(
        &mut self,
        stream: &mut S,
        read_buf: &mut PoolBuf,
        scanned: &mut usize,
        framing: &BodyFraming,
        store: &mut HeaderStore,
    ) -> Result<std::ops::Range<usize>> {
        let body_timeout = self.config.get_body_timeout();
        match framing {
            BodyFraming::None => Ok(0..0),
            BodyFraming::Fixed(n) => {
                let n = *n as usize;
                while read_buf.len() < n {
                    let chunk = read_buf.reserve_tail(&mut self.pool, n - read_buf.len()).map_err(|_| Error::RequestTooLarge)?;
                    let read_amt = blocking_read(
                        stream,
                        self.pool.get_mut(chunk.clone()),
                        &mut self.last_activity,
                        body_timeout,
                        TimeoutPhase::Body,
                    )?;
                    if read_amt == 0 {
                        return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "body truncated")));
                    }
                    read_buf.advance(read_amt);
                }
                let base = read_buf_base(read_buf);
                read_buf.consume(n);
                *scanned = 0;
                Ok(base..(base + n))
            }
            BodyFraming::Chunked => {
                let mut decoder = chunked::State::new();
                loop {
                    decoder.parse(&mut self.pool, read_buf).map_err(|_| Error::ChunkSizeInvalid)?;
                    if decoder.is_done() {
                        break;
                    }
                    let chunk = read_buf.reserve_tail(&mut self.pool, 4096).map_err(|_| Error::RequestTooLarge)?;
                    let n = blocking_read(
                        stream,
                        self.pool.get_mut(chunk.clone()),
                        &mut self.last_activity,
                        body_timeout,
                        TimeoutPhase::Body,
                    )?;
                    if n == 0 {
                        return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "chunked body truncated")));
                    }
                    read_buf.advance(n);
                }
                let base = read_buf_base(read_buf);
                let body_len = decoder.buffered();
                let body_range = base..(base + body_len);
                read_buf.consume(body_len);
                decoder.consume(body_len);
                *scanned = 0;

                // Trailers (if any) follow immediately; parse them as a
                // header block of kind FOOTER, merged into the request's
                // header store.
                let mut block_parser = HeaderBlockParser::new();
                loop {
                    let line = read_line(
                        stream,
                        &mut self.pool,
                        read_buf,
                        scanned,
                        &mut self.last_activity,
                        body_timeout,
                        TimeoutPhase::Body,
                    )?;
                    let abs_start = read_buf_base(read_buf);
                    let line_range = abs_start..(abs_start + line.len);
                    match block_parser
                        .process_line(&mut self.pool, store, ValueKind::FOOTER, line_range)
                        .map_err(|_| Error::BadHeaderLine)?
                    {
                        Progress::Continue => {
                            read_buf.consume(line.consumed);
                            *scanned = 0;
                        }
                        Progress::Done => {
                            read_buf.consume(line.consumed);
                            break;
                        }
                    }
                }
                Ok(body_range)
            }
        }
    }

    /// Write the response headers, then drain and write its body one
    /// chunk at a time via `Response::next_body_chunk`. Buffer, callback,
    /// and file sources all go through the same loop: a buffer just
    /// yields its one chunk and stops, while a callback or file is
    /// re-locked and re-consulted on every iteration per the response's
    /// own mutex, so a handler thread still producing data never races
    /// this read. Only the small header preamble goes through the
    /// connection's pool; body bytes are written straight to the socket,
    /// so a callback/file body of unbounded length never has to fit in
    /// the fixed-size pool.
    fn write_response<S: Write>(
        &mut self,
        stream: &mut S,
        response: &Response,
        version: Version,
        do_close: bool,
        is_head: bool,
    ) -> Result<bool> {
        let headers_snapshot = response.with_inner(|inner| inner.headers.clone());
        let footers_snapshot = response.with_inner(|inner| inner.footers.clone());
        let known_length = response.known_body_length();

        enum Framing {
            Fixed(u64),
            Chunked,
            CloseDelimited,
        }
        let framing = if !footers_snapshot.is_empty() {
            Framing::Chunked
        } else if let Some(n) = known_length {
            Framing::Fixed(n)
        } else {
            Framing::CloseDelimited
        };
        let do_close = do_close || matches!(framing, Framing::CloseDelimited);

        let mut write_buf = PoolBuf::new();
        let mut msg = MessageState::new(version, do_close, is_head);

        let status = response.status();
        msg.response_status(&mut self.pool, &mut write_buf, status.code())
            .map_err(|_| Error::PoolExhausted)?;
        msg.add_date(&mut self.pool, &mut write_buf).map_err(|_| Error::PoolExhausted)?;
        for (name, value) in &headers_snapshot {
            msg.add_header(&mut self.pool, &mut write_buf, name, value).map_err(|_| Error::PoolExhausted)?;
        }
        match framing {
            Framing::Fixed(n) => msg.add_length(&mut self.pool, &mut write_buf, n).map_err(|_| Error::PoolExhausted)?,
            Framing::Chunked => msg.add_chunked(&mut self.pool, &mut write_buf).map_err(|_| Error::PoolExhausted)?,
            Framing::CloseDelimited => {
                msg.add_close_delimited(&mut self.pool, &mut write_buf).map_err(|_| Error::PoolExhausted)?
            }
        }
        msg.done_headers(&mut self.pool, &mut write_buf).map_err(|_| Error::PoolExhausted)?;
        write_all_from(stream, &self.pool, &write_buf)?;

        while let Some(chunk) = response.next_body_chunk() {
            if chunk.is_empty() {
                continue;
            }
            if !is_head {
                match framing {
                    Framing::Chunked => {
                        let mut frame = PoolBuf::new();
                        frame
                            .append(&mut self.pool, format!("{:x}\r\n", chunk.len()).as_bytes())
                            .map_err(|_| Error::PoolExhausted)?;
                        frame.append(&mut self.pool, &chunk).map_err(|_| Error::PoolExhausted)?;
                        frame.append(&mut self.pool, b"\r\n").map_err(|_| Error::PoolExhausted)?;
                        write_all_from(stream, &self.pool, &frame)?;
                    }
                    Framing::Fixed(_) | Framing::CloseDelimited => {
                        stream.write_all(&chunk).map_err(Error::Io)?;
                    }
                }
            }
            msg.note_streamed_bytes(chunk.len() as u64);
        }

        let mut tail_buf = PoolBuf::new();
        msg.done_with_trailers(&mut self.pool, &mut tail_buf, &footers_snapshot);
        write_all_from(stream, &self.pool, &tail_buf)?;

        Ok(!do_close)
    }
}

fn read_buf_base(buf: &PoolBuf) -> usize {
    // The buffer's logical content always starts at its pool range's
    // start; exposed here since `PoolBuf` doesn't publish its range.
    buf.base()
}

fn find_header_range(pool: &MemoryPool, store: &HeaderStore, name: &str) -> Option<std::ops::Range<usize>> {
    store.iter_kind(ValueKind::HEADER).find(|e| {
        headers::text(pool, e.name.clone()).eq_ignore_ascii_case(name)
    }).map(|e| e.value.clone())
}

fn write_all_from<S: Write>(stream: &mut S, pool: &MemoryPool, buf: &PoolBuf) -> Result<()> {
    stream.write_all(buf.as_slice(pool)).map_err(Error::Io)
}

/// Map a pool/parse-exhaustion error, together with how far the request had
/// gotten, to the status code to report before closing. Written directly to
/// the socket rather than through the pool-backed `MessageState`, since the
/// pool may itself be the thing that just ran out. Returns `None` once a
/// response has already started going out, since there's nothing clean left
/// to send on top of it.
fn exhaustion_status(err: &Error, state: ConnectionState) -> Option<u16> {
    use ConnectionState::*;
    match (err, state) {
        (Error::HeaderTooLarge, UrlReceived) => Some(414),
        (Error::HeaderTooLarge, HeaderPartReceived) => Some(413),
        (Error::PoolExhausted, UrlReceived) | (Error::PoolExhausted, HeaderPartReceived) => Some(413),
        (Error::PoolExhausted, HeadersReceived) | (Error::PoolExhausted, BodyReceiving) => Some(500),
        (Error::RequestTooLarge, BodyReceiving) => Some(500),
        _ => None,
    }
}

/// Write a bare status line with no body, bypassing the connection's pool
/// entirely. Best-effort: if the socket itself is in a bad state there's
/// nothing more to do but close it, which the caller does regardless.
fn write_minimal_status<S: Write>(stream: &mut S, code: u16) {
    let line = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", code);
    let _ = stream.write_all(line.as_bytes());
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    struct LoopbackStream {
        input: Cursor<Vec<u8>>,
        pub output: Vec<u8>,
    }

    impl Read for LoopbackStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for LoopbackStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn simple_get_roundtrip() {
        let mut stream = LoopbackStream {
            input: Cursor::new(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/hello", |_req| Response::from_buffer(Status::Ok, b"hi".to_vec()));
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.starts_with("HTTP/1.1 200\r\n"));
        assert!(resp.contains("Content-Length: 2"));
        assert!(resp.ends_with("hi"));
    }

    #[test]
    fn cookie_header_reaches_handler() {
        let mut stream = LoopbackStream {
            input: Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\nCookie: session=abc\r\nConnection: close\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.set_default(|req| {
            let seen = req.cookie("session").unwrap_or("").to_owned();
            Response::from_buffer(Status::Ok, seen.into_bytes())
        });
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.ends_with("abc"));
    }

    #[test]
    fn folded_header_value_reaches_handler() {
        let mut stream = LoopbackStream {
            input: Cursor::new(
                b"GET / HTTP/1.1\r\nX-Long: first\r\n part\r\n\tsecond\r\nConnection: close\r\n\r\n".to_vec(),
            ),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.set_default(|req| {
            let v = req.header("X-Long").unwrap_or("").to_owned();
            Response::from_buffer(Status::Ok, v.into_bytes())
        });
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.ends_with("first part second"));
    }

    #[test]
    fn hundred_continue_then_fixed_body() {
        let mut stream = LoopbackStream {
            input: Cursor::new(
                b"POST /up HTTP/1.1\r\nContent-Length: 5\r\nExpect: 100-continue\r\nConnection: close\r\n\r\nhello".to_vec(),
            ),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/up", |req| Response::from_buffer(Status::Ok, req.body.to_vec()));
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200\r\n"));
        assert!(resp.ends_with("hello"));
    }

    #[test]
    fn chunked_upload_decoded() {
        let mut stream = LoopbackStream {
            input: Cursor::new(
                b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n".to_vec(),
            ),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/up", |req| Response::from_buffer(Status::Ok, req.body.to_vec()));
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.ends_with("foobar"));
    }

    #[test]
    fn duplicate_content_length_closes_connection() {
        let mut stream = LoopbackStream {
            input: Cursor::new(
                b"POST /up HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\nConnection: close\r\n\r\nhello".to_vec(),
            ),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/up", |req| Response::from_buffer(Status::Ok, req.body.to_vec()));
        let mut conn = Connection::new(Config::new().done());
        let err = conn.serve(&mut stream, &dispatch).unwrap_err();
        assert!(matches!(err, Error::DuplicateContentLength));
    }

    #[test]
    fn oversized_request_line_closes_with_414() {
        let huge_target = "a".repeat(9000);
        let mut stream = LoopbackStream {
            input: Cursor::new(format!("GET /{} HTTP/1.1\r\n\r\n", huge_target).into_bytes()),
            output: Vec::new(),
        };
        let dispatch = RequestDispatch::new();
        let mut conn = Connection::new(Config::new().pool_size(4096).done());
        let err = conn.serve(&mut stream, &dispatch).unwrap_err();
        assert!(matches!(err, Error::HeaderTooLarge));
        assert!(String::from_utf8_lossy(&stream.output).starts_with("HTTP/1.1 414\r\n"));
    }

    #[test]
    fn oversized_headers_close_with_413() {
        let huge_value = "a".repeat(9000);
        let mut stream = LoopbackStream {
            input: Cursor::new(format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", huge_value).into_bytes()),
            output: Vec::new(),
        };
        let dispatch = RequestDispatch::new();
        let mut conn = Connection::new(Config::new().pool_size(4096).done());
        let err = conn.serve(&mut stream, &dispatch).unwrap_err();
        assert!(matches!(err, Error::HeaderTooLarge));
        assert!(String::from_utf8_lossy(&stream.output).starts_with("HTTP/1.1 413\r\n"));
    }

    #[test]
    fn oversized_body_closes_with_500() {
        let mut stream = LoopbackStream {
            input: Cursor::new(b"POST /up HTTP/1.1\r\nContent-Length: 9000\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/up", |req| Response::from_buffer(Status::Ok, req.body.to_vec()));
        let mut conn = Connection::new(Config::new().pool_size(4096).done());
        let err = conn.serve(&mut stream, &dispatch).unwrap_err();
        assert!(matches!(err, Error::RequestTooLarge));
        assert!(String::from_utf8_lossy(&stream.output).starts_with("HTTP/1.1 500\r\n"));
    }

    /// A stream that serves the request line once and then stalls forever,
    /// mimicking a socket with a read timeout set: every subsequent read
    /// returns `WouldBlock` instead of blocking or reaching EOF.
    struct StallingStream {
        first_chunk: Option<Vec<u8>>,
    }

    impl Read for StallingStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(chunk) = self.first_chunk.take() {
                buf[..chunk.len()].copy_from_slice(&chunk);
                return Ok(chunk.len());
            }
            Err(std::io::Error::from(std::io::ErrorKind::WouldBlock))
        }
    }

    impl Write for StallingStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_headers_close_with_header_timeout() {
        let mut stream = StallingStream { first_chunk: Some(b"GET / HTTP/1.1\r\n".to_vec()) };
        let dispatch = RequestDispatch::new();
        let config = Config::new().header_timeout(Duration::from_millis(20)).done();
        let mut conn = Connection::new(config);
        let err = conn.serve(&mut stream, &dispatch).unwrap_err();
        assert!(matches!(err, Error::HeaderTimeout));
    }

    #[test]
    fn stalled_first_byte_closes_with_first_byte_timeout() {
        let mut stream = StallingStream { first_chunk: None };
        let dispatch = RequestDispatch::new();
        let config = Config::new().first_byte_timeout(Duration::from_millis(20)).done();
        let mut conn = Connection::new(config);
        let err = conn.serve(&mut stream, &dispatch).unwrap_err();
        assert!(matches!(err, Error::FirstByteTimeout));
    }

    #[test]
    fn head_request_sends_no_body_bytes() {
        let mut stream = LoopbackStream {
            input: Cursor::new(b"HEAD /hello HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/hello", |_req| Response::from_buffer(Status::Ok, b"hi".to_vec()));
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.contains("Content-Length: 2"));
        assert!(resp.ends_with("\r\n\r\n"));
    }

    #[test]
    fn callback_response_streams_and_closes() {
        let mut stream = LoopbackStream {
            input: Cursor::new(b"GET /stream HTTP/1.1\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/stream", |_req| {
            let mut chunks = vec![b"first-".to_vec(), b"second".to_vec()].into_iter();
            Response::from_callback(Status::Ok, move || chunks.next())
        });
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.starts_with("HTTP/1.1 200\r\n"));
        assert!(resp.contains("Connection: close\r\n"));
        assert!(!resp.contains("Content-Length"));
        assert!(resp.ends_with("first-second"));
    }

    #[test]
    fn pipelined_second_request_reuses_buffered_bytes() {
        let mut stream = LoopbackStream {
            input: Cursor::new(
                b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec(),
            ),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/one", |_req| Response::from_buffer(Status::Ok, b"one".to_vec()));
        dispatch.add_handler("/two", |_req| Response::from_buffer(Status::Ok, b"two".to_vec()));
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();

        // Both requests were served entirely out of the single pipelined
        // read: nothing left over for the stream to supply past what was
        // already buffered for the first request's header parse.
        assert_eq!(stream.input.position() as usize, stream.input.get_ref().len());
        let resp = String::from_utf8_lossy(&stream.output);
        let first = resp.find("one").unwrap();
        let second = resp.find("two").unwrap();
        assert!(first < second);
    }

    #[test]
    fn response_with_footers_is_chunked() {
        let mut stream = LoopbackStream {
            input: Cursor::new(b"GET /trailers HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let mut dispatch = RequestDispatch::new();
        dispatch.add_handler("/trailers", |_req| {
            let resp = Response::from_buffer(Status::Ok, b"hi".to_vec());
            resp.add_response_footer("X-Checksum", b"abc").unwrap();
            resp
        });
        let mut conn = Connection::new(Config::new().done());
        conn.serve(&mut stream, &dispatch).unwrap();
        let resp = String::from_utf8_lossy(&stream.output);
        assert!(resp.contains("Transfer-Encoding: chunked\r\n"));
        assert!(resp.contains("2\r\nhi\r\n"));
        assert!(resp.contains("X-Checksum: abc\r\n"));
        assert!(resp.ends_with("0\r\n\r\n") || resp.contains("X-Checksum: abc\r\n\r\n"));
    }
}
