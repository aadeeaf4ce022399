//! Chunked transfer-coding decoder for request bodies.
//!
//! Works directly against the connection's pool-backed read buffer:
//! each chunk-size line is stripped out in place as soon as it's parsed
//! (via `PoolBuf::remove_range`), leaving `buffered()` bytes of
//! contiguous, already-decoded body data sitting at the front of the
//! buffer ready for the handler to consume. Chunk extensions
//! (`;name=value` after the size) are recognized and ignored.

use std::ops::Range;

use crate::pool::{MemoryPool, PoolBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidChunkSize;

fn parse_chunk_size_line(data: &[u8]) -> Option<(usize, u64)> {
    let line_end = data.windows(2).position(|w| w == b"\r\n")?;
    let line = &data[..line_end];
    let size_part = line.iter().position(|&b| b == b';').map(|p| &line[..p]).unwrap_or(line);
    if size_part.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in size_part {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return None,
        };
        value = value.checked_mul(16)?.checked_add(digit as u64)?;
    }
    Some((line_end + 2, value))
}

#[derive(Debug, Clone)]
pub struct State {
    buffered: usize,
    pending: u64,
    done: bool,
}

impl State {
    pub fn new() -> State {
        State { buffered: 0, pending: 0, done: false }
    }

    /// Advance as far as possible through `buf`'s current contents,
    /// stripping chunk-size-line framing and growing `buffered()` by
    /// however much decoded body data is now available. Returns without
    /// error and without progress if the buffer doesn't yet hold a full
    /// chunk-size line or the rest of a chunk's data — the caller should
    /// `recv()` more bytes and call `parse` again.
    pub fn parse(&mut self, pool: &mut MemoryPool, buf: &mut PoolBuf) -> Result<(), InvalidChunkSize> {
        loop {
            if self.buffered >= buf.len() {
                return Ok(());
            }
            if self.pending == 0 {
                let data = buf.as_slice(pool)[self.buffered..].to_vec();
                match parse_chunk_size_line(&data) {
                    Some((consumed, 0)) => {
                        buf.remove_range(pool, self.buffered..self.buffered + consumed);
                        self.done = true;
                        return Ok(());
                    }
                    Some((consumed, size)) => {
                        buf.remove_range(pool, self.buffered..self.buffered + consumed);
                        self.pending = size;
                    }
                    None => {
                        if data.len() > 64 {
                            // A well-formed size line is a handful of hex
                            // digits; this much garbage with no CRLF in
                            // sight is not a stalled read, it's invalid.
                            return Err(InvalidChunkSize);
                        }
                        return Ok(());
                    }
                }
            } else {
                let available = (buf.len() - self.buffered) as u64;
                if self.pending + 2 <= available {
                    // chunk data plus its trailing CRLF are both present
                    let data_end = self.buffered + self.pending as usize;
                    buf.remove_range(pool, data_end..data_end + 2);
                    self.buffered += self.pending as usize;
                    self.pending = 0;
                } else {
                    // Neither the rest of the chunk's data nor (if it has
                    // all arrived) its trailing CRLF is fully available
                    // yet; don't expose a partial chunk's bytes as
                    // buffered until the whole chunk is confirmed.
                    return Ok(());
                }
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n, "consumed more than was decoded");
        self.buffered -= n;
    }

    pub fn decoded_range(&self) -> Range<usize> {
        0..self.buffered
    }
}

impl Default for State {
    fn default() -> State {
        State::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn feed(chunks: &[u8]) -> (MemoryPool, PoolBuf, State) {
        let mut pool = MemoryPool::new(4096);
        let mut buf = PoolBuf::new();
        buf.append(&mut pool, chunks).unwrap();
        let mut state = State::new();
        state.parse(&mut pool, &mut buf).unwrap();
        (pool, buf, state)
    }

    #[test]
    fn single_chunk_then_terminator() {
        let (pool, buf, state) = feed(b"5\r\nhello\r\n0\r\n\r\n");
        assert_eq!(state.buffered(), 5);
        assert!(state.is_done());
        assert_eq!(&buf.as_slice(&pool)[..state.buffered()], b"hello");
    }

    #[test]
    fn multiple_chunks_concatenate() {
        let (pool, buf, state) = feed(b"3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n");
        assert_eq!(state.buffered(), 6);
        assert_eq!(&buf.as_slice(&pool)[..state.buffered()], b"foobar");
    }

    #[test]
    fn chunk_extension_ignored() {
        let (pool, buf, state) = feed(b"5;foo=bar\r\nhello\r\n0\r\n\r\n");
        assert_eq!(state.buffered(), 5);
        assert_eq!(&buf.as_slice(&pool)[..state.buffered()], b"hello");
    }

    #[test]
    fn partial_chunk_waits_for_more() {
        let mut pool = MemoryPool::new(4096);
        let mut buf = PoolBuf::new();
        buf.append(&mut pool, b"5\r\nhel").unwrap();
        let mut state = State::new();
        state.parse(&mut pool, &mut buf).unwrap();
        assert_eq!(state.buffered(), 0);
        assert!(!state.is_done());

        buf.append(&mut pool, b"lo\r\n0\r\n\r\n").unwrap();
        state.parse(&mut pool, &mut buf).unwrap();
        assert_eq!(state.buffered(), 5);
        assert!(state.is_done());
    }

    #[test]
    fn consume_drains_decoded_prefix() {
        let (_pool, _buf, mut state) = feed(b"5\r\nhello\r\n0\r\n\r\n");
        state.consume(5);
        assert_eq!(state.buffered(), 0);
    }
}
