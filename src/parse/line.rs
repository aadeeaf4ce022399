//! Line splitting over the pool-backed read buffer.
//!
//! `next_line` never copies: it scans the unconsumed tail of the read
//! buffer for a line terminator and hands back offsets relative to the
//! start of that tail. The terminator itself is *not* included in the
//! returned line but is included in the consumed count, so the caller can
//! advance its cursor by `consumed` regardless of which terminator style
//! was used.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    /// Length of the line, not including the terminator.
    pub len: usize,
    /// Total bytes to advance the cursor by, including the terminator.
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineResult {
    Line(Line),
    /// No terminator found yet in the available bytes.
    NeedMore,
}

/// Scan `data` for `\r\n`, a bare `\r`, or a bare `\n`. `\r\n` is matched
/// greedily before falling back to either bare form.
pub fn next_line(data: &[u8]) -> LineResult {
    for i in 0..data.len() {
        match data[i] {
            b'\r' => {
                if i + 1 < data.len() && data[i + 1] == b'\n' {
                    return LineResult::Line(Line { len: i, consumed: i + 2 });
                }
                if i + 1 == data.len() {
                    // Might still be the start of "\r\n"; wait for more.
                    return LineResult::NeedMore;
                }
                return LineResult::Line(Line { len: i, consumed: i + 1 });
            }
            b'\n' => {
                return LineResult::Line(Line { len: i, consumed: i + 1 });
            }
            _ => {}
        }
    }
    LineResult::NeedMore
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crlf_line() {
        assert_eq!(
            next_line(b"GET / HTTP/1.1\r\nHost: x\r\n"),
            LineResult::Line(Line { len: 14, consumed: 16 })
        );
    }

    #[test]
    fn bare_lf_line() {
        assert_eq!(next_line(b"abc\ndef"), LineResult::Line(Line { len: 3, consumed: 4 }));
    }

    #[test]
    fn bare_cr_line() {
        assert_eq!(next_line(b"abc\rdef"), LineResult::Line(Line { len: 3, consumed: 4 }));
    }

    #[test]
    fn no_terminator_needs_more() {
        assert_eq!(next_line(b"no terminator here"), LineResult::NeedMore);
    }

    #[test]
    fn trailing_bare_cr_needs_more() {
        // Could still become "\r\n" with one more byte.
        assert_eq!(next_line(b"abc\r"), LineResult::NeedMore);
    }

    #[test]
    fn empty_line_is_zero_length() {
        assert_eq!(next_line(b"\r\nrest"), LineResult::Line(Line { len: 0, consumed: 2 }));
    }
}
