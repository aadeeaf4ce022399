//! Header-line parsing with folded-line (obsolete line folding) support.
//!
//! Operates in place on the pool's read buffer. A folded continuation
//! line is spliced directly onto the tail of the pending value by
//! writing a single space and then moving the continuation's (leading-
//! whitespace-trimmed) bytes to sit right after it — no separate copy
//! buffer, no heap allocation, just `MemoryPool::copy_within`.

use std::ops::Range;

use crate::headers::{HeaderStore, ValueKind};
use crate::pool::MemoryPool;

#[derive(Debug)]
pub enum HeaderLineError {
    MissingColon,
    ContinuationWithoutHeader,
}

pub enum Progress {
    /// More header lines follow.
    Continue,
    /// The blank line terminating the header block was consumed.
    Done,
}

#[derive(Default)]
pub struct HeaderBlockParser {
    pending: Option<(Range<usize>, Range<usize>)>,
}

impl HeaderBlockParser {
    pub fn new() -> HeaderBlockParser {
        HeaderBlockParser { pending: None }
    }

    /// Feed one already-line-split, already-terminator-stripped line
    /// (absolute offsets into `pool`). `kind` is `HEADER` for the request
    /// header block, `FOOTER` for chunked-upload trailers.
    pub fn process_line(
        &mut self,
        pool: &mut MemoryPool,
        store: &mut HeaderStore,
        kind: ValueKind,
        line: Range<usize>,
    ) -> Result<Progress, HeaderLineError> {
        if line.is_empty() {
            self.flush(store, kind);
            return Ok(Progress::Done);
        }

        let first = pool.get(line.start..line.start + 1)[0];
        if (first == b' ' || first == b'\t') && self.pending.is_some() {
            self.append_continuation(pool, line);
            return Ok(Progress::Continue);
        }

        self.flush(store, kind);

        let bytes = pool.get(line.clone()).to_vec();
        let colon = match bytes.iter().position(|&b| b == b':') {
            Some(p) => p,
            None => return Err(HeaderLineError::MissingColon),
        };
        let name = line.start..(line.start + colon);
        let mut value_start = line.start + colon + 1;
        while value_start < line.end && matches!(pool.get(value_start..value_start + 1)[0], b' ' | b'\t') {
            value_start += 1;
        }
        self.pending = Some((name, value_start..line.end));
        Ok(Progress::Continue)
    }

    fn append_continuation(&mut self, pool: &mut MemoryPool, line: Range<usize>) {
        let (name, value) = self.pending.take().expect("checked by caller");
        let bytes = pool.get(line.clone());
        let mut trim_start = 0;
        while trim_start < bytes.len() && matches!(bytes[trim_start], b' ' | b'\t') {
            trim_start += 1;
        }
        let content_start = line.start + trim_start;
        let content_len = line.end - content_start;

        pool.write(value.end..value.end + 1, b" ");
        if content_len > 0 {
            pool.copy_within(content_start..content_start + content_len, value.end + 1);
        }
        let new_value = value.start..(value.end + 1 + content_len);
        self.pending = Some((name, new_value));
    }

    fn flush(&mut self, store: &mut HeaderStore, kind: ValueKind) {
        if let Some((name, value)) = self.pending.take() {
            store.push(kind, name, value);
        }
    }
}
