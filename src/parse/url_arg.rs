//! URL-encoded argument parsing: query strings and
//! `application/x-www-form-urlencoded` POST bodies share this grammar.
//!
//! Unescaping is done byte-by-byte into a freshly allocated pool range
//! (never by searching the source for `%` and splicing substrings — a
//! `%` that results from a prior unescape must never be reinterpreted as
//! the start of a new escape).

use std::ops::Range;

use crate::headers::{HeaderStore, ValueKind};
use crate::pool::MemoryPool;

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Unescape `+` (to space) and `%HH` sequences in `src`, appending the
/// result into a fresh pool allocation. An incomplete or invalid `%`
/// escape is copied through literally rather than rejected, matching
/// common browser behavior.
fn unescape(pool: &mut MemoryPool, src: &[u8]) -> Option<Range<usize>> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < src.len() => {
                match (hex_digit(src[i + 1]), hex_digit(src[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(src[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    let range = pool.allocate(out.len(), false)?;
    pool.write(range.start..(range.start + out.len()), &out);
    Some(range.start..(range.start + out.len()))
}

/// Split `src` (a query string or urlencoded body, already in the pool)
/// on `&` then `=`, unescape each side, and push the pairs into `store`
/// under `kind`. A pair with no `=` is silently dropped, per the
/// original parser's behavior: a bare name carries no value to record.
pub fn parse_url_args(
    pool: &mut MemoryPool,
    src: Range<usize>,
    kind: ValueKind,
    store: &mut HeaderStore,
) -> Option<()> {
    let raw = pool.get(src.clone()).to_vec();
    for pair in raw.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        if let Some(eq) = pair.iter().position(|&b| b == b'=') {
            let name = unescape(pool, &pair[..eq])?;
            let value = unescape(pool, &pair[eq + 1..])?;
            store.push(kind, name, value);
        }
    }
    Some(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn setup(raw: &[u8]) -> (MemoryPool, Range<usize>) {
        let mut pool = MemoryPool::new(4096);
        let r = pool.allocate(raw.len(), false).unwrap();
        pool.write(r.clone(), raw);
        (pool, r)
    }

    #[test]
    fn simple_pairs() {
        let (mut pool, r) = setup(b"a=1&b=2");
        let mut store = HeaderStore::new();
        parse_url_args(&mut pool, r, ValueKind::GET_ARG, &mut store).unwrap();
        assert_eq!(store.lookup(&pool, ValueKind::GET_ARG, "a"), Some("1"));
        assert_eq!(store.lookup(&pool, ValueKind::GET_ARG, "b"), Some("2"));
    }

    #[test]
    fn plus_becomes_space() {
        let (mut pool, r) = setup(b"q=hello+world");
        let mut store = HeaderStore::new();
        parse_url_args(&mut pool, r, ValueKind::GET_ARG, &mut store).unwrap();
        assert_eq!(store.lookup(&pool, ValueKind::GET_ARG, "q"), Some("hello world"));
    }

    #[test]
    fn percent_escape_decoded() {
        let (mut pool, r) = setup(b"name=John%20Doe%21");
        let mut store = HeaderStore::new();
        parse_url_args(&mut pool, r, ValueKind::GET_ARG, &mut store).unwrap();
        assert_eq!(store.lookup(&pool, ValueKind::GET_ARG, "name"), Some("John Doe!"));
    }

    #[test]
    fn bare_name_without_equals_is_dropped() {
        let (mut pool, r) = setup(b"a=1&bare&b=2");
        let mut store = HeaderStore::new();
        parse_url_args(&mut pool, r, ValueKind::GET_ARG, &mut store).unwrap();
        assert_eq!(store.count(ValueKind::GET_ARG), 2);
    }

    #[test]
    fn post_args_use_distinct_kind() {
        let (mut pool, r) = setup(b"x=1");
        let mut store = HeaderStore::new();
        parse_url_args(&mut pool, r, ValueKind::POST_ARG, &mut store).unwrap();
        assert_eq!(store.lookup(&pool, ValueKind::GET_ARG, "x"), None);
        assert_eq!(store.lookup(&pool, ValueKind::POST_ARG, "x"), Some("1"));
    }
}
