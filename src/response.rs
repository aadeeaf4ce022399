//! The reference-counted `Response` object a handler builds and hands
//! back to the connection. Shareable across threads because a streaming
//! handler (e.g. one backed by a callback or worker thread) may still be
//! filling it in after the connection's own thread has moved on to
//! writing what's ready so far.

use std::mem::ManuallyDrop;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::{Arc, Mutex};

use crate::enums::Status;

/// Where the response body's bytes come from.
pub enum DataSource {
    /// A body already fully available in memory.
    Buffer(Vec<u8>),
    /// A body produced on demand, one chunk per call, `None` signaling
    /// end of stream. Invoked from the connection's own thread.
    Callback(Box<dyn FnMut() -> Option<Vec<u8>> + Send>),
    /// A body read from a file descriptor starting at a given offset, for
    /// a set length.
    File { fd: std::os::unix::io::RawFd, offset: u64, length: Option<u64> },
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DataSource::Buffer(b) => f.debug_tuple("Buffer").field(&b.len()).finish(),
            DataSource::Callback(_) => f.write_str("Callback(..)"),
            DataSource::File { fd, offset, length } => {
                f.debug_struct("File").field("fd", fd).field("offset", offset).field("length", length).finish()
            }
        }
    }
}

#[derive(Debug)]
pub struct ResponseInner {
    pub status: Status,
    pub headers: Vec<(String, Vec<u8>)>,
    pub footers: Vec<(String, Vec<u8>)>,
    pub source: Option<DataSource>,
    pub destroyed: bool,
    buffer_sent: bool,
}

/// Read from a file descriptor the caller still owns: wrapping it in a
/// `File` only to reuse `read_at`, then forgetting the wrapper so it's
/// never closed out from under the caller.
fn read_fd_at(fd: RawFd, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    let file = ManuallyDrop::new(unsafe { std::fs::File::from_raw_fd(fd) });
    file.read_at(buf, offset)
}

/// A response that may be shared by reference count across the
/// connection's thread and whatever handler thread is populating it.
/// Every mutation goes through the mutex; the connection reads a
/// consistent snapshot each time it's ready to write more.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Mutex<ResponseInner>>,
}

fn header_value_ok(value: &[u8]) -> bool {
    !value.iter().any(|&b| b == b'\t' || b == b'\r' || b == b'\n')
}

impl Response {
    fn new(status: Status, source: DataSource) -> Response {
        Response {
            inner: Arc::new(Mutex::new(ResponseInner {
                status,
                headers: Vec::new(),
                footers: Vec::new(),
                source: Some(source),
                destroyed: false,
                buffer_sent: false,
            })),
        }
    }

    /// Pull the next chunk of body bytes, advancing whatever cursor the
    /// source keeps (a callback's own state, a file's read offset) under
    /// the response's own lock, per-call, so a handler thread still
    /// populating the response never races the connection thread
    /// draining it. `None` means the body is exhausted: close out the
    /// message (and, for a `Callback` source, the socket). A `Buffer`
    /// source always hands back its whole body in one chunk.
    pub fn next_body_chunk(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().expect("response mutex poisoned");
        if let Some(DataSource::Buffer(ref b)) = inner.source {
            if inner.buffer_sent {
                return None;
            }
            let chunk = b.clone();
            inner.buffer_sent = true;
            return Some(chunk);
        }
        match &mut inner.source {
            Some(DataSource::Callback(cb)) => cb(),
            Some(DataSource::File { fd, offset, length }) => {
                const CHUNK: usize = 64 * 1024;
                if *length == Some(0) {
                    return None;
                }
                let want = length.map(|remaining| CHUNK.min(remaining as usize)).unwrap_or(CHUNK);
                let mut data = vec![0u8; want];
                let n = read_fd_at(*fd, *offset, &mut data).ok()?;
                if n == 0 {
                    return None;
                }
                data.truncate(n);
                *offset += n as u64;
                if let Some(remaining) = length {
                    *remaining -= n as u64;
                }
                Some(data)
            }
            _ => None,
        }
    }

    /// Total body length if known up front (a `Buffer`, or a `File` with
    /// an explicit `length`). `None` means the body must be framed by
    /// closing the connection once it's exhausted, since there's no way
    /// to tell the peer how much is coming.
    pub fn known_body_length(&self) -> Option<u64> {
        let inner = self.inner.lock().expect("response mutex poisoned");
        match &inner.source {
            Some(DataSource::Buffer(b)) => Some(b.len() as u64),
            Some(DataSource::File { length: Some(len), .. }) => Some(*len),
            Some(DataSource::File { length: None, .. }) | Some(DataSource::Callback(_)) => None,
            None => Some(0),
        }
    }

    pub fn from_buffer(status: Status, body: Vec<u8>) -> Response {
        Response::new(status, DataSource::Buffer(body))
    }

    pub fn from_callback<F>(status: Status, callback: F) -> Response
    where
        F: FnMut() -> Option<Vec<u8>> + Send + 'static,
    {
        Response::new(status, DataSource::Callback(Box::new(callback)))
    }

    pub fn from_fd_at_offset(status: Status, fd: std::os::unix::io::RawFd, offset: u64, length: Option<u64>) -> Response {
        Response::new(status, DataSource::File { fd, offset, length })
    }

    /// Add a response header. Rejects values containing `\t`, `\r`, or
    /// `\n`, which would otherwise let a caller smuggle extra header
    /// lines or response-splitting payloads onto the wire.
    pub fn add_response_header(&self, name: &str, value: &[u8]) -> Result<(), ()> {
        if !header_value_ok(value) {
            return Err(());
        }
        let mut inner = self.inner.lock().expect("response mutex poisoned");
        inner.headers.push((name.to_owned(), value.to_vec()));
        Ok(())
    }

    pub fn add_response_footer(&self, name: &str, value: &[u8]) -> Result<(), ()> {
        if !header_value_ok(value) {
            return Err(());
        }
        let mut inner = self.inner.lock().expect("response mutex poisoned");
        inner.footers.push((name.to_owned(), value.to_vec()));
        Ok(())
    }

    /// Remove every header previously added under `name`, case-insensitively.
    pub fn del_response_header(&self, name: &str) {
        let mut inner = self.inner.lock().expect("response mutex poisoned");
        inner.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get_response_header(&self, name: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().expect("response mutex poisoned");
        inner
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn status(&self) -> Status {
        self.inner.lock().expect("response mutex poisoned").status.clone()
    }

    pub fn with_inner<R>(&self, f: impl FnOnce(&mut ResponseInner) -> R) -> R {
        let mut inner = self.inner.lock().expect("response mutex poisoned");
        f(&mut inner)
    }

    /// Mark the response as torn down: a handler thread still holding a
    /// clone must not queue any more body chunks after this. Mirrors the
    /// destroy() lifecycle operation so a response can be released early
    /// if a client disconnects mid-stream.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock().expect("response mutex poisoned");
        inner.destroyed = true;
        inner.source = None;
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().expect("response mutex poisoned").destroyed
    }
}
