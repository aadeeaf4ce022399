//! Thread-per-connection blocking-socket daemon: one of the sanctioned
//! scheduling models, and the simplest one to embed into an application
//! that doesn't already run its own reactor. Each accepted connection
//! gets its own OS thread and its own `Connection` (and therefore its
//! own `MemoryPool`); the `RequestDispatch` and `Config` are shared
//! read-only via `Arc`.

use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::connection::Connection;
use crate::dispatch::RequestDispatch;
use crate::error::{Error, Result};

pub struct Daemon {
    config: Arc<Config>,
    dispatch: Arc<RequestDispatch>,
}

impl Daemon {
    pub fn new(config: Arc<Config>, dispatch: Arc<RequestDispatch>) -> Daemon {
        Daemon { config, dispatch }
    }

    /// Bind and accept connections forever, spawning one thread per
    /// connection. Returns only if the listening socket itself fails.
    pub fn listen_and_serve<A: ToSocketAddrs>(&self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr).map_err(Error::Io)?;
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("failed to accept connection: {}", e);
                    continue;
                }
            };
            self.spawn_connection(stream);
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream) {
        let config = self.config.clone();
        let dispatch = self.dispatch.clone();
        thread::spawn(move || {
            if let Err(e) = apply_timeouts(&stream, &config) {
                log::warn!("failed to set socket timeouts: {}", e);
            }
            let mut stream = stream;
            let mut conn = Connection::new(config);
            if let Err(e) = conn.serve(&mut stream, &dispatch) {
                log::debug!("connection ended: {}", e);
            }
        });
    }
}

fn apply_timeouts(stream: &TcpStream, config: &Config) -> std::io::Result<()> {
    // This socket-level timeout is only a polling granularity: it bounds
    // how long a single blocking `read()` can take before returning
    // `WouldBlock`/`TimedOut`, which is what lets `Connection` actually
    // observe the clock. The connection tracks its own `last_activity`
    // per phase (first byte, headers, body, keep-alive) against the
    // matching `Config` timeout and only then closes with the specific
    // `Error::*Timeout` variant; this coarse socket timeout is set once
    // and never needs re-applying.
    let poll = config
        .get_first_byte_timeout()
        .min(config.get_header_timeout())
        .min(config.get_body_timeout())
        .min(config.get_keep_alive_timeout());
    stream.set_read_timeout(Some(poll))?;
    stream.set_write_timeout(Some(config.get_header_timeout()))?;
    Ok(())
}
