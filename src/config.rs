//! Fluent connection/daemon configuration, mirroring the builder-then-
//! `Arc` pattern: mutate a plain `Config` through chained setters, then
//! call `done()` once to freeze it into the `Arc<Config>` every
//! connection shares read-only for the rest of its life.

use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pool_size: usize,
    first_byte_timeout: Duration,
    header_timeout: Duration,
    body_timeout: Duration,
    keep_alive_timeout: Duration,
    listen_backlog: i32,
}

impl Config {
    /// Create a config with defaults: a 32 KiB per-connection pool, a 10s
    /// allowance for the first byte and for finishing headers, and a 30s
    /// allowance for both body reads and idle keep-alive.
    pub fn new() -> Config {
        Config {
            pool_size: 32 * 1024,
            first_byte_timeout: Duration::from_secs(10),
            header_timeout: Duration::from_secs(10),
            body_timeout: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(30),
            listen_backlog: 128,
        }
    }

    /// Size, in bytes, of the bump-allocated pool handed to each
    /// connection. Exhausting it fails the request with `RequestTooLarge`
    /// rather than growing unbounded.
    pub fn pool_size(&mut self, value: usize) -> &mut Self {
        self.pool_size = value;
        self
    }

    /// How long to wait for the first byte of a new request on an
    /// otherwise-idle connection before treating it as abandoned.
    pub fn first_byte_timeout(&mut self, value: Duration) -> &mut Self {
        self.first_byte_timeout = value;
        self
    }

    /// How long a client has to finish sending the request line and
    /// headers once it has started.
    pub fn header_timeout(&mut self, value: Duration) -> &mut Self {
        self.header_timeout = value;
        self
    }

    /// How long a client has to finish sending the request body.
    pub fn body_timeout(&mut self, value: Duration) -> &mut Self {
        self.body_timeout = value;
        self
    }

    /// How long a keep-alive connection may sit idle between requests.
    pub fn keep_alive_timeout(&mut self, value: Duration) -> &mut Self {
        self.keep_alive_timeout = value;
        self
    }

    /// The `listen()` backlog passed to the OS socket.
    pub fn listen_backlog(&mut self, value: i32) -> &mut Self {
        self.listen_backlog = value;
        self
    }

    /// Freeze the config into a shareable `Arc`. Convenience wrapper so
    /// callers can write `Config::new().pool_size(64 * 1024).done()`.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }

    pub fn get_pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn get_first_byte_timeout(&self) -> Duration {
        self.first_byte_timeout
    }

    pub fn get_header_timeout(&self) -> Duration {
        self.header_timeout
    }

    pub fn get_body_timeout(&self) -> Duration {
        self.body_timeout
    }

    pub fn get_keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }

    pub fn get_listen_backlog(&self) -> i32 {
        self.listen_backlog
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
