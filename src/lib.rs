//! Embeddable HTTP/1.1 server core.
//!
//! The pieces an embedding application links against directly:
//! [`config::Config`] to size and time out connections, [`dispatch::RequestDispatch`]
//! to route requests to handlers, [`response::Response`] to build what a handler
//! returns, and [`daemon::Daemon`] to actually accept connections and drive
//! them — or, for an application that wants to run its own accept loop,
//! [`connection::Connection`] directly.

#[macro_use]
extern crate quick_error;
#[macro_use]
extern crate matches;

pub mod build_header;
pub mod chunked;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod dispatch;
mod enums;
pub mod error;
pub mod event_loop;
mod headers;
pub mod parse;
mod pool;
pub mod request;
pub mod response;

pub use config::Config;
pub use connection::Connection;
pub use daemon::Daemon;
pub use dispatch::RequestDispatch;
pub use enums::{HttpStatus, Method, Status, Version};
pub use error::{Error, Result};
pub use request::Request;
pub use response::Response;
