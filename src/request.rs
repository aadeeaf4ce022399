//! The read-only view a handler gets of an incoming request. Borrows
//! straight into the connection's pool and header store rather than
//! copying anything — a handler runs synchronously on the connection's
//! own thread before the connection moves on, so there's no lifetime
//! reason to own a copy.

use crate::enums::{Method, Version};
use crate::headers::{self, HeaderStore, ValueKind};
use crate::pool::MemoryPool;

pub struct Request<'a> {
    pub(crate) pool: &'a MemoryPool,
    pub(crate) headers: &'a HeaderStore,
    pub method: Method,
    pub url: &'a str,
    pub query: Option<&'a str>,
    pub version: Version,
    pub body: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.lookup(self.pool, ValueKind::HEADER, name)
    }

    pub fn footer(&self, name: &str) -> Option<&'a str> {
        self.headers.lookup(self.pool, ValueKind::FOOTER, name)
    }

    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers.lookup(self.pool, ValueKind::COOKIE, name)
    }

    pub fn get_arg(&self, name: &str) -> Option<&'a str> {
        self.headers.lookup(self.pool, ValueKind::GET_ARG, name)
    }

    pub fn post_arg(&self, name: &str) -> Option<&'a str> {
        self.headers.lookup(self.pool, ValueKind::POST_ARG, name)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.headers.iter_kind(ValueKind::HEADER).map(move |e| {
            (headers::text(self.pool, e.name.clone()), headers::text(self.pool, e.value.clone()))
        })
    }
}
