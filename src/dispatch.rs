//! Request routing: an ordered list of URI-prefix-named handlers plus a
//! default. Lookup is exact-match against the request's path, not a
//! true prefix match — the "prefix" in each registration's name is
//! documentary only, matching how the original router was specified.

use crate::request::Request;
use crate::response::Response;

pub type Handler = Box<dyn for<'a> Fn(&Request<'a>) -> Response + Send + Sync>;

pub struct RequestDispatch {
    routes: Vec<(String, Handler)>,
    default: Option<Handler>,
}

impl RequestDispatch {
    pub fn new() -> RequestDispatch {
        RequestDispatch { routes: Vec::new(), default: None }
    }

    /// Register `handler` under `uri`. Despite the name, dispatch is an
    /// exact match against the request's path — a handler registered for
    /// `/api` does not receive requests for `/api/widgets`.
    pub fn add_handler<F>(&mut self, uri_prefix: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&Request<'a>) -> Response + Send + Sync + 'static,
    {
        self.routes.push((uri_prefix.to_owned(), Box::new(handler)));
        self
    }

    pub fn set_default<F>(&mut self, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&Request<'a>) -> Response + Send + Sync + 'static,
    {
        self.default = Some(Box::new(handler));
        self
    }

    pub fn find_handler(&self, path: &str) -> Option<&Handler> {
        self.routes
            .iter()
            .find(|(registered, _)| registered == path)
            .map(|(_, h)| h)
            .or(self.default.as_ref())
    }
}

impl Default for RequestDispatch {
    fn default() -> RequestDispatch {
        RequestDispatch::new()
    }
}
