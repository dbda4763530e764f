//! Request dispatch: one route, one handler, one effect tree.

use bitserve::{Interpreter, InterpreterExt};
use hyper::{Method, Request};
use tracing::debug;

use crate::handlers;
use crate::routes::Route;
use crate::Site;

pub const NOT_FOUND: &str = "Not found";

/// The parts of a request routing looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
}

impl RequestHead {
    pub fn new(method: Method, path: impl Into<String>, query: Option<&str>) -> Self {
        Self {
            method,
            path: path.into(),
            query: query.map(str::to_string),
        }
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self::new(
            request.method().clone(),
            request.uri().path(),
            request.uri().query(),
        )
    }

    /// A request for `route`, as a browser following its link would send it.
    pub fn for_route(route: &Route) -> Self {
        let url = route.path();
        match url.split_once('?') {
            Some((path, query)) => Self::new(route.method(), path, Some(query)),
            None => Self::new(route.method(), url, None),
        }
    }
}

/// Build the effect tree answering `head`.
///
/// Unknown routes are a 404. A `ServerError` raised while building the
/// handler is rendered as an error page.
pub fn dispatch<I: Interpreter>(site: &Site, head: &RequestHead) -> I {
    let Some(route) = Route::parse(&head.method, &head.path, head.query.as_deref()) else {
        debug!(method = %head.method, path = %head.path, "no route");
        return I::not_found(NOT_FOUND);
    };
    debug!(?route, "dispatching");
    I::catch(|| handlers::interpret(site, route))
}
