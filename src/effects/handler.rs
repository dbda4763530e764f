// Interpreter contract for effectful request handlers
//
// Handlers are written once against `Interpreter` and return a value of the
// interpreter's own type. The production executor turns that value into a
// response; the test executor keeps it as an inspectable tree.

use bytes::Bytes;
use hyper::StatusCode;
use serde::Serialize;
use std::fmt::Display;
use tracing::{debug, error, warn};

use crate::effects::{AsyncTask, Headers};
use crate::error::{QueryError, ServerError, TaskError};
use crate::html::{error_page, Node};
use crate::query::QuerySpec;
use crate::session::Session;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// One resolver per effect case.
///
/// Terminal cases (`write_*`, `redirect`) end a chain. The remaining cases
/// suspend and hand their outcome to a continuation, which is called at most
/// once and exactly once whenever the effect completes or fails.
pub trait Interpreter: Sized + Send + 'static {
    fn write_text(body: String, status: StatusCode, headers: Headers) -> Self;

    fn write_binary(bytes: Bytes, status: StatusCode, headers: Headers) -> Self;

    /// Write an HTML page. Interpreters that only deal in bytes can rely on
    /// the default, which renders the node.
    fn write_html(node: Node, status: StatusCode) -> Self {
        let mut headers = Headers::new();
        headers.insert(CONTENT_TYPE.into(), HTML_CONTENT_TYPE.into());
        Self::write_text(node.render_document(), status, headers)
    }

    /// Serve a static file, optionally cacheable for `max_age` seconds.
    fn write_file(path: String, max_age: Option<u64>) -> Self;

    fn redirect(path: String, headers: Headers) -> Self;

    /// Resolve the caller's session, which may be absent.
    fn with_session<F>(cont: F) -> Self
    where
        F: FnOnce(Option<Session>) -> Self + Send + 'static;

    fn with_request_body<F>(cont: F) -> Self
    where
        F: FnOnce(Bytes) -> Self + Send + 'static;

    /// Run a query on a scoped connection and continue with its parsed result.
    fn run_query<T, F>(query: QuerySpec<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, QueryError>) -> Self + Send + 'static;

    fn await_async<T, F>(task: AsyncTask<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, TaskError>) -> Self + Send + 'static;

    /// Run `side` independently of the request and continue with `then`.
    /// The outcome of `side` never reaches the client.
    fn detach(side: Self, then: Self) -> Self;

    /// Run `body` to its terminal effect, then `cleanup`. If `body` is
    /// abandoned before that, `cleanup` runs when it is dropped.
    fn ensure<C>(body: Self, cleanup: C) -> Self
    where
        C: FnOnce() + Send + 'static;
}

/// Convenience constructors built from the contract.
pub trait InterpreterExt: Interpreter {
    /// A 200 text response.
    fn write(body: impl Into<String>) -> Self {
        Self::write_text(body.into(), StatusCode::OK, Headers::new())
    }

    fn write_status(body: impl Into<String>, status: StatusCode) -> Self {
        Self::write_text(body.into(), status, Headers::new())
    }

    fn write_json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => {
                let mut headers = Headers::new();
                headers.insert(CONTENT_TYPE.into(), JSON_CONTENT_TYPE.into());
                Self::write_text(body, StatusCode::OK, headers)
            }
            Err(e) => Self::write_error(ServerError::new(
                format!("failed to encode JSON response: {e}"),
                crate::error::GENERIC_PUBLIC_MESSAGE,
            )),
        }
    }

    /// Log the private message and render the public one.
    fn write_error(error: ServerError) -> Self {
        if error.status.is_server_error() {
            error!(status = %error.status, error = %error.private_message, "request failed");
        } else {
            debug!(status = %error.status, error = %error.private_message, "request rejected");
        }
        Self::write_html(error_page(&error.public_message), error.status)
    }

    fn not_found(public_message: impl Into<String>) -> Self {
        Self::write_error(ServerError::not_found(public_message))
    }

    /// The empty 200 that ends a chain with nothing left to say.
    fn finish() -> Self {
        Self::write_text(String::new(), StatusCode::OK, Headers::new())
    }

    fn redirect_to(path: impl Into<String>) -> Self {
        Self::redirect(path.into(), Headers::new())
    }

    /// Run a query; a failure becomes a 500 with a generic public message.
    fn query_or_fail<T, F>(query: QuerySpec<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(T) -> Self + Send + 'static,
    {
        Self::run_query(query, move |result| match result {
            Ok(value) => cont(value),
            Err(e) => Self::write_error(e.into()),
        })
    }

    /// Await a task; a failure is logged and rendered with `public_message`.
    fn await_or_fail<T, F>(task: AsyncTask<T>, public_message: impl Into<String>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(T) -> Self + Send + 'static,
    {
        let public_message = public_message.into();
        let name = task.description().to_string();
        Self::await_async(task, move |result| match result {
            Ok(value) => cont(value),
            Err(e) => Self::write_error(ServerError::new(format!("{name}: {e}"), public_message)),
        })
    }

    /// Build a chain that may fail with a `ServerError`, rendering the
    /// failure instead.
    fn catch<F>(build: F) -> Self
    where
        F: FnOnce() -> Result<Self, ServerError>,
    {
        build().unwrap_or_else(Self::write_error)
    }

    /// End a detached chain, logging `result` if it failed.
    fn log_failure<T, E: Display>(context: &str, result: Result<T, E>) -> Self {
        if let Err(e) = result {
            warn!(context, error = %e, "side effect failed");
        }
        Self::finish()
    }
}

impl<I: Interpreter> InterpreterExt for I {}
