// Middleware layers for interpreters
//
// A middleware wraps another interpreter and resolves every effect through
// it, adding a cross-cutting concern without touching handler code.

use bytes::Bytes;
use hyper::StatusCode;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::effects::{AsyncTask, Headers, Interpreter};
use crate::error::{QueryError, TaskError};
use crate::html::Node;
use crate::query::QuerySpec;
use crate::session::Session;

/// Tracing middleware that logs every resolved effect
pub struct Trace<I>(I);

impl<I> Trace<I> {
    pub fn new(inner: I) -> Self {
        Self(inner)
    }

    pub fn into_inner(self) -> I {
        self.0
    }
}

impl<I: Interpreter> Interpreter for Trace<I> {
    fn write_text(body: String, status: StatusCode, headers: Headers) -> Self {
        debug!(%status, bytes = body.len(), "write_text");
        Trace(I::write_text(body, status, headers))
    }

    fn write_binary(bytes: Bytes, status: StatusCode, headers: Headers) -> Self {
        debug!(%status, bytes = bytes.len(), "write_binary");
        Trace(I::write_binary(bytes, status, headers))
    }

    fn write_html(node: Node, status: StatusCode) -> Self {
        debug!(%status, "write_html");
        Trace(I::write_html(node, status))
    }

    fn write_file(path: String, max_age: Option<u64>) -> Self {
        debug!(%path, ?max_age, "write_file");
        Trace(I::write_file(path, max_age))
    }

    fn redirect(path: String, headers: Headers) -> Self {
        debug!(%path, "redirect");
        Trace(I::redirect(path, headers))
    }

    fn with_session<F>(cont: F) -> Self
    where
        F: FnOnce(Option<Session>) -> Self + Send + 'static,
    {
        trace!("with_session: start");
        Trace(I::with_session(move |session| {
            debug!(signed_in = session.is_some(), "with_session: resolved");
            cont(session).0
        }))
    }

    fn with_request_body<F>(cont: F) -> Self
    where
        F: FnOnce(Bytes) -> Self + Send + 'static,
    {
        trace!("with_request_body: start");
        Trace(I::with_request_body(move |body| {
            debug!(bytes = body.len(), "with_request_body: read");
            cont(body).0
        }))
    }

    fn run_query<T, F>(query: QuerySpec<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, QueryError>) -> Self + Send + 'static,
    {
        let statement = query.statement().to_string();
        let start = Instant::now();
        trace!(%statement, "run_query: start");
        Trace(I::run_query(query, move |result| {
            let duration = start.elapsed();
            match &result {
                Ok(_) => debug!(%statement, ?duration, "run_query: success"),
                Err(e) => warn!(%statement, ?duration, error = %e, "run_query: failed"),
            }
            cont(result).0
        }))
    }

    fn await_async<T, F>(task: AsyncTask<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, TaskError>) -> Self + Send + 'static,
    {
        let description = task.description().to_string();
        let start = Instant::now();
        trace!(task = %description, "await_async: start");
        Trace(I::await_async(task, move |result| {
            let duration = start.elapsed();
            match &result {
                Ok(_) => debug!(task = %description, ?duration, "await_async: success"),
                Err(e) => warn!(task = %description, ?duration, error = %e, "await_async: failed"),
            }
            cont(result).0
        }))
    }

    fn detach(side: Self, then: Self) -> Self {
        debug!("detach");
        Trace(I::detach(side.0, then.0))
    }

    fn ensure<C>(body: Self, cleanup: C) -> Self
    where
        C: FnOnce() + Send + 'static,
    {
        Trace(I::ensure(body.0, move || {
            trace!("ensure: cleanup");
            cleanup()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Captured, InterpreterExt, Terminal, TestExecutor};
    use crate::query::{Row, Statement};

    #[test]
    fn tracing_does_not_change_the_outcome() {
        let query = QuerySpec::new(
            Statement::Select {
                table: "things",
                filter: Vec::new(),
                order_by: None,
                limit: None,
            },
            |rows: Vec<Row>| Ok(rows.len()),
        );
        let traced = Trace::<Captured>::query_or_fail(query, |n| {
            Trace::write(format!("{n} things"))
        });
        let outcome = TestExecutor::new()
            .with_queries(|_| Ok(vec![Row::new()]))
            .run(traced.into_inner());
        assert!(matches!(outcome.terminal, Terminal::Text { ref body, .. } if body == "1 things"));
        assert_eq!(outcome.queries().len(), 1);
    }
}
