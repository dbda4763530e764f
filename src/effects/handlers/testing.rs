// Capturing interpreter for tests
//
// `Captured` keeps every effect as data. `TestExecutor` walks a captured
// tree synchronously, answering sessions, bodies, queries and tasks from
// stubs, and records what it resolved along the way.

use bytes::Bytes;
use hyper::StatusCode;
use std::any::Any;

use crate::effects::{AsyncTask, Effect, Headers, Interpreter, Scoped, TaskDescription};
use crate::error::{QueryError, TaskError};
use crate::html::{Form, Node};
use crate::query::{QuerySpec, Row, Statement};
use crate::session::Session;

/// The test interpreter: an effect tree held as a value.
#[derive(Debug)]
pub struct Captured(pub Effect<Captured>);

impl Interpreter for Captured {
    fn write_text(body: String, status: StatusCode, headers: Headers) -> Self {
        Captured(Effect::WriteText {
            body,
            status,
            headers,
        })
    }

    fn write_binary(bytes: Bytes, status: StatusCode, headers: Headers) -> Self {
        Captured(Effect::WriteBinary {
            bytes,
            status,
            headers,
        })
    }

    fn write_html(node: Node, status: StatusCode) -> Self {
        Captured(Effect::WriteHtml { node, status })
    }

    fn write_file(path: String, max_age: Option<u64>) -> Self {
        Captured(Effect::WriteFile { path, max_age })
    }

    fn redirect(path: String, headers: Headers) -> Self {
        Captured(Effect::Redirect { path, headers })
    }

    fn with_session<F>(cont: F) -> Self
    where
        F: FnOnce(Option<Session>) -> Self + Send + 'static,
    {
        Captured(Effect::WithSession(Box::new(cont)))
    }

    fn with_request_body<F>(cont: F) -> Self
    where
        F: FnOnce(Bytes) -> Self + Send + 'static,
    {
        Captured(Effect::WithRequestBody(Box::new(cont)))
    }

    fn run_query<T, F>(query: QuerySpec<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, QueryError>) -> Self + Send + 'static,
    {
        Captured(Effect::query(query, cont))
    }

    fn await_async<T, F>(task: AsyncTask<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, TaskError>) -> Self + Send + 'static,
    {
        Captured(Effect::task(task, cont))
    }

    fn detach(side: Self, then: Self) -> Self {
        Captured(Effect::Detach {
            side: Box::new(side),
            then: Box::new(then),
        })
    }

    fn ensure<C>(body: Self, cleanup: C) -> Self
    where
        C: FnOnce() + Send + 'static,
    {
        Captured(Effect::Ensure {
            body: Box::new(body),
            cleanup: Scoped::new((), move |()| cleanup()),
        })
    }
}

/// The terminal effect a chain ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Text {
        body: String,
        status: StatusCode,
        headers: Headers,
    },
    Binary {
        bytes: Bytes,
        status: StatusCode,
        headers: Headers,
    },
    Html {
        node: Node,
        status: StatusCode,
    },
    File {
        path: String,
        max_age: Option<u64>,
    },
    Redirect {
        path: String,
        headers: Headers,
    },
}

impl Terminal {
    pub fn status(&self) -> StatusCode {
        match self {
            Terminal::Text { status, .. }
            | Terminal::Binary { status, .. }
            | Terminal::Html { status, .. } => *status,
            Terminal::File { .. } => StatusCode::OK,
            Terminal::Redirect { .. } => StatusCode::FOUND,
        }
    }

    pub fn is_error(&self) -> bool {
        let status = self.status();
        status.is_client_error() || status.is_server_error()
    }

    /// Link targets of a captured HTML page; empty for anything else.
    pub fn link_targets(&self) -> Vec<String> {
        match self {
            Terminal::Html { node, .. } => node.link_targets(),
            _ => Vec::new(),
        }
    }

    /// Forms of a captured HTML page; empty for anything else.
    pub fn forms(&self) -> Vec<Form> {
        match self {
            Terminal::Html { node, .. } => node.forms(),
            _ => Vec::new(),
        }
    }

    /// The body as text, rendering HTML pages.
    pub fn body_text(&self) -> String {
        match self {
            Terminal::Text { body, .. } => body.clone(),
            Terminal::Binary { bytes, .. } => String::from_utf8_lossy(bytes).into_owned(),
            Terminal::Html { node, .. } => node.render_document(),
            Terminal::File { .. } | Terminal::Redirect { .. } => String::new(),
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Terminal::Redirect { path, .. } => Some(path.as_str()),
            _ => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        match self {
            Terminal::Text { headers, .. }
            | Terminal::Binary { headers, .. }
            | Terminal::Redirect { headers, .. } => headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }
}

/// One step the executor resolved, in order.
#[derive(Debug)]
pub enum Resolved {
    Session { signed_in: bool },
    RequestBody { len: usize },
    Query { statement: Statement, ok: bool },
    Task { description: TaskDescription, ok: bool },
    Detached(Outcome),
    /// A scoped cleanup ran after the chain it guarded ended.
    Cleanup,
}

/// The result of running a captured tree.
#[derive(Debug)]
pub struct Outcome {
    pub terminal: Terminal,
    pub trace: Vec<Resolved>,
}

impl Outcome {
    /// Statements issued by this chain, not counting detached chains.
    pub fn queries(&self) -> Vec<&Statement> {
        self.trace
            .iter()
            .filter_map(|step| match step {
                Resolved::Query { statement, .. } => Some(statement),
                _ => None,
            })
            .collect()
    }

    /// Statements issued by this chain and every chain it detached.
    pub fn all_queries(&self) -> Vec<&Statement> {
        let mut queries = Vec::new();
        for step in &self.trace {
            match step {
                Resolved::Query { statement, .. } => queries.push(statement),
                Resolved::Detached(outcome) => queries.extend(outcome.all_queries()),
                _ => {}
            }
        }
        queries
    }

    pub fn tasks(&self) -> Vec<&TaskDescription> {
        self.trace
            .iter()
            .filter_map(|step| match step {
                Resolved::Task { description, .. } => Some(description),
                _ => None,
            })
            .collect()
    }

    /// Tasks awaited by this chain and every chain it detached.
    pub fn all_tasks(&self) -> Vec<&TaskDescription> {
        let mut tasks = Vec::new();
        for step in &self.trace {
            match step {
                Resolved::Task { description, .. } => tasks.push(description),
                Resolved::Detached(outcome) => tasks.extend(outcome.all_tasks()),
                _ => {}
            }
        }
        tasks
    }

    pub fn detached(&self) -> Vec<&Outcome> {
        self.trace
            .iter()
            .filter_map(|step| match step {
                Resolved::Detached(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }
}

type QueryStub = Box<dyn FnMut(&Statement) -> Result<Vec<Row>, QueryError> + Send>;
type TaskStub = Box<dyn FnMut(&TaskDescription) -> Result<Box<dyn Any + Send>, TaskError> + Send>;

/// Box a stubbed task result.
pub fn task_value<T: Any + Send>(value: T) -> Result<Box<dyn Any + Send>, TaskError> {
    Ok(Box::new(value))
}

/// Resolves captured trees from stubs.
///
/// Unstubbed queries return no rows and unstubbed tasks fail with
/// `TaskError::Stub`. Detached chains run to completion before the chain
/// that detached them continues.
pub struct TestExecutor {
    session: Option<Session>,
    body: Bytes,
    queries: QueryStub,
    tasks: TaskStub,
}

impl Default for TestExecutor {
    fn default() -> Self {
        Self {
            session: None,
            body: Bytes::new(),
            queries: Box::new(|_| Ok(Vec::new())),
            tasks: Box::new(|description| {
                Err(TaskError::Stub(format!("no stub for task {description}")))
            }),
        }
    }
}

impl TestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_queries<F>(mut self, stub: F) -> Self
    where
        F: FnMut(&Statement) -> Result<Vec<Row>, QueryError> + Send + 'static,
    {
        self.queries = Box::new(stub);
        self
    }

    pub fn with_tasks<F>(mut self, stub: F) -> Self
    where
        F: FnMut(&TaskDescription) -> Result<Box<dyn Any + Send>, TaskError> + Send + 'static,
    {
        self.tasks = Box::new(stub);
        self
    }

    /// Resolve `captured` until its terminal effect.
    pub fn run(&mut self, captured: Captured) -> Outcome {
        let mut trace = Vec::new();
        let mut current = captured.0;
        loop {
            current = match current {
                Effect::WriteText {
                    body,
                    status,
                    headers,
                } => {
                    return Outcome {
                        terminal: Terminal::Text {
                            body,
                            status,
                            headers,
                        },
                        trace,
                    }
                }
                Effect::WriteBinary {
                    bytes,
                    status,
                    headers,
                } => {
                    return Outcome {
                        terminal: Terminal::Binary {
                            bytes,
                            status,
                            headers,
                        },
                        trace,
                    }
                }
                Effect::WriteHtml { node, status } => {
                    return Outcome {
                        terminal: Terminal::Html { node, status },
                        trace,
                    }
                }
                Effect::WriteFile { path, max_age } => {
                    return Outcome {
                        terminal: Terminal::File { path, max_age },
                        trace,
                    }
                }
                Effect::Redirect { path, headers } => {
                    return Outcome {
                        terminal: Terminal::Redirect { path, headers },
                        trace,
                    }
                }
                Effect::WithSession(cont) => {
                    trace.push(Resolved::Session {
                        signed_in: self.session.is_some(),
                    });
                    cont(self.session.clone()).0
                }
                Effect::WithRequestBody(cont) => {
                    trace.push(Resolved::RequestBody {
                        len: self.body.len(),
                    });
                    cont(self.body.clone()).0
                }
                Effect::RunQuery(pending) => {
                    let statement = pending.statement().clone();
                    let rows = (self.queries)(&statement);
                    trace.push(Resolved::Query {
                        statement,
                        ok: rows.is_ok(),
                    });
                    pending.resolve(rows).0
                }
                Effect::AwaitAsync(pending) => {
                    let description = pending.description().clone();
                    let value = (self.tasks)(&description);
                    trace.push(Resolved::Task {
                        description,
                        ok: value.is_ok(),
                    });
                    pending.resolve(value).0
                }
                Effect::Detach { side, then } => {
                    let side = self.run(*side);
                    trace.push(Resolved::Detached(side));
                    then.0
                }
                Effect::Ensure { body, cleanup } => {
                    let inner = self.run(*body);
                    trace.extend(inner.trace);
                    cleanup.release();
                    trace.push(Resolved::Cleanup);
                    return Outcome {
                        terminal: inner.terminal,
                        trace,
                    };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::InterpreterExt;

    fn notes() -> QuerySpec<usize> {
        QuerySpec::new(
            Statement::Select {
                table: "notes",
                filter: Vec::new(),
                order_by: None,
                limit: None,
            },
            |rows: Vec<Row>| Ok(rows.len()),
        )
    }

    #[test]
    fn task_stub_type_mismatch_reaches_the_failure_branch() {
        let task = AsyncTask::<u32>::ready("billing.coupon", "", Ok(1));
        let tree = Captured::await_async(task, |result| match result {
            Ok(n) => Captured::write(n.to_string()),
            Err(e) => Captured::write_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
        });
        let outcome = TestExecutor::new()
            .with_tasks(|_| task_value("not a number"))
            .run(tree);
        assert!(outcome.terminal.is_error());
        assert!(outcome.terminal.body_text().starts_with("stub value mismatch"));
    }

    #[test]
    fn detached_chains_are_recorded_but_do_not_decide_the_terminal() {
        let side = Captured::query_or_fail(notes(), |_| Captured::finish());
        let tree = Captured::detach(side, Captured::write("done"));
        let outcome = TestExecutor::new()
            .with_queries(|_| Err(QueryError::Execute("down".into())))
            .run(tree);
        assert_eq!(outcome.terminal.status(), StatusCode::OK);
        assert!(outcome.queries().is_empty());
        assert_eq!(outcome.all_queries().len(), 1);
        assert_eq!(outcome.detached()[0].terminal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn interpreting_a_reified_descriptor_rebuilds_the_same_step() {
        let effect = Effect::<Captured>::query(notes(), |result| {
            Captured::write(format!("{:?}", result))
        });
        let rebuilt = effect.interpret();
        let outcome = TestExecutor::new()
            .with_queries(|_| Ok(vec![Row::new(); 3]))
            .run(rebuilt);
        assert_eq!(outcome.terminal.body_text(), "Ok(3)");
    }

    #[test]
    fn sessions_and_bodies_are_recorded() {
        let tree = Captured::with_session(|session| {
            Captured::with_request_body(move |body| {
                Captured::write(format!("{} {}", session.is_some(), body.len()))
            })
        });
        let outcome = TestExecutor::new().with_body("hello").run(tree);
        assert_eq!(outcome.terminal.body_text(), "false 5");
        assert!(matches!(
            outcome.trace.as_slice(),
            [Resolved::Session { signed_in: false }, Resolved::RequestBody { len: 5 }]
        ));
    }
}
