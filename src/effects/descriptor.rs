// Reified effect descriptors
//
// `Effect<I>` is the closed set of effects a handler can request, held as a
// value. Query and task nodes hide their result type behind the
// `PendingQuery`/`PendingTask` objects so a whole tree can be walked without
// knowing what each step produces.

use bytes::Bytes;
use hyper::StatusCode;
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;

use crate::effects::{AsyncTask, Interpreter, Scoped, TaskDescription};
use crate::error::{QueryError, TaskError};
use crate::html::Node;
use crate::query::{QuerySpec, Row, Statement};
use crate::session::Session;

/// Response headers, kept ordered so captured output is deterministic.
pub type Headers = BTreeMap<String, String>;

/// A continuation producing the next step of a chain. Called at most once.
pub type Continuation<A, I> = Box<dyn FnOnce(A) -> I + Send>;

/// A requested effect with its continuation.
pub enum Effect<I> {
    WriteText {
        body: String,
        status: StatusCode,
        headers: Headers,
    },
    WriteBinary {
        bytes: Bytes,
        status: StatusCode,
        headers: Headers,
    },
    WriteHtml {
        node: Node,
        status: StatusCode,
    },
    WriteFile {
        path: String,
        max_age: Option<u64>,
    },
    Redirect {
        path: String,
        headers: Headers,
    },
    WithSession(Continuation<Option<Session>, I>),
    WithRequestBody(Continuation<Bytes, I>),
    RunQuery(Box<dyn PendingQuery<I>>),
    AwaitAsync(Box<dyn PendingTask<I>>),
    /// Run `side` on its own and continue with `then`.
    Detach {
        side: Box<I>,
        then: Box<I>,
    },
    /// Run `body` to its terminal, then release `cleanup`.
    Ensure {
        body: Box<I>,
        cleanup: Scoped<()>,
    },
}

impl<I> Effect<I> {
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::WriteText { .. } => "write_text",
            Effect::WriteBinary { .. } => "write_binary",
            Effect::WriteHtml { .. } => "write_html",
            Effect::WriteFile { .. } => "write_file",
            Effect::Redirect { .. } => "redirect",
            Effect::WithSession(_) => "with_session",
            Effect::WithRequestBody(_) => "with_request_body",
            Effect::RunQuery(_) => "run_query",
            Effect::AwaitAsync(_) => "await_async",
            Effect::Detach { .. } => "detach",
            Effect::Ensure { .. } => "ensure",
        }
    }
}

impl<I: Interpreter> Effect<I> {
    pub fn query<T, F>(query: QuerySpec<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, QueryError>) -> I + Send + 'static,
    {
        Effect::RunQuery(Box::new(QueryStep {
            query,
            cont: Box::new(cont),
        }))
    }

    pub fn task<T, F>(task: AsyncTask<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, TaskError>) -> I + Send + 'static,
    {
        Effect::AwaitAsync(Box::new(TaskStep {
            task,
            cont: Box::new(cont),
        }))
    }

    /// Hand this descriptor to the resolver for its case.
    pub fn interpret(self) -> I {
        match self {
            Effect::WriteText {
                body,
                status,
                headers,
            } => I::write_text(body, status, headers),
            Effect::WriteBinary {
                bytes,
                status,
                headers,
            } => I::write_binary(bytes, status, headers),
            Effect::WriteHtml { node, status } => I::write_html(node, status),
            Effect::WriteFile { path, max_age } => I::write_file(path, max_age),
            Effect::Redirect { path, headers } => I::redirect(path, headers),
            Effect::WithSession(cont) => I::with_session(cont),
            Effect::WithRequestBody(cont) => I::with_request_body(cont),
            Effect::RunQuery(pending) => pending.reissue(),
            Effect::AwaitAsync(pending) => pending.reissue(),
            Effect::Detach { side, then } => I::detach(*side, *then),
            Effect::Ensure { body, cleanup } => I::ensure(*body, move || cleanup.release()),
        }
    }
}

impl<I> fmt::Debug for Effect<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::WriteText { body, status, .. } => f
                .debug_struct("WriteText")
                .field("status", status)
                .field("body", body)
                .finish_non_exhaustive(),
            Effect::WriteBinary { bytes, status, .. } => f
                .debug_struct("WriteBinary")
                .field("status", status)
                .field("len", &bytes.len())
                .finish_non_exhaustive(),
            Effect::WriteHtml { status, .. } => f
                .debug_struct("WriteHtml")
                .field("status", status)
                .finish_non_exhaustive(),
            Effect::WriteFile { path, max_age } => f
                .debug_struct("WriteFile")
                .field("path", path)
                .field("max_age", max_age)
                .finish(),
            Effect::Redirect { path, .. } => f
                .debug_struct("Redirect")
                .field("path", path)
                .finish_non_exhaustive(),
            Effect::RunQuery(pending) => f
                .debug_tuple("RunQuery")
                .field(&pending.statement().to_string())
                .finish(),
            Effect::AwaitAsync(pending) => f
                .debug_tuple("AwaitAsync")
                .field(pending.description())
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// A query node whose result type has been erased.
pub trait PendingQuery<I>: Send {
    fn statement(&self) -> &Statement;

    /// Feed raw rows (or the failure to get them) through the query's parser
    /// into the continuation.
    fn resolve(self: Box<Self>, rows: Result<Vec<Row>, QueryError>) -> I;

    /// Rebuild the node through the interpreter's own `run_query`.
    fn reissue(self: Box<Self>) -> I
    where
        I: Interpreter;
}

/// A task node whose result type has been erased.
pub trait PendingTask<I>: Send {
    fn description(&self) -> &TaskDescription;

    /// Complete the task with a value that must have the task's output type.
    fn resolve(self: Box<Self>, value: Result<Box<dyn Any + Send>, TaskError>) -> I;

    /// Give up the task's future and the continuation, typed again.
    fn reissue(self: Box<Self>) -> I
    where
        I: Interpreter;
}

struct QueryStep<T, I> {
    query: QuerySpec<T>,
    cont: Continuation<Result<T, QueryError>, I>,
}

impl<T: Send + 'static, I: 'static> PendingQuery<I> for QueryStep<T, I> {
    fn statement(&self) -> &Statement {
        self.query.statement()
    }

    fn resolve(self: Box<Self>, rows: Result<Vec<Row>, QueryError>) -> I {
        let QueryStep { query, cont } = *self;
        cont(rows.and_then(|rows| query.parse(rows)))
    }

    fn reissue(self: Box<Self>) -> I
    where
        I: Interpreter,
    {
        let QueryStep { query, cont } = *self;
        I::run_query(query, cont)
    }
}

struct TaskStep<T, I> {
    task: AsyncTask<T>,
    cont: Continuation<Result<T, TaskError>, I>,
}

impl<T: Send + 'static, I: 'static> PendingTask<I> for TaskStep<T, I> {
    fn description(&self) -> &TaskDescription {
        self.task.description()
    }

    fn resolve(self: Box<Self>, value: Result<Box<dyn Any + Send>, TaskError>) -> I {
        let TaskStep { task, cont } = *self;
        let name = &task.description().name;
        let value = value.and_then(|value| {
            value.downcast::<T>().map(|value| *value).map_err(|_| {
                TaskError::Stub(format!("{name} expects a value of type {}", type_name::<T>()))
            })
        });
        cont(value)
    }

    fn reissue(self: Box<Self>) -> I
    where
        I: Interpreter,
    {
        let TaskStep { task, cont } = *self;
        I::await_async(task, cont)
    }
}
