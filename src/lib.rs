//! Pure request handlers over a pluggable effect interpreter
//!
//! Handlers are written once, generic over [`Interpreter`], and return a
//! description of the effects a request needs: responses, redirects, session
//! reads, queries, asynchronous calls and body reads. The production
//! executor performs them against a connection pool and real sockets; the
//! test executor resolves them from stubs and captures the result.

pub mod database;
pub mod effects;
pub mod error;
pub mod html;
pub mod query;
pub mod reference;
pub mod session;

// Re-export main APIs
pub use effects::{
    AsyncTask, Captured, Effect, Headers, Interpreter, InterpreterExt, Outcome, ProductionExecutor,
    Reply, Scoped, Step, TaskDescription, Terminal, TestExecutor, Trace,
};
pub use error::{QueryError, Result, ServerError, TaskError, GENERIC_PUBLIC_MESSAGE};
pub use html::Node;
pub use query::{QuerySpec, Record, Row, Statement, Stored};
pub use reference::Reference;
pub use session::Session;
