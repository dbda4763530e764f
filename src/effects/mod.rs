//! Effect system for request handlers
//!
//! Handlers describe what should happen as a tree of effects built through
//! the [`Interpreter`] contract. The same handler runs against the
//! production [`Reply`] interpreter or the capturing [`Captured`] one, with
//! continuations chaining each suspended effect to the next.

pub mod combinators;
pub mod descriptor;
pub mod handler;
pub mod handlers;
pub mod middleware;
pub mod task;

pub use combinators::{Scoped, Step};
pub use descriptor::{Continuation, Effect, Headers, PendingQuery, PendingTask};
pub use handler::*;
pub use handlers::{
    task_value, CancelHandle, Captured, Outcome, ProductionExecutor, Reply, RequestContext,
    Resolved, SessionResolver, Terminal, TestExecutor,
};
pub use middleware::Trace;
pub use task::{AsyncTask, TaskDescription};
