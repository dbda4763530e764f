// Interpreter implementations
//
// - production: hyper responses, pooled connections, spawned side chains
// - testing: captured effect trees resolved from stubs

pub mod production;
pub mod testing;

pub use production::{CancelHandle, ProductionExecutor, Reply, RequestContext, SessionResolver};
pub use testing::{task_value, Captured, Outcome, Resolved, Terminal, TestExecutor};
