//! Connection pool contract used by the production executor.

use async_trait::async_trait;

use crate::error::QueryError;
use crate::query::{Row, Statement};

pub mod memory;

pub use memory::{Fault, MemoryPool, PoolStats};

/// A source of exclusively owned connections.
#[async_trait]
pub trait Pool: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Connection>, QueryError>;
}

/// A connection held by one query chain at a time.
#[async_trait]
pub trait Connection: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, QueryError>;

    /// Return the connection to its pool.
    fn release(self: Box<Self>);
}
