// In-memory pool
//
// Tables are vectors of JSON rows behind a mutex; a semaphore bounds the
// number of connections handed out at once. Faults can be queued to make the
// next acquisition or execution fail.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::database::{Connection, Pool};
use crate::error::QueryError;
use crate::query::{encode, Record, Row, Statement, Stored};

/// A failure to inject into the next matching operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Acquire,
    Execute,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
}

impl PoolStats {
    /// Connections currently handed out. The two counters are read one
    /// after the other, so a concurrent release can briefly overtake.
    pub fn in_use(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

#[derive(Default)]
struct Shared {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    faults: Mutex<VecDeque<Fault>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl Shared {
    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.iter().position(|f| *f == fault) {
            Some(index) => {
                faults.remove(index);
                true
            }
            None => false,
        }
    }
}

#[derive(Clone)]
pub struct MemoryPool {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl MemoryPool {
    pub fn new(max_connections: usize, acquire_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            permits: Arc::new(Semaphore::new(max_connections)),
            acquire_timeout,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.shared.acquired.load(Ordering::SeqCst),
            released: self.shared.released.load(Ordering::SeqCst),
        }
    }

    /// Make the next operation of the given kind fail.
    pub fn inject_fault(&self, fault: Fault) {
        self.shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fault);
    }

    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn seed_record<R: Record>(&self, record: &Stored<R>) -> Result<(), QueryError> {
        let row = encode(record)?;
        self.seed(R::TABLE, [row]);
        Ok(())
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn records<R: Record>(&self) -> Result<Vec<Stored<R>>, QueryError> {
        self.rows(R::TABLE)
            .into_iter()
            .map(crate::query::decode)
            .collect()
    }

    /// Write every table to `path` as JSON.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let tables = self
            .shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let json = serde_json::to_vec_pretty(&tables)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), tables = tables.len(), "tables saved");
        Ok(())
    }

    /// Replace every table with the contents of a file written by
    /// [`MemoryPool::save`].
    pub fn restore(&self, path: &Path) -> io::Result<()> {
        let bytes = std::fs::read(path)?;
        let tables: HashMap<String, Vec<Row>> = serde_json::from_slice(&bytes)?;
        debug!(path = %path.display(), tables = tables.len(), "tables restored");
        *self
            .shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = tables;
        Ok(())
    }

    /// Execute `statement` against the tables directly, without a connection
    /// or injected faults.
    pub fn apply(&self, statement: &Statement) -> Result<Vec<Row>, QueryError> {
        let mut tables = self
            .shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let table = tables.entry(statement.table().to_string()).or_default();
        match statement {
            Statement::Select {
                filter,
                order_by,
                limit,
                ..
            } => {
                let mut rows: Vec<Row> = table
                    .iter()
                    .filter(|row| filter.iter().all(|(column, value)| row.get(column) == Some(value)))
                    .cloned()
                    .collect();
                if let Some(order) = order_by {
                    rows.sort_by(|a, b| {
                        let ordering = compare(a.get(&order.column), b.get(&order.column));
                        if order.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    });
                }
                if let Some(limit) = limit {
                    rows.truncate(*limit);
                }
                Ok(rows)
            }
            Statement::Insert { row, .. } => {
                table.push(row.clone());
                Ok(vec![row.clone()])
            }
            Statement::Update { id, row, .. } => {
                let id = Value::String(id.to_string());
                let Some(existing) = table.iter_mut().find(|existing| existing.get("id") == Some(&id)) else {
                    return Ok(Vec::new());
                };
                for (column, value) in row {
                    existing.insert(column.clone(), value.clone());
                }
                Ok(vec![existing.clone()])
            }
        }
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(16, Duration::from_secs(5))
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), Some(_)) => CmpOrdering::Less,
        (Some(_), None | Some(Value::Null)) => CmpOrdering::Greater,
        _ => CmpOrdering::Equal,
    }
}

#[async_trait]
impl Pool for MemoryPool {
    async fn acquire(&self) -> Result<Box<dyn Connection>, QueryError> {
        if self.shared.take_fault(Fault::Acquire) {
            return Err(QueryError::Acquire("injected acquisition fault".into()));
        }
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                QueryError::Acquire(format!(
                    "no connection available within {:?}",
                    self.acquire_timeout
                ))
            })?
            .map_err(|e| QueryError::Acquire(e.to_string()))?;
        let acquired = self.shared.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(acquired, "connection acquired");
        Ok(Box::new(MemoryConnection {
            pool: self.clone(),
            _permit: permit,
        }))
    }
}

struct MemoryConnection {
    pool: MemoryPool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, QueryError> {
        if self.pool.shared.take_fault(Fault::Execute) {
            return Err(QueryError::Execute(format!("injected fault executing `{statement}`")));
        }
        debug!(%statement, "executing");
        self.pool.apply(statement)
    }

    fn release(self: Box<Self>) {
        let released = self.pool.shared.released.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(released, "connection released");
    }
}
