//! Query descriptions: a statement shape, its bound parameters and a pure
//! parser from raw rows to a typed result.
//!
//! A `QuerySpec` owns no connection. Executors decide how and where the
//! statement runs; handlers only see the parsed value (or a `QueryError`).

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

use crate::error::QueryError;

/// A raw result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

type Parser<T> = Box<dyn FnOnce(Vec<Row>) -> Result<T, QueryError> + Send>;

/// Sort order for a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// The shape of a statement. Parameters are bound positionally in the order
/// returned by [`Statement::params`].
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select {
        table: &'static str,
        filter: Vec<(String, Value)>,
        order_by: Option<Order>,
        limit: Option<usize>,
    },
    Insert {
        table: &'static str,
        row: Row,
    },
    Update {
        table: &'static str,
        id: Uuid,
        row: Row,
    },
}

impl Statement {
    pub fn table(&self) -> &'static str {
        match self {
            Statement::Select { table, .. }
            | Statement::Insert { table, .. }
            | Statement::Update { table, .. } => table,
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(self, Statement::Select { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Statement::Update { .. })
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Statement::Insert { .. })
    }

    /// Bound parameter values, in placeholder order.
    pub fn params(&self) -> Vec<Value> {
        match self {
            Statement::Select { filter, .. } => filter.iter().map(|(_, v)| v.clone()).collect(),
            Statement::Insert { row, .. } => row.values().cloned().collect(),
            Statement::Update { id, row, .. } => row
                .values()
                .cloned()
                .chain(std::iter::once(Value::String(id.to_string())))
                .collect(),
        }
    }

    /// Value of a column assigned by an insert or update.
    pub fn assigned(&self, column: &str) -> Option<&Value> {
        match self {
            Statement::Select { .. } => None,
            Statement::Insert { row, .. } | Statement::Update { row, .. } => row.get(column),
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select {
                table,
                filter,
                order_by,
                limit,
            } => {
                write!(f, "SELECT * FROM {table}")?;
                for (i, (column, _)) in filter.iter().enumerate() {
                    let keyword = if i == 0 { "WHERE" } else { "AND" };
                    write!(f, " {keyword} {column} = ${}", i + 1)?;
                }
                if let Some(order) = order_by {
                    let direction = if order.descending { "DESC" } else { "ASC" };
                    write!(f, " ORDER BY {} {direction}", order.column)?;
                }
                if let Some(limit) = limit {
                    write!(f, " LIMIT {limit}")?;
                }
                Ok(())
            }
            Statement::Insert { table, row } => {
                let columns: Vec<&str> = row.keys().map(String::as_str).collect();
                let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
                write!(
                    f,
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(","),
                    placeholders.join(",")
                )
            }
            Statement::Update { table, row, .. } => {
                let assignments: Vec<String> = row
                    .keys()
                    .enumerate()
                    .map(|(i, column)| format!("{column} = ${}", i + 1))
                    .collect();
                write!(
                    f,
                    "UPDATE {table} SET {} WHERE id = ${}",
                    assignments.join(", "),
                    row.len() + 1
                )
            }
        }
    }
}

/// A statement plus the parser for its rows.
pub struct QuerySpec<T> {
    statement: Statement,
    parser: Parser<T>,
    invalid: Option<QueryError>,
}

impl<T: Send + 'static> QuerySpec<T> {
    pub fn new<F>(statement: Statement, parser: F) -> Self
    where
        F: FnOnce(Vec<Row>) -> Result<T, QueryError> + Send + 'static,
    {
        Self {
            statement,
            parser: Box::new(parser),
            invalid: None,
        }
    }

    /// A query that fails with `error` without reaching a connection.
    fn rejected(statement: Statement, error: QueryError) -> Self {
        Self {
            statement,
            parser: Box::new(|_| Err(QueryError::Execute("rejected statement".into()))),
            invalid: Some(error),
        }
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Compose a pure transformation onto the parser.
    pub fn map<U, F>(self, f: F) -> QuerySpec<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let parser = self.parser;
        QuerySpec {
            statement: self.statement,
            parser: Box::new(move |rows| parser(rows).map(f)),
            invalid: self.invalid,
        }
    }

    /// Run the parser over rows produced for this statement.
    pub fn parse(self, rows: Vec<Row>) -> Result<T, QueryError> {
        match self.invalid {
            Some(error) => Err(error),
            None => (self.parser)(rows),
        }
    }

    /// Split into the statement and a parser, failing if the statement could
    /// not be built.
    pub fn into_parts(self) -> Result<(Statement, QuerySpec<T>), QueryError> {
        if let Some(error) = self.invalid {
            return Err(error);
        }
        let statement = self.statement.clone();
        Ok((statement, self))
    }
}

impl<T> fmt::Debug for QuerySpec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("statement", &self.statement.to_string())
            .field("invalid", &self.invalid)
            .finish()
    }
}

/// A persisted record type, stored in one table keyed by `id`.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    const TABLE: &'static str;
}

/// A record together with its primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<R> {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: R,
}

impl<R: Record> Stored<R> {
    /// Every row of the table matching `filter`.
    pub fn select_where(filter: Vec<(String, Value)>) -> QuerySpec<Vec<Stored<R>>> {
        Self::select(filter, None, None)
    }

    /// The first row whose `column` equals `value`.
    pub fn select_by(column: &str, value: impl Serialize) -> QuerySpec<Option<Stored<R>>> {
        Self::select(vec![(column.to_string(), to_value(value))], None, Some(1))
            .map(|rows| rows.into_iter().next())
    }

    pub fn select(
        filter: Vec<(String, Value)>,
        order_by: Option<Order>,
        limit: Option<usize>,
    ) -> QuerySpec<Vec<Stored<R>>> {
        let statement = Statement::Select {
            table: R::TABLE,
            filter,
            order_by,
            limit,
        };
        QuerySpec::new(statement, |rows| rows.into_iter().map(decode).collect())
    }

    /// Overwrite the stored fields of this record.
    pub fn update(&self) -> QuerySpec<()> {
        let row = encode(&self.data).map(|mut row| {
            row.remove("id");
            row
        });
        match row {
            Ok(row) => QuerySpec::new(
                Statement::Update {
                    table: R::TABLE,
                    id: self.id,
                    row,
                },
                |_| Ok(()),
            ),
            Err(error) => QuerySpec::rejected(
                Statement::Update {
                    table: R::TABLE,
                    id: self.id,
                    row: Row::new(),
                },
                error,
            ),
        }
    }

    /// Encode as a raw row, as an executor would return it.
    pub fn to_row(&self) -> Result<Row, QueryError> {
        encode(self)
    }
}

/// Insert a new record; the query yields the id assigned to it.
pub fn insert<R: Record>(record: &R) -> QuerySpec<Uuid> {
    let id = Uuid::new_v4();
    let row = encode(record).map(|mut row| {
        row.insert("id".into(), Value::String(id.to_string()));
        row
    });
    match row {
        Ok(row) => QuerySpec::new(Statement::Insert { table: R::TABLE, row }, move |_| Ok(id)),
        Err(error) => QuerySpec::rejected(
            Statement::Insert {
                table: R::TABLE,
                row: Row::new(),
            },
            error,
        ),
    }
}

/// Encode a serializable value as a row.
pub fn encode<T: Serialize>(value: &T) -> Result<Row, QueryError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(QueryError::Parse(format!("expected an object, found {other}"))),
        Err(e) => Err(QueryError::Parse(e.to_string())),
    }
}

/// Decode a row into a typed value.
pub fn decode<T: DeserializeOwned>(row: Row) -> Result<T, QueryError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| QueryError::Parse(e.to_string()))
}

/// Encode a filter value.
pub fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
