//! Warehouse client abstraction

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by a warehouse client
#[derive(Debug, Clone, Error)]
pub enum WarehouseError {
    #[error("cannot connect to warehouse: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unexpected result: {0}")]
    Result(String),
}

/// Tabular query result: ordered columns, row-oriented values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Single-value result, as returned by `SELECT COUNT(*) ...`
    pub fn count(value: i64) -> Self {
        Self {
            columns: vec!["count".to_string()],
            rows: vec![vec![Value::from(value)]],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// The scalar as an integer count
    pub fn scalar_count(&self) -> Result<i64, WarehouseError> {
        let value = self
            .scalar()
            .ok_or_else(|| WarehouseError::Result("query returned no rows".to_string()))?;

        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
        .ok_or_else(|| WarehouseError::Result(format!("expected an integer count, got {}", value)))
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// One compact JSON record per line
    pub fn to_json_lines(&self) -> String {
        self.to_records()
            .into_iter()
            .map(|record| Value::Object(record).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Header row then one CSV record per row
    ///
    /// Strings are written unquoted unless they need quoting, nulls as empty
    /// fields, and other values in their JSON form.
    pub fn to_csv(&self) -> Result<String, WarehouseError> {
        let encode = |e: csv::Error| WarehouseError::Result(format!("cannot encode CSV: {}", e));

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns).map_err(encode)?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|value| match value {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }))
                .map_err(encode)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| WarehouseError::Result(format!("cannot encode CSV: {}", e.error())))?;
        String::from_utf8(bytes).map_err(|e| WarehouseError::Result(e.to_string()))
    }
}

/// Trait for warehouse clients - allows for different implementations
///
/// One client is shared by every query-backed step of a run; queries are
/// submitted one at a time.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Submit a query and wait for the complete result set
    async fn query(&self, sql: &str) -> Result<ResultSet, WarehouseError>;
}

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteWarehouse;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::{ResultSet, Warehouse, WarehouseError};
    use async_trait::async_trait;
    use serde_json::Value;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
    use sqlx::{Column, Row, TypeInfo, ValueRef};
    use tracing::debug;

    /// Warehouse backed by a SQLite database
    ///
    /// Holds a single connection, so `sqlite::memory:` databases survive
    /// between queries.
    #[derive(Debug, Clone)]
    pub struct SqliteWarehouse {
        pool: SqlitePool,
    }

    impl SqliteWarehouse {
        /// Connect to a database URL such as `sqlite://warehouse.db`
        pub async fn connect(url: &str) -> Result<Self, WarehouseError> {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(url)
                .await
                .map_err(|e| WarehouseError::Connection(format!("{}: {}", url, e)))?;

            debug!("Connected to warehouse at {}", url);
            Ok(Self { pool })
        }

        /// In-memory warehouse
        pub async fn in_memory() -> Result<Self, WarehouseError> {
            Self::connect("sqlite::memory:").await
        }

        /// Execute one or more statements, discarding results
        pub async fn execute_script(&self, sql: &str) -> Result<(), WarehouseError> {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| WarehouseError::Query(e.to_string()))?;
            Ok(())
        }

        fn decode(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                return Ok(Value::Null);
            }

            let type_name = raw.type_info().name().to_ascii_uppercase();
            let value = match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => Value::from(format!("<{} bytes>", row.try_get_unchecked::<Vec<u8>, _>(index)?.len())),
                _ => Value::from(row.try_get_unchecked::<String, _>(index)?),
            };
            Ok(value)
        }
    }

    #[async_trait]
    impl Warehouse for SqliteWarehouse {
        async fn query(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
            let rows = sqlx::query(sql)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| WarehouseError::Query(e.to_string()))?;

            let columns = rows
                .first()
                .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();

            let rows = rows
                .iter()
                .map(|row| {
                    (0..row.len())
                        .map(|i| Self::decode(row, i))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| WarehouseError::Result(e.to_string()))?;

            debug!("Query returned {} rows", rows.len());
            Ok(ResultSet::new(columns, rows))
        }
    }
}
