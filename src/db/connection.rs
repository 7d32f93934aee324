//! Target database connections using sqlx
//!
//! Every configured database is reached through a [`QueryTarget`]. The sqlx
//! implementation holds one native pool per database (Postgres, MySQL or
//! SQLite, picked from the URL scheme) and decodes each column from that
//! driver's own type information.

use crate::config::DatabaseConfig;
use crate::db::dialect::{Dialect, ExplainPlan};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Number, Value};
use sqlx::mysql::{MySql, MySqlPool, MySqlRow};
use sqlx::pool::PoolOptions;
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, ColumnIndex, Database, Row, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One result row keyed by column name, in result-set column order
pub type RowMap = Map<String, Value>;

#[async_trait]
pub trait QueryTarget: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run plan-only statements in a single transaction that is always rolled back.
    async fn explain(&self, plan: &ExplainPlan) -> Result<()>;

    /// Run `sql` in its own transaction and collect the whole result set.
    async fn fetch_all(&self, sql: &str) -> Result<Vec<RowMap>>;
}

/// Native sqlx pool for one of the supported drivers
pub enum DriverPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl From<PgPool> for DriverPool {
    fn from(pool: PgPool) -> Self {
        DriverPool::Postgres(pool)
    }
}

impl From<MySqlPool> for DriverPool {
    fn from(pool: MySqlPool) -> Self {
        DriverPool::MySql(pool)
    }
}

impl From<SqlitePool> for DriverPool {
    fn from(pool: SqlitePool) -> Self {
        DriverPool::Sqlite(pool)
    }
}

/// Runs the same block against whichever native pool is held.
macro_rules! with_pool {
    ($pool:expr, $p:ident => $body:expr) => {
        match $pool {
            DriverPool::Postgres($p) => $body,
            DriverPool::MySql($p) => $body,
            DriverPool::Sqlite($p) => $body,
        }
    };
}

/// Pooled sqlx connection to a target database
pub struct SqlxTarget {
    pool: DriverPool,
    dialect: Dialect,
}

impl SqlxTarget {
    pub fn new(pool: impl Into<DriverPool>, dialect: Dialect) -> Self {
        Self {
            pool: pool.into(),
            dialect,
        }
    }

    fn pool_options<DB: Database>() -> PoolOptions<DB> {
        PoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
    }

    /// Build a pool without connecting. Must be called inside a tokio runtime.
    ///
    /// The driver follows the URL scheme; `dialect` only selects the explain form.
    pub fn connect_lazy(url: &str, dialect: Dialect) -> Result<Self> {
        let (driver, url) = driver_url(url);
        let invalid =
            |e: sqlx::Error| GateError::Config(format!("Invalid database url '{}': {}", url, e));
        let pool: DriverPool = match driver {
            Dialect::Postgres => Self::pool_options::<Postgres>()
                .connect_lazy(&url)
                .map_err(invalid)?
                .into(),
            Dialect::MySql => Self::pool_options::<MySql>()
                .connect_lazy(&url)
                .map_err(invalid)?
                .into(),
            Dialect::Sqlite => Self::pool_options::<Sqlite>()
                .connect_lazy(&url)
                .map_err(invalid)?
                .into(),
            Dialect::MsSql | Dialect::Unknown => {
                return Err(GateError::Config(format!(
                    "No database driver for '{}' (supported: postgres, mysql, sqlite)",
                    url
                )))
            }
        };
        Ok(Self::new(pool, dialect))
    }
}

/// Driver family and sqlx-ready URL. SQLAlchemy-style `postgresql+psycopg2://`
/// loses its `+driver` suffix.
fn driver_url(url: &str) -> (Dialect, String) {
    let driver = Dialect::from_url(url);
    let url = match url.split_once("://") {
        Some((scheme, rest)) if scheme.contains('+') => {
            let scheme = scheme.split('+').next().unwrap_or_default();
            format!("{}://{}", scheme, rest)
        }
        _ => url.to_string(),
    };
    (driver, url)
}

#[async_trait]
impl QueryTarget for SqlxTarget {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn explain(&self, plan: &ExplainPlan) -> Result<()> {
        with_pool!(&self.pool, pool => {
            let mut tx = pool.begin().await?;
            for statement in plan.statements() {
                sqlx::query(&statement).execute(&mut *tx).await?;
            }
            tx.rollback().await?;
        });
        Ok(())
    }

    async fn fetch_all(&self, sql: &str) -> Result<Vec<RowMap>> {
        let rows: Vec<RowMap> = with_pool!(&self.pool, pool => {
            let mut tx = pool.begin().await?;
            let rows = sqlx::query(sql).fetch_all(&mut *tx).await?;
            tx.commit().await?;
            rows.iter().map(row_to_map).collect()
        });
        Ok(rows)
    }
}

/// Row of a native driver that can render each non-null column as JSON
trait JsonRow: Row {
    /// `None` when no decoding matches the column's type
    fn json_value(&self, idx: usize, type_name: &str) -> Option<Value>;
}

fn row_to_map<R>(row: &R) -> RowMap
where
    R: JsonRow,
    usize: ColumnIndex<R>,
{
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            let is_null = row.try_get_raw(idx).map(|raw| raw.is_null()).unwrap_or(true);
            let value = if is_null {
                Value::Null
            } else {
                let type_name = column.type_info().name();
                row.json_value(idx, type_name).unwrap_or_else(|| {
                    debug!("Column '{}' of type {} rendered as null", column.name(), type_name);
                    Value::Null
                })
            };
            (column.name().to_string(), value)
        })
        .collect()
}

impl JsonRow for PgRow {
    fn json_value(&self, idx: usize, type_name: &str) -> Option<Value> {
        let value = match type_name {
            "BOOL" => self.try_get::<bool, _>(idx).ok().map(Value::Bool),
            "INT2" => self.try_get::<i16, _>(idx).ok().map(Value::from),
            "INT4" => self.try_get::<i32, _>(idx).ok().map(Value::from),
            "INT8" => self.try_get::<i64, _>(idx).ok().map(Value::from),
            "FLOAT4" => self.try_get::<f32, _>(idx).ok().map(|v| float(v as f64)),
            "FLOAT8" => self.try_get::<f64, _>(idx).ok().map(float),
            "NUMERIC" => self.try_get::<Decimal, _>(idx).ok().map(decimal),
            "DATE" => self.try_get::<NaiveDate, _>(idx).ok().map(date),
            "TIME" => self.try_get::<NaiveTime, _>(idx).ok().map(time),
            "TIMESTAMP" => self.try_get::<NaiveDateTime, _>(idx).ok().map(datetime),
            "TIMESTAMPTZ" => self.try_get::<DateTime<Utc>, _>(idx).ok().map(datetime_utc),
            "UUID" => self.try_get::<Uuid, _>(idx).ok().map(|v| Value::String(v.to_string())),
            "JSON" | "JSONB" => self.try_get::<JsonValue, _>(idx).ok(),
            "BYTEA" => self.try_get::<Vec<u8>, _>(idx).ok().map(bytes),
            _ => None,
        };
        value.or_else(|| self.try_get::<String, _>(idx).ok().map(Value::String))
    }
}

impl JsonRow for MySqlRow {
    fn json_value(&self, idx: usize, type_name: &str) -> Option<Value> {
        let value = match type_name {
            "BOOLEAN" => self.try_get::<bool, _>(idx).ok().map(Value::Bool),
            "TINYINT" | "SMALLINT" | "INT" | "MEDIUMINT" | "BIGINT" => {
                self.try_get::<i64, _>(idx).ok().map(Value::from)
            }
            t if t.ends_with("UNSIGNED") || t == "YEAR" || t == "BIT" => {
                self.try_get::<u64, _>(idx).ok().map(Value::from)
            }
            "FLOAT" => self.try_get::<f32, _>(idx).ok().map(|v| float(v as f64)),
            "DOUBLE" => self.try_get::<f64, _>(idx).ok().map(float),
            "DECIMAL" => self.try_get::<Decimal, _>(idx).ok().map(decimal),
            "DATE" => self.try_get::<NaiveDate, _>(idx).ok().map(date),
            "TIME" => self.try_get::<NaiveTime, _>(idx).ok().map(time),
            "DATETIME" | "TIMESTAMP" => self.try_get::<NaiveDateTime, _>(idx).ok().map(datetime),
            "JSON" => self.try_get::<JsonValue, _>(idx).ok(),
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                self.try_get::<Vec<u8>, _>(idx).ok().map(bytes)
            }
            _ => None,
        };
        value.or_else(|| self.try_get::<String, _>(idx).ok().map(Value::String))
    }
}

impl JsonRow for SqliteRow {
    /// `type_name` is the declared column type; values are stored dynamically,
    /// so anything the declaration does not settle is decoded by storage class.
    fn json_value(&self, idx: usize, type_name: &str) -> Option<Value> {
        let storage = self.try_get_raw(idx).ok()?.type_info().name().to_string();
        let declared = match type_name {
            "BOOLEAN" if storage == "INTEGER" => self.try_get::<bool, _>(idx).ok().map(Value::Bool),
            "DATE" => self.try_get::<NaiveDate, _>(idx).ok().map(date),
            "TIME" => self.try_get::<NaiveTime, _>(idx).ok().map(time),
            "DATETIME" => self.try_get::<NaiveDateTime, _>(idx).ok().map(datetime),
            _ => None,
        };
        declared.or_else(|| match storage.as_str() {
            "INTEGER" => self.try_get::<i64, _>(idx).ok().map(Value::from),
            "REAL" => self.try_get::<f64, _>(idx).ok().map(float),
            "TEXT" => self.try_get::<String, _>(idx).ok().map(Value::String),
            "BLOB" => self.try_get::<Vec<u8>, _>(idx).ok().map(bytes),
            _ => None,
        })
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// NUMERIC/DECIMAL as a JSON number; the exact text when it does not fit an f64
fn decimal(v: Decimal) -> Value {
    let text = v.to_string();
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => float(f),
        _ => Value::String(text),
    }
}

fn date(v: NaiveDate) -> Value {
    Value::String(v.format("%Y-%m-%d").to_string())
}

fn time(v: NaiveTime) -> Value {
    Value::String(v.format("%H:%M:%S%.f").to_string())
}

fn datetime(v: NaiveDateTime) -> Value {
    Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn datetime_utc(v: DateTime<Utc>) -> Value {
    Value::String(v.to_rfc3339())
}

fn bytes(v: Vec<u8>) -> Value {
    Value::String(String::from_utf8_lossy(&v).into_owned())
}

/// Database key -> connection target
#[derive(Default, Clone)]
pub struct DatabaseRegistry {
    targets: BTreeMap<String, Arc<dyn QueryTarget>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build lazy pools for every configured database. Must be called inside a tokio runtime.
    pub fn from_config(databases: &BTreeMap<String, DatabaseConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (key, db) in databases {
            let dialect = db
                .dialect
                .as_deref()
                .map(Dialect::from_name)
                .unwrap_or_else(|| Dialect::from_url(&db.url));
            let target = SqlxTarget::connect_lazy(&db.url, dialect)?;
            info!("Registered database '{}' ({})", key, dialect);
            registry.register(key.clone(), Arc::new(target));
        }
        Ok(registry)
    }

    pub fn register(&mut self, key: impl Into<String>, target: Arc<dyn QueryTarget>) {
        self.targets.insert(key.into(), target);
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<dyn QueryTarget>> {
        self.targets
            .get(key)
            .cloned()
            .ok_or_else(|| GateError::UnknownDatabase(key.to_string()))
    }

    pub fn keys(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE orders (id INTEGER, customer TEXT, amount REAL, note TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO orders VALUES (1, 'acme', 12.5, NULL), (2, 'globex', 3.0, 'rush')")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    async fn memory_target() -> SqlxTarget {
        SqlxTarget::new(memory_pool().await, Dialect::Sqlite)
    }

    #[tokio::test]
    async fn test_fetch_all_preserves_column_order() {
        let target = memory_target().await;
        let rows = target
            .fetch_all("SELECT note, id, customer, amount FROM orders ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["note", "id", "customer", "amount"]);
        assert_eq!(rows[0]["id"], Value::from(1));
        assert_eq!(rows[0]["customer"], Value::from("acme"));
        assert_eq!(rows[0]["amount"], Value::from(12.5));
        assert_eq!(rows[0]["note"], Value::Null);
        assert_eq!(rows[1]["note"], Value::from("rush"));
    }

    #[tokio::test]
    async fn test_fetch_all_decodes_declared_types() {
        let pool = memory_pool().await;
        sqlx::query(
            "CREATE TABLE events (day DATE, at DATETIME, active BOOLEAN, score NUMERIC, payload BLOB)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO events VALUES \
             ('2024-03-01', '2024-03-01 08:15:00', 1, 12.75, x'6869'), \
             ('2024-03-02', '2024-03-02 09:00:30', 0, 7, NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        let target = SqlxTarget::new(pool, Dialect::Sqlite);

        let rows = target
            .fetch_all("SELECT day, at, active, score, payload FROM events ORDER BY day")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["day"], Value::from("2024-03-01"));
        assert_eq!(rows[0]["at"], Value::from("2024-03-01T08:15:00"));
        assert_eq!(rows[0]["active"], Value::Bool(true));
        assert_eq!(rows[0]["score"], Value::from(12.75));
        assert_eq!(rows[0]["payload"], Value::from("hi"));
        assert_eq!(rows[1]["active"], Value::Bool(false));
        assert_eq!(rows[1]["score"], Value::from(7));
        assert_eq!(rows[1]["payload"], Value::Null);
    }

    #[tokio::test]
    async fn test_explain_has_no_side_effects() {
        let target = memory_target().await;
        target
            .explain(&Dialect::Sqlite.explain_plan("SELECT * FROM orders"))
            .await
            .unwrap();
        // A mutating statement under EXPLAIN QUERY PLAN is planned, never applied
        target
            .explain(&Dialect::Sqlite.explain_plan("DELETE FROM orders"))
            .await
            .unwrap();
        let rows = target.fetch_all("SELECT COUNT(*) AS n FROM orders").await.unwrap();
        assert_eq!(rows[0]["n"], Value::from(2));
    }

    #[tokio::test]
    async fn test_explain_reports_planner_errors() {
        let target = memory_target().await;
        let err = target
            .explain(&Dialect::Sqlite.explain_plan("SELECT * FROM missing_table"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Database(_)));
    }

    #[test]
    fn test_driver_url_strips_sqlalchemy_suffix() {
        assert_eq!(
            driver_url("postgresql+psycopg2://reader@db/warehouse"),
            (Dialect::Postgres, "postgresql://reader@db/warehouse".to_string())
        );
        assert_eq!(
            driver_url("sqlite://analytics.db?mode=rwc"),
            (Dialect::Sqlite, "sqlite://analytics.db?mode=rwc".to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_lazy_picks_driver_from_scheme() {
        let target = SqlxTarget::connect_lazy("mysql://reader@localhost/shop", Dialect::MySql).unwrap();
        assert!(matches!(target.pool, DriverPool::MySql(_)));

        // Dialect override keeps the driver chosen by the scheme
        let target = SqlxTarget::connect_lazy("sqlite::memory:", Dialect::Unknown).unwrap();
        assert!(matches!(target.pool, DriverPool::Sqlite(_)));
        assert_eq!(target.dialect(), Dialect::Unknown);

        let err = SqlxTarget::connect_lazy("mssql://sa@localhost/db", Dialect::MsSql)
            .err()
            .unwrap();
        assert!(matches!(err, GateError::Config(_)));
    }

    #[tokio::test]
    async fn test_registry_resolve() {
        let mut registry = DatabaseRegistry::new();
        registry.register("analytics", Arc::new(memory_target().await));
        assert!(registry.resolve("analytics").is_ok());
        assert_eq!(registry.keys(), vec!["analytics"]);
        let err = registry.resolve("nope").err().unwrap();
        assert!(matches!(err, GateError::UnknownDatabase(ref key) if key == "nope"));
    }
}
