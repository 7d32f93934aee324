//! SQL dialect detection and plan-only ("explain") statement construction

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine family a target database speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
    MsSql,
    Unknown,
}

impl Dialect {
    /// Map a dialect or driver name (`postgresql`, `mariadb`, `sqlserver`, ...) to its family.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Dialect::Postgres,
            "mysql" | "mariadb" => Dialect::MySql,
            "sqlite" | "sqlite3" => Dialect::Sqlite,
            "mssql" | "sqlserver" => Dialect::MsSql,
            _ => Dialect::Unknown,
        }
    }

    /// Detect the dialect from a connection URL scheme, e.g. `postgres://...`.
    pub fn from_url(url: &str) -> Self {
        let scheme = url.split(':').next().unwrap_or_default();
        // SQLAlchemy-style `postgresql+psycopg2://`
        let scheme = scheme.split('+').next().unwrap_or_default();
        Self::from_name(scheme)
    }

    /// Plan-only form of `sql` for this dialect
    pub fn explain_plan(&self, sql: &str) -> ExplainPlan {
        match self {
            Dialect::Postgres | Dialect::MySql | Dialect::Unknown => {
                ExplainPlan::Prefixed(format!("EXPLAIN {}", sql))
            }
            Dialect::Sqlite => ExplainPlan::Prefixed(format!("EXPLAIN QUERY PLAN {}", sql)),
            Dialect::MsSql => ExplainPlan::Showplan(sql.to_string()),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgresql"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::MsSql => write!(f, "mssql"),
            Dialect::Unknown => write!(f, "unknown"),
        }
    }
}

/// Statement(s) that ask the planner about a query without running it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplainPlan {
    /// A single statement with an explain prefix
    Prefixed(String),
    /// `SET SHOWPLAN_ALL ON;`, the statement, `SET SHOWPLAN_ALL OFF;`
    Showplan(String),
}

impl ExplainPlan {
    /// Statements to run in order inside one transaction
    pub fn statements(&self) -> Vec<String> {
        match self {
            ExplainPlan::Prefixed(sql) => vec![sql.clone()],
            ExplainPlan::Showplan(sql) => vec![
                "SET SHOWPLAN_ALL ON;".to_string(),
                sql.clone(),
                "SET SHOWPLAN_ALL OFF;".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("postgres://u@h/db"), Dialect::Postgres);
        assert_eq!(Dialect::from_url("postgresql+psycopg2://u@h/db"), Dialect::Postgres);
        assert_eq!(Dialect::from_url("mariadb://h/db"), Dialect::MySql);
        assert_eq!(Dialect::from_url("sqlite::memory:"), Dialect::Sqlite);
        assert_eq!(Dialect::from_url("sqlite:///./metrics.db"), Dialect::Sqlite);
        assert_eq!(Dialect::from_url("mssql://h/db"), Dialect::MsSql);
        assert_eq!(Dialect::from_url("duckdb:///x"), Dialect::Unknown);
    }

    #[test]
    fn test_explain_dispatch() {
        let sql = "SELECT 1 LIMIT 5";
        assert_eq!(
            Dialect::Postgres.explain_plan(sql).statements(),
            vec!["EXPLAIN SELECT 1 LIMIT 5"]
        );
        assert_eq!(
            Dialect::MySql.explain_plan(sql).statements(),
            vec!["EXPLAIN SELECT 1 LIMIT 5"]
        );
        assert_eq!(
            Dialect::Sqlite.explain_plan(sql).statements(),
            vec!["EXPLAIN QUERY PLAN SELECT 1 LIMIT 5"]
        );
        assert_eq!(
            Dialect::Unknown.explain_plan(sql).statements(),
            vec!["EXPLAIN SELECT 1 LIMIT 5"]
        );
        assert_eq!(
            Dialect::MsSql.explain_plan(sql).statements(),
            vec!["SET SHOWPLAN_ALL ON;", "SELECT 1 LIMIT 5", "SET SHOWPLAN_ALL OFF;"]
        );
    }
}
