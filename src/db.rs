//! Session Database
//!
//! MySQL access for one chat session over sqlx. The connection is modeled
//! as an explicit state machine (unconfigured, connected without a
//! database, connected with a database, closed) with explicit transitions,
//! so "is this connection stale" has a single answer. Selecting a database
//! always tears the old connection down and builds a fresh one.
//!
//! Statement execution is strictly parameter-bound: values arrive as a
//! JSON array from the generator payload and travel to the server through
//! bind parameters, never through string interpolation.

use crate::error::{PilotError, Result};
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row};
use tracing::{debug, info};

/// Server login, without a database name. The database is chosen later,
/// per session.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unconfigured,
    Connected,
    ConnectedWithDb,
    Closed,
}

/// Session-scoped MySQL connection. One statement at a time; not shared
/// across sessions.
pub struct SessionDb {
    settings: DbSettings,
    database: Option<String>,
    conn: Option<MySqlConnection>,
    state: ConnState,
}

impl SessionDb {
    pub fn new(settings: DbSettings) -> Self {
        Self {
            settings,
            database: None,
            conn: None,
            state: ConnState::Unconfigured,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Establish the connection. Without a selected database this connects
    /// to the server only (enough for `list_databases`).
    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let mut opts = MySqlConnectOptions::new()
            .host(&self.settings.host)
            .port(self.settings.port)
            .username(&self.settings.user)
            .password(&self.settings.password);
        if let Some(db) = &self.database {
            opts = opts.database(db);
        }

        let conn = MySqlConnection::connect_with(&opts).await?;
        info!(
            host = %self.settings.host,
            database = self.database.as_deref().unwrap_or("<none>"),
            "connected to MySQL"
        );
        self.conn = Some(conn);
        self.state = if self.database.is_some() {
            ConnState::ConnectedWithDb
        } else {
            ConnState::Connected
        };
        Ok(())
    }

    /// Select the active database by closing the current connection and
    /// opening a fresh one bound to `name`. Never mutates a live
    /// connection in place.
    pub async fn use_database(&mut self, name: &str) -> Result<()> {
        self.close().await?;
        self.database = Some(name.to_string());
        self.connect().await
    }

    pub async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            debug!("connection closed");
        }
        self.state = ConnState::Closed;
        Ok(())
    }

    async fn conn(&mut self) -> Result<&mut MySqlConnection> {
        self.connect().await?;
        self.conn
            .as_mut()
            .ok_or_else(|| PilotError::Connection("connection unavailable".to_string()))
    }

    /// List database names on the server.
    pub async fn list_databases(&mut self) -> Result<Vec<String>> {
        let conn = self.conn().await?;
        let rows = sqlx::query("SHOW DATABASES").fetch_all(&mut *conn).await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            names.push(row.try_get::<String, _>(0)?);
        }
        Ok(names)
    }

    /// Compact `table(col type, ...)` summary of the selected database,
    /// fed to the generator as schema context.
    pub async fn schema_summary(&mut self) -> Result<String> {
        let Some(database) = self.database.clone() else {
            return Ok("No database selected.".to_string());
        };

        let conn = self.conn().await?;
        let rows = sqlx::query(
            "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
        )
        .bind(&database)
        .fetch_all(&mut *conn)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push((
                row.try_get::<String, _>(0)?,
                row.try_get::<String, _>(1)?,
                row.try_get::<String, _>(2)?,
            ));
        }
        Ok(summarize_schema(&columns))
    }

    /// Execute a vetted SELECT with bound parameters. Returns all fetched
    /// rows plus column names; display truncation is the caller's concern.
    pub async fn execute_select(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Vec<Vec<Value>>, Vec<String>)> {
        let conn = self.conn().await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&mut *conn).await?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let values = rows.iter().map(row_to_values).collect();
        Ok((values, columns))
    }

    /// Execute a vetted DML statement inside a transaction. Commits on
    /// success; a failed write is rolled back and the connection stays
    /// usable for the next request.
    pub async fn execute_dml(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.conn().await?;
        let mut tx = conn.begin().await?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        match query.execute(&mut *tx).await {
            Ok(result) => {
                let affected = result.rows_affected();
                tx.commit().await?;
                Ok(affected)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e.into())
            }
        }
    }
}

/// Bind one opaque JSON parameter value with the closest MySQL type.
fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        // arrays/objects have no scalar binding; send their JSON text
        other => query.bind(other.to_string()),
    }
}

/// Decode a row into display values, trying the common scalar types in
/// order and degrading to text.
fn row_to_values(row: &MySqlRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|idx| decode_column(row, idx))
        .collect()
}

fn decode_column(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v.map(|d| Value::from(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(|d| Value::from(d.to_rfc3339())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v.map(|d| Value::from(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return v.map(|d| Value::from(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v
            .map(|b| Value::from(String::from_utf8_lossy(&b).into_owned()))
            .unwrap_or(Value::Null);
    }
    Value::Null
}

/// Group `(table, column, type)` triples, already sorted by table, into one
/// line per table.
fn summarize_schema(columns: &[(String, String, String)]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current_table: Option<&str> = None;
    let mut current_cols: Vec<String> = Vec::new();

    for (table, column, ctype) in columns {
        if current_table != Some(table.as_str()) {
            if let Some(t) = current_table {
                parts.push(format!("{}({})", t, current_cols.join(", ")));
            }
            current_table = Some(table.as_str());
            current_cols.clear();
        }
        current_cols.push(format!("{} {}", column, ctype));
    }
    if let Some(t) = current_table {
        parts.push(format!("{}({})", t, current_cols.join(", ")));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DbSettings {
        DbSettings {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
        }
    }

    #[test]
    fn starts_unconfigured() {
        let db = SessionDb::new(settings());
        assert_eq!(db.state(), ConnState::Unconfigured);
        assert_eq!(db.database(), None);
    }

    #[tokio::test]
    async fn close_without_connection_is_terminal() {
        let mut db = SessionDb::new(settings());
        db.close().await.unwrap();
        assert_eq!(db.state(), ConnState::Closed);
    }

    #[test]
    fn summarizes_schema_per_table() {
        let columns = vec![
            ("orders".to_string(), "id".to_string(), "int".to_string()),
            ("orders".to_string(), "total".to_string(), "decimal(10,2)".to_string()),
            ("users".to_string(), "id".to_string(), "int".to_string()),
            ("users".to_string(), "name".to_string(), "varchar(255)".to_string()),
        ];
        assert_eq!(
            summarize_schema(&columns),
            "orders(id int, total decimal(10,2))\nusers(id int, name varchar(255))"
        );
    }

    #[test]
    fn summarizes_empty_schema_to_empty_string() {
        assert_eq!(summarize_schema(&[]), "");
    }
}
