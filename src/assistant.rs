//! Dispatch Broker
//!
//! Orchestrates one user request end to end: fetch schema context, ask the
//! agent for a candidate, gate it, and route it to the read or write
//! executor path. Every failure mode is converted into a categorized,
//! user-visible `Outcome` at this boundary; nothing propagates far enough
//! to kill the session.

use crate::agent::SqlAgent;
use crate::db::SessionDb;
use crate::error::Result;
use crate::safety::{is_query_safe, SqlKind};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

/// Read-path results are previewed to this many rows; the fetch itself is
/// never truncated.
pub const PREVIEW_ROWS: usize = 10;

/// Executor seam. `SessionDb` is the real implementation; tests plug in
/// spies to prove refused statements never reach the database.
#[async_trait]
pub trait StatementExecutor: Send {
    async fn fetch_schema_summary(&mut self) -> Result<String>;
    async fn run_select(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Vec<Vec<Value>>, Vec<String>)>;
    async fn run_dml(&mut self, sql: &str, params: &[Value]) -> Result<u64>;
}

#[async_trait]
impl StatementExecutor for SessionDb {
    async fn fetch_schema_summary(&mut self) -> Result<String> {
        self.schema_summary().await
    }

    async fn run_select(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Vec<Vec<Value>>, Vec<String>)> {
        self.execute_select(sql, params).await
    }

    async fn run_dml(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.execute_dml(sql, params).await
    }
}

/// Every user-visible category of result. Policy and safety rejections are
/// well-formed outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The database could not be reached or described.
    ConnectionFailed { message: String },
    /// Generation failed: transport, overload exhaustion, or a malformed
    /// payload.
    GenerationFailed { message: String },
    /// The generator produced no executable statement (ambiguity, or its
    /// own refusal).
    NoStatement { explain: String },
    /// A write was requested while the session policy forbids writes. The
    /// executor is never consulted.
    DisallowedWrite { kind: SqlKind, explain: String },
    /// The safety gate refused the candidate. The executor is never
    /// consulted.
    Refused { query: String },
    /// The executor raised; the session remains usable.
    ExecutionFailed { query: String, message: String },
    /// Read path success.
    Rows {
        query: String,
        params: Vec<Value>,
        explain: String,
        columns: Vec<String>,
        preview: Vec<Vec<Value>>,
        total_rows: usize,
    },
    /// Write path success.
    Affected {
        query: String,
        params: Vec<Value>,
        explain: String,
        affected: u64,
    },
}

/// One session's pipeline: agent + executor + the immutable write policy.
pub struct SqlAssistant<E: StatementExecutor> {
    agent: SqlAgent,
    executor: E,
    allow_dml: bool,
    session_id: Uuid,
}

impl<E: StatementExecutor> SqlAssistant<E> {
    /// `allow_dml` is fixed for the assistant's lifetime. A new database
    /// target means a new assistant, never a mutated policy.
    pub fn new(agent: SqlAgent, executor: E, allow_dml: bool) -> Self {
        let session_id = Uuid::new_v4();
        info!(%session_id, allow_dml, "session started");
        Self {
            agent,
            executor,
            allow_dml,
            session_id,
        }
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Run the full pipeline for one user message: generate, extract,
    /// gate, dispatch.
    pub async fn handle_request(&mut self, user_text: &str) -> Outcome {
        let schema = match self.executor.fetch_schema_summary().await {
            Ok(schema) => schema,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "schema fetch failed");
                return Outcome::ConnectionFailed {
                    message: e.to_string(),
                };
            }
        };

        let generated = match self.agent.nl_to_sql(user_text, &schema, self.allow_dml).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "generation failed");
                return Outcome::GenerationFailed {
                    message: e.to_string(),
                };
            }
        };

        let Some(query) = generated.query else {
            if generated.kind.is_dml() && !self.allow_dml {
                return Outcome::DisallowedWrite {
                    kind: generated.kind,
                    explain: generated.explain,
                };
            }
            return Outcome::NoStatement {
                explain: generated.explain,
            };
        };

        if !is_query_safe(&query, self.allow_dml) {
            warn!(session_id = %self.session_id, %query, "unsafe statement refused");
            return Outcome::Refused { query };
        }

        if generated.kind == SqlKind::Select {
            match self.executor.run_select(&query, &generated.params).await {
                Ok((rows, columns)) => {
                    let total_rows = rows.len();
                    info!(session_id = %self.session_id, total_rows, "select executed");
                    Outcome::Rows {
                        query,
                        params: generated.params,
                        explain: generated.explain,
                        columns,
                        preview: rows.into_iter().take(PREVIEW_ROWS).collect(),
                        total_rows,
                    }
                }
                Err(e) => Outcome::ExecutionFailed {
                    query,
                    message: e.to_string(),
                },
            }
        } else {
            match self.executor.run_dml(&query, &generated.params).await {
                Ok(affected) => {
                    info!(session_id = %self.session_id, affected, "dml executed");
                    Outcome::Affected {
                        query,
                        params: generated.params,
                        explain: generated.explain,
                        affected,
                    }
                }
                Err(e) => Outcome::ExecutionFailed {
                    query,
                    message: e.to_string(),
                },
            }
        }
    }
}

impl Outcome {
    /// Render for the chat surface.
    pub fn render_markdown(&self) -> String {
        match self {
            Outcome::ConnectionFailed { message } => {
                format!("Cannot reach the database: {}", message)
            }
            Outcome::GenerationFailed { message } => {
                format!("Error generating SQL: {}", message)
            }
            Outcome::NoStatement { explain } => {
                if explain.is_empty() {
                    "No SQL was generated. Try rewriting your question.".to_string()
                } else {
                    format!("No SQL was generated: {}", explain)
                }
            }
            Outcome::DisallowedWrite { kind, .. } => format!(
                "{:?} statements are not allowed in this session (data modification is disabled).",
                kind
            ),
            Outcome::Refused { .. } => "Unsafe SQL detected. Refusing to execute.".to_string(),
            Outcome::ExecutionFailed { message, .. } => format!("Execution error: {}", message),
            Outcome::Rows {
                query,
                params,
                explain,
                columns,
                preview,
                total_rows,
            } => {
                let table = format_table_md(columns, preview);
                let note = if *total_rows > preview.len() {
                    format!("\n_Showing first {} of {} rows._", preview.len(), total_rows)
                } else {
                    String::new()
                };
                format!(
                    "```sql\n{}\n```\n**Params:** {}\n\n**Explanation:** {}\n\n{}{}",
                    query,
                    Value::from(params.clone()),
                    explain,
                    table,
                    note
                )
            }
            Outcome::Affected {
                query,
                params,
                affected,
                ..
            } => format!(
                "```sql\n{}\n```\n**Params:** {}\n\n**Affected rows:** {}",
                query,
                Value::from(params.clone()),
                affected
            ),
        }
    }
}

/// Markdown table for a row preview.
pub fn format_table_md(columns: &[String], rows: &[Vec<Value>]) -> String {
    if columns.is_empty() {
        return "No results.".to_string();
    }

    let header = format!("| {} |", columns.join(" | "));
    let sep = format!("| {} |", vec!["---"; columns.len()].join(" | "));
    let body = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(value_to_cell).collect();
            format!("| {} |", cells.join(" | "))
        })
        .collect::<Vec<_>>()
        .join("\n");

    if body.is_empty() {
        format!("{}\n{}", header, sep)
    } else {
        format!("{}\n{}\n{}", header, sep, body)
    }
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_table_with_rows() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            vec![json!(1), json!("amira")],
            vec![json!(2), Value::Null],
        ];
        assert_eq!(
            format_table_md(&columns, &rows),
            "| id | name |\n| --- | --- |\n| 1 | amira |\n| 2 | NULL |"
        );
    }

    #[test]
    fn empty_columns_mean_no_results() {
        assert_eq!(format_table_md(&[], &[]), "No results.");
    }

    #[test]
    fn header_only_when_no_rows() {
        let columns = vec!["id".to_string()];
        assert_eq!(format_table_md(&columns, &[]), "| id |\n| --- |");
    }

    #[test]
    fn refused_renders_without_leaking_internals() {
        let outcome = Outcome::Refused {
            query: "DROP TABLE users".to_string(),
        };
        assert_eq!(
            outcome.render_markdown(),
            "Unsafe SQL detected. Refusing to execute."
        );
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = Outcome::NoStatement {
            explain: "ambiguous".to_string(),
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "no_statement");
        assert_eq!(v["explain"], "ambiguous");
    }
}
