//! NL-to-SQL Agent
//!
//! Turns a natural-language request plus a schema summary into a
//! parameterized SQL candidate by prompting the generator, retrying on
//! transient overload, and decoding the single JSON payload out of the raw
//! response. The payload is untrusted; the safety gate downstream has the
//! final word on execution.

use crate::error::{PilotError, Result};
use crate::extract::extract_json_object;
use crate::llm::{CompletionBackend, RetryPolicy};
use crate::safety::SqlKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// The structured payload the generator is asked to produce.
///
/// `query: None` means no executable statement could be produced (ambiguous
/// request, or a policy refusal); it is terminal and is never gated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub query: Option<String>,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    #[serde(default)]
    pub explain: String,
    #[serde(rename = "type", default)]
    pub kind: SqlKind,
}

const PROMPT_TEMPLATE: &str = r#"You are an expert SQL generator. Given the DB schema and a user request, produce a parameterized MySQL statement using `?` placeholders and a JSON response (ONLY JSON) with keys: query, params, explain, type.
Schema:
{schema}

User request:
{request}

Rules:
1) Use parameter placeholders `?` (the MySQL parameter style).
2) Return EXACTLY one JSON object. Do not include any commentary outside the JSON.
3) For SELECT queries, return type = "SELECT". For insert/update/delete return "INSERT"/"UPDATE"/"DELETE".
4) If the request is ambiguous, choose a safe behavior: return an "explain" that requests clarification and a query of null.
5) Do NOT interpolate user input into the SQL; instead, put values into "params".
6) If the user asks to modify data (INSERT/UPDATE/DELETE) and data modification is not allowed, return a JSON with query:null and explain stating DML is not allowed.

Produce the JSON now.
"#;

/// Orchestrates one generation: prompt, retry, extract, decode.
pub struct SqlAgent {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryPolicy,
}

impl SqlAgent {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_prompt(user_request: &str, schema: &str) -> String {
        PROMPT_TEMPLATE
            .replace("{schema}", schema)
            .replace("{request}", user_request)
    }

    /// Generate a SQL candidate for `user_request`.
    ///
    /// If the declared kind is a write kind while `allow_dml` is false, the
    /// candidate is replaced with a `query: null` refusal before anyone can
    /// act on it; the safety gate is never consulted for it.
    pub async fn nl_to_sql(
        &self,
        user_request: &str,
        schema: &str,
        allow_dml: bool,
    ) -> Result<GeneratedSql> {
        let prompt = Self::build_prompt(user_request, schema);

        let raw = self
            .retry
            .call_with_retry(|| self.backend.complete(&prompt))
            .await?;
        debug!(len = raw.len(), "raw generator response");

        let span = extract_json_object(&raw).ok_or_else(|| {
            PilotError::MalformedResponse(format!(
                "could not find a JSON object in model response: {}",
                raw
            ))
        })?;

        let generated: GeneratedSql = serde_json::from_str(span).map_err(|e| {
            PilotError::MalformedResponse(format!("invalid payload: {}. Span: {}", e, span))
        })?;

        if generated.kind.is_dml() && !allow_dml {
            info!(kind = ?generated.kind, "DML candidate refused by session policy");
            return Ok(GeneratedSql {
                query: None,
                params: Vec::new(),
                explain: "DML detected but disallowed by session settings.".to_string(),
                kind: generated.kind,
            });
        }

        Ok(generated)
    }
}
