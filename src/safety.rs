//! Statement Safety Gate
//!
//! Classifies candidate SQL by its leading keyword and decides whether a
//! generated statement may be executed under the session policy. The gate is
//! deliberately lexical, not a parser: unanalyzable input degrades to
//! `Other`/`Unknown`, which is rejected (default-deny).

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Statement kind detected from the leading keyword, or declared by the
/// generator in its response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlKind {
    Select,
    Insert,
    Update,
    Delete,
    Unknown,
    #[serde(other)]
    Other,
}

impl Default for SqlKind {
    fn default() -> Self {
        SqlKind::Unknown
    }
}

impl SqlKind {
    /// True for the data-modification kinds gated by the session policy.
    pub fn is_dml(self) -> bool {
        matches!(self, SqlKind::Insert | SqlKind::Update | SqlKind::Delete)
    }
}

/// Keywords that are never allowed to appear anywhere in a candidate
/// statement, regardless of policy. Matched as keyword-plus-space to reduce
/// false positives on identifiers. Known-incomplete heuristic; the default-
/// deny classification below is the backstop.
pub const DENYLIST: [&str; 5] = ["drop ", "truncate ", "alter ", "shutdown ", "create "];

/// Detect the statement kind from the leading token. Never fails: empty
/// input is `Unknown`, an unrecognized leading keyword is `Other`.
pub fn detect_sql_kind(sql: &str) -> SqlKind {
    let s = sql.trim();
    if s.is_empty() {
        return SqlKind::Unknown;
    }
    let lower = s.to_lowercase();
    if lower.starts_with("select") {
        SqlKind::Select
    } else if lower.starts_with("insert") {
        SqlKind::Insert
    } else if lower.starts_with("update") {
        SqlKind::Update
    } else if lower.starts_with("delete") {
        SqlKind::Delete
    } else {
        SqlKind::Other
    }
}

/// Decide whether a candidate statement may be executed.
///
/// Checks, in order, all of which must pass:
/// 1. non-empty text;
/// 2. no stacked statements: after stripping at most one trailing `;`, the
///    text must contain no further `;` (a `;` inside a string literal is
///    refused too — a false positive, which is the safe side of this gate);
/// 3. no denylisted administrative/destructive keyword;
/// 4. kind check: SELECT is always admitted, INSERT/UPDATE/DELETE only when
///    `allow_dml` is set, anything else is rejected.
///
/// Pure and stateless by design so every clause is independently testable.
pub fn is_query_safe(query: &str, allow_dml: bool) -> bool {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return false;
    }

    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    if body.contains(';') {
        debug!("rejecting stacked statement");
        return false;
    }

    let lower = trimmed.to_lowercase();
    for bad in DENYLIST {
        if lower.contains(bad) {
            debug!(keyword = bad.trim(), "rejecting denylisted keyword");
            return false;
        }
    }

    match detect_sql_kind(trimmed) {
        SqlKind::Select => true,
        kind if kind.is_dml() => allow_dml,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_leading_keyword() {
        assert_eq!(detect_sql_kind("SELECT * FROM users"), SqlKind::Select);
        assert_eq!(detect_sql_kind("  select 1"), SqlKind::Select);
        assert_eq!(detect_sql_kind("Insert into t values (?)"), SqlKind::Insert);
        assert_eq!(detect_sql_kind("UPDATE t SET a = ?"), SqlKind::Update);
        assert_eq!(detect_sql_kind("delete from t"), SqlKind::Delete);
        assert_eq!(detect_sql_kind("SHOW TABLES"), SqlKind::Other);
        assert_eq!(detect_sql_kind("WITH cte AS (SELECT 1) SELECT * FROM cte"), SqlKind::Other);
    }

    #[test]
    fn empty_input_is_unknown() {
        assert_eq!(detect_sql_kind(""), SqlKind::Unknown);
        assert_eq!(detect_sql_kind("   \n\t "), SqlKind::Unknown);
    }

    #[test]
    fn rejects_empty_query() {
        assert!(!is_query_safe("", false));
        assert!(!is_query_safe("   ", true));
    }

    #[test]
    fn rejects_stacked_statements() {
        assert!(!is_query_safe("SELECT 1; SELECT 2", false));
        assert!(!is_query_safe("SELECT 1; DROP TABLE users", true));
        assert!(!is_query_safe("SELECT 1;;", false));
        assert!(!is_query_safe("; SELECT 1", false));
    }

    #[test]
    fn single_trailing_terminator_is_fine() {
        assert!(is_query_safe("SELECT * FROM users;", false));
        assert!(is_query_safe("SELECT * FROM users", false));
    }

    #[test]
    fn rejects_denylisted_keywords_regardless_of_policy() {
        for q in [
            "DROP TABLE users",
            "select * from t where drop x", // contrived, still refused
            "TRUNCATE TABLE logs",
            "ALTER TABLE t ADD COLUMN c INT",
            "SHUTDOWN now",
            "CREATE TABLE t (id INT)",
        ] {
            assert!(!is_query_safe(q, false), "admitted: {q}");
            assert!(!is_query_safe(q, true), "admitted with dml: {q}");
        }
    }

    #[test]
    fn keyword_match_requires_trailing_space() {
        // "dropped" must not trip the "drop " rule
        assert!(is_query_safe("SELECT dropped_at FROM shipments", false));
        assert!(is_query_safe("SELECT * FROM created_items", false));
    }

    #[test]
    fn select_is_admitted_regardless_of_policy() {
        assert!(is_query_safe("SELECT name FROM users WHERE id = ?", false));
        assert!(is_query_safe("SELECT name FROM users WHERE id = ?", true));
    }

    #[test]
    fn dml_follows_policy() {
        for q in [
            "INSERT INTO t (a) VALUES (?)",
            "UPDATE t SET a = ? WHERE id = ?",
            "DELETE FROM t WHERE id = ?",
        ] {
            assert!(!is_query_safe(q, false), "admitted without dml: {q}");
            assert!(is_query_safe(q, true), "refused with dml: {q}");
        }
    }

    #[test]
    fn unrecognized_kinds_are_rejected() {
        assert!(!is_query_safe("SHOW DATABASES", true));
        assert!(!is_query_safe("EXPLAIN SELECT 1", true));
        assert!(!is_query_safe("GRANT ALL ON *.* TO 'x'", true));
    }

    #[test]
    fn kind_deserializes_from_payload_strings() {
        let k: SqlKind = serde_json::from_str("\"SELECT\"").unwrap();
        assert_eq!(k, SqlKind::Select);
        let k: SqlKind = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(k, SqlKind::Delete);
        // anything the generator invents degrades to Other
        let k: SqlKind = serde_json::from_str("\"MERGE\"").unwrap();
        assert_eq!(k, SqlKind::Other);
    }
}
