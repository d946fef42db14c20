//! Native SQL query operation.
//!
//! Runs the SQL produced by an earlier step against the configured database and
//! renders the rows as a pipe-separated text table.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row};

use askdb_core::completion::truncate_for_log;
use askdb_core::operation::{
    InvokeError, NativeFunction, NativeOperation, OperationContext, OperationInput, OperationRef,
    ParameterMeta,
};
use askdb_core::output::{strip_marker, DEFAULT_MARKER};

const MAX_SQL_LOG_CHARS: usize = 2_000;
const QUERY_KEYWORDS: [&str; 9] = [
    "select", "with", "show", "explain", "pragma", "values", "describe", "desc", "table",
];

/// Behaviour knobs for [`SqlQuery`]
#[derive(Debug, Clone)]
pub struct SqlQuerySettings {
    /// Rows rendered per result; the rest are summarised in one line.
    pub max_rows: usize,
    /// Allow statements other than queries.
    pub allow_writes: bool,
    /// Marker separating model reasoning from the SQL payload.
    pub marker: String,
}

impl Default for SqlQuerySettings {
    fn default() -> Self {
        Self {
            max_rows: 200,
            allow_writes: false,
            marker: DEFAULT_MARKER.to_string(),
        }
    }
}

/// Executes SQL text against a pooled connection.
pub struct SqlQuery {
    pool: AnyPool,
    settings: SqlQuerySettings,
}

impl SqlQuery {
    pub fn new(pool: AnyPool, settings: SqlQuerySettings) -> Self {
        Self { pool, settings }
    }

    /// Create a lazily-connecting pool for `url` (postgres, mysql or sqlite).
    pub fn connect_lazy(
        url: &str,
        max_connections: u32,
        settings: SqlQuerySettings,
    ) -> Result<Self, sqlx::Error> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)?;
        Ok(Self::new(pool, settings))
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Wrap as the native operation `reference(input)`.
    pub fn into_operation(self, reference: OperationRef) -> NativeOperation {
        NativeOperation::new(
            reference,
            "Execute a SQL query against the database and return the result rows",
            vec![ParameterMeta::required("input", "The SQL query to execute")],
            Arc::new(self),
        )
    }

    /// Clean up `raw`, run it and render the outcome.
    pub async fn run(&self, raw: &str) -> Result<String, InvokeError> {
        let sql = sanitize_sql(raw, &self.settings.marker);
        if sql.is_empty() {
            return Err(InvokeError::native("no SQL statement in input"));
        }
        let is_query = is_query_statement(&sql);
        if !self.settings.allow_writes {
            if !is_query {
                return Err(InvokeError::native(format!(
                    "refusing to run a non-query statement: {}",
                    truncate_for_log(&sql, 120)
                )));
            }
            // Drivers run every statement in the string, not only the first.
            if has_statement_separator(&sql) {
                return Err(InvokeError::native(format!(
                    "multiple statements are not allowed: {}",
                    truncate_for_log(&sql, 120)
                )));
            }
        }

        if is_query {
            let rows = sqlx::query(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| InvokeError::native(format!("query failed: {}", e)))?;
            Ok(render_rows(&rows, self.settings.max_rows))
        } else {
            let result = sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| InvokeError::native(format!("statement failed: {}", e)))?;
            Ok(format!("rows affected: {}", result.rows_affected()))
        }
    }
}

#[async_trait]
impl NativeFunction for SqlQuery {
    async fn call(
        &self,
        input: OperationInput,
        ctx: &OperationContext,
    ) -> Result<String, InvokeError> {
        let raw = input.require("input")?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                execution_id = %ctx.execution_id,
                step_index = ctx.step_index,
                sql = %truncate_for_log(raw, MAX_SQL_LOG_CHARS),
                "running sql"
            );
        }
        let started = Instant::now();
        let result = self.run(raw).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(
                execution_id = %ctx.execution_id,
                step_index = ctx.step_index,
                elapsed_ms,
                "sql executed"
            ),
            Err(err) => tracing::warn!(
                execution_id = %ctx.execution_id,
                step_index = ctx.step_index,
                elapsed_ms,
                error = %err,
                "sql failed"
            ),
        }
        result
    }
}

/// Extract the SQL statement from model output: drop any reasoning before the
/// marker, unwrap a markdown code fence, trim a trailing semicolon.
pub fn sanitize_sql(raw: &str, marker: &str) -> String {
    let stripped = strip_marker(raw, marker);
    let body = extract_fenced(&stripped).unwrap_or(&stripped);
    body.trim().trim_end_matches(';').trim().to_string()
}

fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body = match after.split_once('\n') {
        // Language tag line such as ```sql
        Some((tag, rest)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => rest,
        _ => after,
    };
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

fn is_query_statement(sql: &str) -> bool {
    let first = sql
        .trim_start_matches(|c: char| c == '(' || c.is_whitespace())
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    QUERY_KEYWORDS.contains(&first.as_str())
}

/// True when `sql` contains a `;` outside quotes and comments.
fn has_statement_separator(sql: &str) -> bool {
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ';' => return true,
            '\'' | '"' | '`' => {
                // Doubled quotes inside a literal close and reopen it.
                for inner in chars.by_ref() {
                    if inner == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            _ => {}
        }
    }
    false
}

fn render_rows(rows: &[AnyRow], max_rows: usize) -> String {
    let Some(first) = rows.first() else {
        return "(no rows)".to_string();
    };
    let header: Vec<&str> = first.columns().iter().map(|c| c.name()).collect();
    let mut out = header.join(" | ");
    for row in rows.iter().take(max_rows) {
        let cells: Vec<String> = (0..row.columns().len())
            .map(|index| render_cell(row, index))
            .collect();
        out.push('\n');
        out.push_str(&cells.join(" | "));
    }
    if rows.len() > max_rows {
        let _ = write!(out, "\n... ({} more rows)", rows.len() - max_rows);
    }
    out
}

fn render_cell(row: &AnyRow, index: usize) -> String {
    fn null(value: Option<String>) -> String {
        value.unwrap_or_else(|| "NULL".to_string())
    }

    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return null(value);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return null(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return null(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return null(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return null(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return null(value.map(|v| format!("<{} bytes>", v.len())));
    }
    "<unsupported>".to_string()
}
