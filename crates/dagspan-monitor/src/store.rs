//! SQLite-backed archive of finished traces.

use crate::spans::Spans;
use crate::trace::{names, timestamp, Span, StatusCode};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Errors from trace store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Lock error")]
    Lock,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Paging for [`TraceStore::list_traces`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// One row of the trace listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    /// Earliest span start, ISO-8601.
    pub start_time: String,
    pub span_count: u64,
    pub task_count: u64,
    pub failed_task_count: u64,
}

pub struct TraceStore {
    conn: Mutex<Connection>,
}

impl TraceStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates an in-memory trace store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                trace_id TEXT PRIMARY KEY,
                start_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spans (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                span_id TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                parent_id TEXT,
                name TEXT NOT NULL,
                status_code TEXT NOT NULL,
                start_us INTEGER NOT NULL,
                end_us INTEGER NOT NULL,
                span_json TEXT NOT NULL,
                UNIQUE (trace_id, span_id),
                FOREIGN KEY (trace_id) REFERENCES traces(trace_id)
            );

            CREATE INDEX IF NOT EXISTS idx_traces_start ON traces(start_time DESC);
            CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
            CREATE INDEX IF NOT EXISTS idx_spans_name ON spans(trace_id, name);
            "#,
        )?;

        Ok(())
    }

    /// Archives a span collection. Spans of several traces may be mixed.
    pub fn insert_spans(&self, spans: &Spans) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let tx = conn.transaction()?;

        for span in spans {
            tx.execute(
                r#"INSERT INTO traces (trace_id, start_time) VALUES (?1, ?2)
                   ON CONFLICT(trace_id) DO UPDATE SET start_time = MIN(start_time, excluded.start_time)"#,
                params![span.trace_id(), timestamp::format(&span.start_time)],
            )?;
            insert_span(&tx, span)?;
        }

        tx.commit()?;
        tracing::debug!(count = spans.len(), "Archived spans");
        Ok(spans.len())
    }

    /// Spans of one trace in insertion order.
    pub fn get_spans(&self, trace_id: &str) -> Result<Spans, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let mut stmt =
            conn.prepare("SELECT span_json FROM spans WHERE trace_id = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![trace_id], |row| row.get::<_, String>(0))?;

        let mut spans = Vec::new();
        for row in rows {
            spans.push(serde_json::from_str::<Span>(&row?)?);
        }

        Ok(Spans::new(spans))
    }

    /// Lists archived traces, most recent first.
    pub fn list_traces(&self, query: &TraceQuery) -> Result<Vec<TraceSummary>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let mut sql = String::from(
            r#"SELECT t.trace_id, t.start_time,
               COUNT(s.seq),
               COALESCE(SUM(s.name = ?1), 0),
               COALESCE(SUM(s.name = ?1 AND s.status_code = ?2), 0)
               FROM traces t LEFT JOIN spans s ON s.trace_id = t.trace_id
               GROUP BY t.trace_id
               ORDER BY t.start_time DESC"#,
        );

        // SQLite requires a LIMIT before OFFSET
        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![names::EXECUTE_TASK, StatusCode::Error.as_str()],
            |row| {
                Ok(TraceSummary {
                    trace_id: row.get(0)?,
                    start_time: row.get(1)?,
                    span_count: row.get(2)?,
                    task_count: row.get(3)?,
                    failed_task_count: row.get(4)?,
                })
            },
        )?;

        let mut traces = Vec::new();
        for row in rows {
            traces.push(row?);
        }

        Ok(traces)
    }

    /// Deletes a trace and all its spans, or nothing if either delete fails.
    pub fn delete_trace(&self, trace_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM spans WHERE trace_id = ?1", params![trace_id])?;
        tx.execute("DELETE FROM traces WHERE trace_id = ?1", params![trace_id])?;

        tx.commit()?;
        Ok(())
    }
}

fn insert_span(conn: &Connection, span: &Span) -> Result<(), StoreError> {
    let range = span.duration_range_us();
    conn.execute(
        r#"INSERT INTO spans
           (span_id, trace_id, parent_id, name, status_code, start_us, end_us, span_json)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        params![
            span.span_id(),
            span.trace_id(),
            span.parent_id,
            span.name,
            span.status.status_code.as_str(),
            range.start,
            range.end,
            serde_json::to_string(span)?,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SpanRecorder;
    use crate::trace::SpanStatus;

    fn sample_trace() -> Spans {
        let recorder = SpanRecorder::new();
        let task = recorder.start_span(names::EXECUTE_TASK, None);
        let ctx = task.context();
        recorder
            .start_span(names::RETRY_WRAPPER, Some(&ctx))
            .end_with_status(SpanStatus::ok());
        task.end_with_status(SpanStatus::ok());
        recorder
            .start_span(names::EXECUTE_TASK, None)
            .end_with_status(SpanStatus::error("Dependency not satisfied"));
        recorder.spans()
    }

    #[test]
    fn test_insert_and_get_preserves_order() {
        let store = TraceStore::in_memory().unwrap();
        let spans = sample_trace();
        let trace_id = spans[0].trace_id().to_string();

        assert_eq!(store.insert_spans(&spans).unwrap(), 3);

        let loaded = store.get_spans(&trace_id).unwrap();
        assert_eq!(loaded.as_slice(), spans.as_slice());
        assert!(store.get_spans("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_list_and_delete() {
        let store = TraceStore::in_memory().unwrap();
        let first = sample_trace();
        let second = sample_trace();
        store.insert_spans(&first).unwrap();
        store.insert_spans(&second).unwrap();

        let traces = store.list_traces(&TraceQuery::default()).unwrap();
        assert_eq!(traces.len(), 2);
        assert!(traces.iter().all(|t| t.span_count == 3));
        assert!(traces.iter().all(|t| t.task_count == 2 && t.failed_task_count == 1));

        let page = store
            .list_traces(&TraceQuery { limit: Some(1), offset: Some(1) })
            .unwrap();
        assert_eq!(page.len(), 1);

        let trace_id = first[0].trace_id().to_string();
        store.delete_trace(&trace_id).unwrap();
        assert!(store.get_spans(&trace_id).unwrap().is_empty());
        assert_eq!(store.list_traces(&TraceQuery::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_span_rolls_back() {
        let store = TraceStore::in_memory().unwrap();
        let spans = sample_trace();
        let mut doubled = spans.clone().into_vec();
        doubled.push(spans[0].clone());

        assert!(store.insert_spans(&Spans::new(doubled)).is_err());
        assert!(store.list_traces(&TraceQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_delete_keeps_spans() {
        let store = TraceStore::in_memory().unwrap();
        let spans = sample_trace();
        let trace_id = spans[0].trace_id().to_string();
        store.insert_spans(&spans).unwrap();

        store
            .conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER keep_traces BEFORE DELETE ON traces
                 BEGIN SELECT RAISE(ABORT, 'traces are read-only'); END;",
            )
            .unwrap();

        assert!(matches!(store.delete_trace(&trace_id), Err(StoreError::Database(_))));
        assert_eq!(store.get_spans(&trace_id).unwrap().len(), 3);
    }

    #[test]
    fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.db");
        let spans = sample_trace();
        let trace_id = spans[0].trace_id().to_string();

        TraceStore::new(&path).unwrap().insert_spans(&spans).unwrap();
        let reopened = TraceStore::new(&path).unwrap();
        assert_eq!(reopened.get_spans(&trace_id).unwrap().len(), 3);
    }
}
