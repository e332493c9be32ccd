//! The query engine seam.
//!
//! The protocol engine does not run queries itself. It hands query text and
//! parameters to a [`QueryExecutor`] shared by every connection, and streams
//! back whatever [`QueryResult`] comes out.
//!
//! Executors may offer more than plain execution. Rather than probing for
//! extra traits on every call, a session asks once for the executor's
//! [`Capabilities`] when it starts and only calls the optional methods that
//! were advertised.
use thiserror::Error;

use crate::packstream::{Map, Value};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("{0}")]
    Query(String),
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("flush failed: {0}")]
    Flush(String),
    #[error("executor does not support {0}")]
    Unsupported(&'static str),
}

/// Column names plus rows, each row holding one value per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }
}

/// Optional behaviour an executor supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// BEGIN, COMMIT and ROLLBACK are forwarded to the executor.
    pub transactions: bool,
    /// Writes can be held back and persisted in one go by `flush`.
    pub deferred_flush: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        transactions: false,
        deferred_flush: false,
    };
}

/// Runs queries for every connection at once, so it must be safe to share
/// between threads. Stateful operations such as transactions are the
/// executor's to serialize; the protocol engine only guarantees that one
/// connection never issues two calls at the same time.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query: &str, params: &Map) -> Result<QueryResult, ExecutorError>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn begin_transaction(&self, _metadata: &Map) -> Result<(), ExecutorError> {
        Err(ExecutorError::Unsupported("transactions"))
    }

    fn commit_transaction(&self) -> Result<(), ExecutorError> {
        Err(ExecutorError::Unsupported("transactions"))
    }

    fn rollback_transaction(&self) -> Result<(), ExecutorError> {
        Err(ExecutorError::Unsupported("transactions"))
    }

    /// Persists writes held back while deferred flushing is on.
    fn flush(&self) -> Result<(), ExecutorError> {
        Err(ExecutorError::Unsupported("deferred flush"))
    }

    fn set_deferred_flush(&self, _enabled: bool) {}
}

/// Answers every query with a single row: the query parameters, one column
/// per parameter, or the query text itself when there are none. Enough to
/// check that a driver can talk to the server.
#[derive(Debug, Default)]
pub struct EchoExecutor;

impl QueryExecutor for EchoExecutor {
    fn execute(&self, query: &str, params: &Map) -> Result<QueryResult, ExecutorError> {
        if params.is_empty() {
            return Ok(QueryResult::new(
                vec!["query".into()],
                vec![vec![Value::from(query)]],
            ));
        }

        let (columns, row): (Vec<String>, Vec<Value>) =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).unzip();
        Ok(QueryResult::new(columns, vec![row]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map;

    #[test]
    fn echo_returns_query_text() {
        let result = EchoExecutor.execute("RETURN 1", &Map::new()).unwrap();
        assert_eq!(result.columns, vec!["query".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::from("RETURN 1")]]);
    }

    #[test]
    fn echo_returns_parameters() {
        let result = EchoExecutor
            .execute("RETURN $a, $b", &map! { "b" => 2, "a" => "x" })
            .unwrap();
        assert_eq!(result.columns, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::from("x"), Value::from(2)]]);
    }

    #[test]
    fn optional_capabilities_default_off() {
        assert_eq!(EchoExecutor.capabilities(), Capabilities::NONE);
        assert_eq!(
            EchoExecutor.begin_transaction(&Map::new()),
            Err(ExecutorError::Unsupported("transactions"))
        );
        assert!(EchoExecutor.flush().is_err());
    }
}
