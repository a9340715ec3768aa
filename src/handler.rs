use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use auto_impl::auto_impl;

use crate::error::{Error, Result};
use crate::protocol::response::TerminatorStatus;
use crate::row::{ResultRowMeta, Row};

/// Receives the events of a command response, in wire order.
///
/// For each result set: one `on_row_meta`, any number of `on_row`, then exactly one terminal
/// call, either `on_result_complete` or `on_error`. A response without rows produces only the
/// terminal call. An error returned from a callback aborts decoding.
#[auto_impl(&mut, Box)]
pub trait ResultSetHandler {
    fn on_row_meta(&mut self, meta: &Arc<ResultRowMeta>) -> Result<()>;

    fn on_row(&mut self, row: Row) -> Result<()>;

    /// `has_more` is set when another result set follows in the same response.
    fn on_result_complete(&mut self, status: &TerminatorStatus, has_more: bool) -> Result<()>;

    fn on_error(&mut self, error: &Error);
}

/// Shared flag that stops rows from being emitted.
///
/// Cloning yields a handle to the same flag, so another task can cancel a running decode.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One result set gathered by [`CollectHandler`]
#[derive(Debug, Default)]
pub struct CollectedResult {
    pub meta: Option<Arc<ResultRowMeta>>,
    pub rows: Vec<Row>,
    pub status: Option<TerminatorStatus>,
    pub error: Option<String>,
}

/// A handler that keeps every row of every result set in memory
#[derive(Debug, Default)]
pub struct CollectHandler {
    results: Vec<CollectedResult>,
    current: CollectedResult,
}

impl CollectHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> &[CollectedResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<CollectedResult> {
        self.results
    }

    /// Rows of every result set, in order
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.results.iter().flat_map(|r| r.rows.iter())
    }

    fn close_current(&mut self) {
        let done = std::mem::take(&mut self.current);
        self.results.push(done);
    }
}

impl ResultSetHandler for CollectHandler {
    fn on_row_meta(&mut self, meta: &Arc<ResultRowMeta>) -> Result<()> {
        self.current.meta = Some(Arc::clone(meta));
        Ok(())
    }

    fn on_row(&mut self, row: Row) -> Result<()> {
        self.current.rows.push(row);
        Ok(())
    }

    fn on_result_complete(&mut self, status: &TerminatorStatus, _has_more: bool) -> Result<()> {
        self.current.status = Some(status.clone());
        self.close_current();
        Ok(())
    }

    fn on_error(&mut self, error: &Error) {
        self.current.error = Some(error.to_string());
        self.close_current();
    }
}

/// A handler that ignores all result set data but captures affected_rows and last_insert_id
#[derive(Debug, Default)]
pub struct DropHandler {
    affected_rows: u64,
    last_insert_id: u64,
    rows: u64,
    error: Option<String>,
}

impl DropHandler {
    /// Get the number of affected rows from the last operation
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Get the last insert ID from the last operation
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Rows seen and dropped
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl ResultSetHandler for DropHandler {
    fn on_row_meta(&mut self, _: &Arc<ResultRowMeta>) -> Result<()> {
        Ok(())
    }

    fn on_row(&mut self, _: Row) -> Result<()> {
        self.rows += 1;
        Ok(())
    }

    fn on_result_complete(&mut self, status: &TerminatorStatus, _: bool) -> Result<()> {
        self.affected_rows = status.affected_rows;
        self.last_insert_id = status.last_insert_id;
        Ok(())
    }

    fn on_error(&mut self, error: &Error) {
        self.error = Some(error.to_string());
    }
}
