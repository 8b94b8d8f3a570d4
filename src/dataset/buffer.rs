//! Batched, bounded-retry persistence of dataset rows.
//!
//! [`DatasetBuffer`] collects rows in memory and writes them to a
//! [`DurableStore`] in batches. A flush swaps the buffer out under the lock, so
//! producers keep appending to a fresh buffer while the batch is in flight and
//! no row can be part of two writes. Rows from a failed batch go back to the
//! front of the buffer until they have used up their retries; after that they
//! are dropped with a warning.

use super::row::DatasetRow;
use crate::telemetry::DurableStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What a flush did with the rows it took
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub written: usize,
    pub requeued: usize,
    pub discarded: usize,
}

#[derive(Default)]
struct BufferState {
    rows: Vec<DatasetRow>,
    /// Retries already spent, keyed by interaction id
    retries: HashMap<String, u32>,
    closed: bool,
}

pub struct DatasetBuffer {
    store: Arc<dyn DurableStore>,
    table: String,
    buffer_size: usize,
    max_retries: u32,
    state: Mutex<BufferState>,
    /// Held for the whole of a write so batches never overlap
    writing: Mutex<()>,
    closed: AtomicBool,
}

impl DatasetBuffer {
    /// Create a buffer writing to `table`
    ///
    /// # Arguments
    ///
    /// * `buffer_size` - Rows held before `add` triggers a flush
    /// * `max_retries` - Retries a row gets after its first failed write
    pub fn new(
        store: Arc<dyn DurableStore>,
        table: impl Into<String>,
        buffer_size: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            buffer_size: buffer_size.max(1),
            max_retries,
            state: Mutex::new(BufferState::default()),
            writing: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Append a row, flushing when the buffer reaches its size threshold
    ///
    /// Returns the flush outcome when a flush was triggered. Rows added after
    /// `close` are discarded.
    pub async fn add(&self, row: DatasetRow) -> Option<FlushOutcome> {
        let should_flush = {
            let mut state = self.state.lock().await;
            if state.closed {
                warn!(interaction_id = %row.interaction_id, "Dataset buffer closed, discarding row");
                return None;
            }
            state.rows.push(row);
            state.rows.len() >= self.buffer_size
        };

        if should_flush {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Write everything currently buffered as one batch
    pub async fn flush(&self) -> FlushOutcome {
        let _writing = self.writing.lock().await;
        self.write_batch().await
    }

    async fn write_batch(&self) -> FlushOutcome {
        let batch = std::mem::take(&mut self.state.lock().await.rows);
        if batch.is_empty() {
            return FlushOutcome::default();
        }

        let mut outcome = FlushOutcome::default();
        let mut rows = Vec::with_capacity(batch.len());
        let mut payload: Vec<Value> = Vec::with_capacity(batch.len());

        for row in batch {
            match serde_json::to_value(&row) {
                Ok(value) => {
                    payload.push(value);
                    rows.push(row);
                }
                Err(e) => {
                    warn!(interaction_id = %row.interaction_id, "Dropping unserializable dataset row: {}", e);
                    outcome.discarded += 1;
                }
            }
        }

        if rows.is_empty() {
            return outcome;
        }

        match self.store.write(&self.table, &payload).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                for row in &rows {
                    state.retries.remove(&row.interaction_id);
                }
                outcome.written = rows.len();
                debug!(rows = outcome.written, table = %self.table, "Wrote dataset batch");
            }
            Err(e) => {
                warn!(rows = rows.len(), table = %self.table, "Failed to write dataset batch: {}", e);

                let mut state = self.state.lock().await;
                let mut requeue = Vec::with_capacity(rows.len());
                for row in rows {
                    let spent = state.retries.get(&row.interaction_id).copied().unwrap_or(0);
                    if spent >= self.max_retries {
                        state.retries.remove(&row.interaction_id);
                        warn!(
                            interaction_id = %row.interaction_id,
                            attempts = spent + 1,
                            "Discarding dataset row after exhausting retries"
                        );
                        outcome.discarded += 1;
                    } else {
                        state.retries.insert(row.interaction_id.clone(), spent + 1);
                        requeue.push(row);
                    }
                }

                outcome.requeued = requeue.len();
                // Retried rows go ahead of rows added while the write was in flight
                let newer = std::mem::replace(&mut state.rows, requeue);
                state.rows.extend(newer);
            }
        }

        outcome
    }

    /// Flush and stop accepting rows
    ///
    /// Rows that keep failing get their remaining retries immediately; anything
    /// still buffered afterwards is discarded. Calls after the first return an
    /// empty outcome.
    pub async fn close(&self) -> FlushOutcome {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return FlushOutcome::default();
            }
            state.closed = true;
            self.closed.store(true, Ordering::SeqCst);
        }

        // No other write can start or requeue rows until the buffer is emptied
        let _writing = self.writing.lock().await;
        let mut total = FlushOutcome::default();
        for _ in 0..=self.max_retries {
            let outcome = self.write_batch().await;
            total.written += outcome.written;
            total.discarded += outcome.discarded;
            if outcome.requeued == 0 {
                break;
            }
        }

        let mut state = self.state.lock().await;
        if !state.rows.is_empty() {
            warn!(rows = state.rows.len(), "Discarding dataset rows left at close");
            total.discarded += state.rows.len();
            state.rows.clear();
        }
        state.retries.clear();

        total
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.rows.is_empty()
    }

    pub async fn contains(&self, interaction_id: &str) -> bool {
        self.state
            .lock()
            .await
            .rows
            .iter()
            .any(|row| row.interaction_id == interaction_id)
    }

    /// Retries already spent on a buffered row
    pub async fn retry_count(&self, interaction_id: &str) -> u32 {
        self.state.lock().await.retries.get(interaction_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;
    use chrono::Utc;
    use std::collections::HashSet;

    fn row(id: &str) -> DatasetRow {
        DatasetRow {
            interaction_id: id.to_string(),
            agent_name: "agent".to_string(),
            timestamp: Utc::now(),
            instruction: format!("question {}", id),
            reference: format!("answer {}", id),
            context: None,
            reviewed: false,
            metadata: None,
            trajectory: None,
        }
    }

    fn buffer(sink: &Arc<RecordingSink>, size: usize, retries: u32) -> DatasetBuffer {
        DatasetBuffer::new(sink.clone(), "proj.agent_evaluation.agent_eval_dataset", size, retries)
    }

    #[tokio::test]
    async fn test_no_write_below_threshold() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer(&sink, 3, 3);

        assert!(buffer.add(row("a")).await.is_none());
        assert!(buffer.add(row("b")).await.is_none());
        assert_eq!(sink.write_attempts(), 0);
        assert_eq!(buffer.len().await, 2);

        let outcome = buffer.add(row("c")).await.unwrap();
        assert_eq!(outcome.written, 3);
        assert_eq!(sink.write_attempts(), 1);
        assert_eq!(sink.dataset_rows().len(), 3);
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_explicit_flush() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer(&sink, 10, 3);

        buffer.add(row("a")).await;
        let outcome = buffer.flush().await;

        assert_eq!(outcome.written, 1);
        assert_eq!(sink.dataset_rows()[0]["interaction_id"], "a");
        assert_eq!(sink.dataset_rows()[0]["reviewed"], false);
    }

    #[tokio::test]
    async fn test_empty_flush_skips_write() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer(&sink, 10, 3);

        assert_eq!(buffer.flush().await, FlushOutcome::default());
        assert_eq!(sink.write_attempts(), 0);
    }

    #[tokio::test]
    async fn test_row_discarded_after_retry_limit() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_all_writes();
        let buffer = buffer(&sink, 10, 2);

        buffer.add(row("a")).await;

        let first = buffer.flush().await;
        assert_eq!(first.requeued, 1);
        assert!(buffer.contains("a").await);
        assert_eq!(buffer.retry_count("a").await, 1);

        let second = buffer.flush().await;
        assert_eq!(second.requeued, 1);
        assert!(buffer.contains("a").await);

        let third = buffer.flush().await;
        assert_eq!(third.discarded, 1);
        assert!(!buffer.contains("a").await);
        assert_eq!(buffer.retry_count("a").await, 0);

        // Nothing left to retry
        assert_eq!(buffer.flush().await, FlushOutcome::default());
        assert_eq!(sink.write_attempts(), 3);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_next_writes(1);
        let buffer = buffer(&sink, 10, 3);

        buffer.add(row("a")).await;
        assert_eq!(buffer.flush().await.requeued, 1);

        buffer.add(row("b")).await;
        let outcome = buffer.flush().await;
        assert_eq!(outcome.written, 2);
        assert_eq!(buffer.retry_count("a").await, 0);

        let ids: Vec<Value> = sink.dataset_rows().iter().map(|r| r["interaction_id"].clone()).collect();
        assert_eq!(ids, vec![Value::from("a"), Value::from("b")]);
    }

    #[tokio::test]
    async fn test_concurrent_adds_never_duplicate() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = Arc::new(buffer(&sink, 4, 3));

        let mut handles = Vec::new();
        for producer in 0..4 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    buffer.add(row(&format!("{}-{}", producer, i))).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        buffer.flush().await;

        let rows = sink.dataset_rows();
        let unique: HashSet<String> = rows
            .iter()
            .filter_map(|r| r["interaction_id"].as_str().map(str::to_string))
            .collect();
        assert_eq!(rows.len(), 100);
        assert_eq!(unique.len(), 100);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer(&sink, 10, 3);
        buffer.add(row("a")).await;

        let first = buffer.close().await;
        assert_eq!(first.written, 1);
        assert!(buffer.is_closed());

        let second = buffer.close().await;
        assert_eq!(second, FlushOutcome::default());
        assert_eq!(sink.write_attempts(), 1);

        assert!(buffer.add(row("late")).await.is_none());
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_bounds_retries() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_all_writes();
        let buffer = buffer(&sink, 10, 2);
        buffer.add(row("a")).await;

        let outcome = buffer.close().await;

        assert_eq!(outcome.discarded, 1);
        assert_eq!(sink.write_attempts(), 3);
        assert!(buffer.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_adds_leaves_nothing_behind() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_next_writes(2);
        let buffer = Arc::new(buffer(&sink, 3, 3));

        let mut handles = Vec::new();
        for producer in 0..6 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..40 {
                    buffer.add(row(&format!("{}-{}", producer, i))).await;
                    tokio::task::yield_now().await;
                }
            }));
        }

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        buffer.close().await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(buffer.is_closed());
        assert!(buffer.is_empty().await);
        assert_eq!(buffer.flush().await, FlushOutcome::default());

        let rows = sink.dataset_rows();
        let unique: HashSet<String> = rows
            .iter()
            .filter_map(|r| r["interaction_id"].as_str().map(str::to_string))
            .collect();
        assert_eq!(rows.len(), unique.len());
    }
}
