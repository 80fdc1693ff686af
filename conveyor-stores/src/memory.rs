// Copyright 2025 Conveyor Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0


//! In-memory record queue.
//!
//! Suitable for local development, tests and single-process setups where
//! producer and pipeline share one process.
//!
//! # Limitations
//!
//! - **No persistence**: queued records are lost on process restart
//! - **Single process only**: cannot be shared across instances
//!
//! For production deployments use [`RedisQueue`](crate::redis::RedisQueue)
//! (`redis-queue` feature).
//!
//! # Example
//!
//! ```rust
//! use conveyor_core::queue::RecordQueue;
//! use conveyor_core::record::Record;
//! use conveyor_stores::memory::MemoryQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = MemoryQueue::new();
//! queue
//!     .push(&Record::new("git", "commit", "0.12.0", "https://example.com/repo.git"))
//!     .await?;
//!
//! let payloads = queue.drain_all().await?;
//! assert_eq!(payloads.len(), 1);
//! assert!(queue.is_empty().await?);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use conveyor_core::error::QueueError;
use conveyor_core::queue::RecordQueue;
use conveyor_core::record::Record;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct State {
    items: VecDeque<Vec<u8>>,
    closed: bool,
    fail_next_drains: usize,
    records_at_risk: Option<usize>,
    drains: usize,
}

/// In-memory FIFO queue of encoded records.
///
/// Clones share the same queue, so a producer task can hold one clone while
/// the pipeline drains another.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` drains fail with [`QueueError::Transaction`],
    /// leaving the queued records in place.
    #[must_use]
    pub fn with_failing_drains(self, count: usize) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.fail_next_drains = count;
        }
        self
    }

    /// Sets the `records_at_risk` reported by injected drain failures.
    #[must_use]
    pub fn with_records_at_risk(self, count: usize) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.records_at_risk = Some(count);
        }
        self
    }

    /// Appends one record and returns the new queue length.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the record cannot be encoded,
    /// or [`QueueError::Closed`] after [`close`](RecordQueue::close).
    pub async fn push(&self, record: &Record) -> Result<usize, QueueError> {
        self.push_records(std::slice::from_ref(record)).await
    }

    /// Appends records in order and returns the new queue length.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if a record cannot be encoded,
    /// or [`QueueError::Closed`] after [`close`](RecordQueue::close).
    pub async fn push_records(&self, records: &[Record]) -> Result<usize, QueueError> {
        let payloads = records
            .iter()
            .map(|record| {
                record.to_vec().map_err(|e| QueueError::Serialization {
                    message: format!("failed to encode record: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.push_payloads(payloads).await
    }

    /// Appends already encoded payloads and returns the new queue length.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] after [`close`](RecordQueue::close).
    pub async fn push_payloads(
        &self,
        payloads: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.items.extend(payloads);
        trace!(length = state.items.len(), "Payloads pushed");
        Ok(state.items.len())
    }

    /// Returns the number of drains attempted so far.
    pub async fn drain_count(&self) -> usize {
        self.state.lock().await.drains
    }

    /// Removes every queued payload without delivering it.
    pub async fn clear(&self) {
        self.state.lock().await.items.clear();
    }
}

#[async_trait]
impl RecordQueue for MemoryQueue {
    async fn drain_all(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut state = self.state.lock().await;
        state.drains += 1;

        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.fail_next_drains > 0 {
            state.fail_next_drains -= 1;
            return Err(QueueError::Transaction {
                message: "injected drain failure".to_string(),
                records_at_risk: state.records_at_risk,
            });
        }

        let drained: Vec<Vec<u8>> = state.items.drain(..).collect();
        if !drained.is_empty() {
            debug!(records = drained.len(), "Memory queue drained");
        }
        Ok(drained)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        Ok(state.items.len())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> Record {
        Record::new("git", "commit", "0.12.0", "origin").with_uuid(n.to_string())
    }

    #[tokio::test]
    async fn test_new_queue_is_empty() {
        let queue = MemoryQueue::new();
        assert!(queue.is_empty().await.unwrap());
        assert!(queue.drain_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_returns_fifo_order_and_empties() {
        let queue = MemoryQueue::new();
        queue.push_records(&[record(1), record(2), record(3)]).await.unwrap();

        let drained = queue.drain_all().await.unwrap();
        let uuids: Vec<String> = drained
            .iter()
            .map(|p| Record::from_slice(p).unwrap().uuid().unwrap().to_string())
            .collect();

        assert_eq!(uuids, vec!["1", "2", "3"]);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_returns_length() {
        let queue = MemoryQueue::new();
        assert_eq!(queue.push(&record(1)).await.unwrap(), 1);
        assert_eq!(queue.push_payloads(vec![b"{}".to_vec()]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_keeps_records() {
        let queue = MemoryQueue::new()
            .with_failing_drains(1)
            .with_records_at_risk(4);
        queue.push(&record(1)).await.unwrap();

        let err = queue.drain_all().await.unwrap_err();
        assert_eq!(err.records_at_risk(), Some(4));

        assert_eq!(queue.drain_all().await.unwrap().len(), 1);
        assert_eq!(queue.drain_count().await, 2);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_operations() {
        let queue = MemoryQueue::new();
        queue.close().await.unwrap();

        assert!(matches!(queue.drain_all().await, Err(QueueError::Closed)));
        assert!(matches!(queue.push(&record(1)).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let producer = MemoryQueue::new();
        let consumer = producer.clone();

        producer.push(&record(1)).await.unwrap();
        assert_eq!(consumer.drain_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let queue = MemoryQueue::new();
        let mut handles = Vec::new();
        for n in 0..10 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.push(&record(n)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.drain_all().await.unwrap().len(), 10);
    }
}
