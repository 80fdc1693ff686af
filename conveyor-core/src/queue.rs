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

//! Record queue abstraction.
//!
//! The pipeline reads from a FIFO queue of encoded records. A read takes
//! everything currently queued and removes it in the same atomic step, so two
//! readers never see the same record and a producer pushing concurrently
//! never loses one.
//!
//! Delivery is at-least-once: if the pipeline crashes after a drain but before
//! the write completes, those records are gone from the queue. Writing with a
//! stable document id makes a re-run after a producer replay idempotent.
//!
//! Implementations live in the `conveyor-stores` crate.

use crate::error::QueueError;
use async_trait::async_trait;
use std::sync::Arc;

/// A FIFO queue of encoded records.
#[async_trait]
pub trait RecordQueue: Send + Sync {
    /// Atomically reads and removes every queued payload, oldest first.
    ///
    /// Returns an empty vector when the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue is unreachable or the read+trim
    /// transaction fails. When the trim may have happened without the read
    /// being delivered, [`QueueError::records_at_risk`] says how many payloads
    /// are affected.
    async fn drain_all(&self) -> Result<Vec<Vec<u8>>, QueueError>;

    /// Returns the number of queued payloads.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue is unreachable.
    async fn len(&self) -> Result<usize, QueueError>;

    /// Returns whether the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue is unreachable.
    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Releases connections. Later drains fail with [`QueueError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if cleanup fails.
    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl<T: RecordQueue + ?Sized> RecordQueue for Arc<T> {
    async fn drain_all(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        (**self).drain_all().await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        (**self).len().await
    }

    async fn close(&self) -> Result<(), QueueError> {
        (**self).close().await
    }
}
