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


//! Record queue implementations for the Conveyor transfer pipeline.
//!
//! This crate provides backends for the
//! [`RecordQueue`](conveyor_core::queue::RecordQueue) trait.
//!
//! # Available Queues
//!
//! - **Redis** (`redis-queue` feature): a Redis list drained atomically
//! - **Memory**: an in-process queue for tests and local runs
//!
//! # Feature Flags
//!
//! - `redis-queue`: Enables the Redis list queue (requires a Redis server)
//!
//! # Example: Redis Queue
//!
//! ```rust,ignore
//! use conveyor_core::queue::RecordQueue;
//! use conveyor_core::record::Record;
//! use conveyor_stores::redis::{RedisQueue, RedisQueueConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisQueueConfig::builder()
//!     .url("redis://localhost/8")
//!     .queue("items")
//!     .build()?;
//!
//! let queue = RedisQueue::new(config).await?;
//!
//! // Producer side
//! queue
//!     .push(&Record::new("git", "commit", "0.12.0", "https://example.com/repo.git"))
//!     .await?;
//!
//! // Consumer side
//! let payloads = queue.drain_all().await?;
//! assert_eq!(payloads.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;

#[cfg(feature = "redis-queue")]
pub mod redis;

pub use memory::MemoryQueue;
