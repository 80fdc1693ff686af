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

//! Conveyor Core - queue to document store transfer pipeline
//!
//! This crate moves batches of records from a durable queue into a document
//! store, partitioning them into collections named either after their source
//! or after a time bucket.
//!
//! # Key Components
//!
//! - **Records**: [`record`] wraps the JSON documents read from the queue
//! - **Identity**: [`identity`] derives deterministic SHA-1 names and ids
//! - **Routing**: [`router`] assigns each record a [`router::CollectionTarget`]
//! - **Provisioning**: [`provisioner`] creates collections and binds aliases
//! - **Writing**: [`writer`] submits chunked bulk requests
//! - **Coordination**: [`coordinator`] runs read, route, write cycles with
//!   graceful drain on shutdown
//! - **Traits**: [`queue::RecordQueue`] and [`store::DocumentStore`] are
//!   implemented by `conveyor-stores` and `conveyor-destinations`
//!
//! # Example
//!
//! ```rust
//! use conveyor_core::record::Record;
//! use conveyor_core::router::{Granularity, Router, RoutingStrategy};
//!
//! let router = Router::new(RoutingStrategy::time_bucketed("events", Granularity::Month));
//! let record = Record::new("git", "commit", "0.12.0", "https://example.com/repo.git");
//!
//! let target = router.route(&record).unwrap();
//! assert!(target.name.starts_with("events_"));
//! assert_eq!(target.alias.as_deref(), Some("events"));
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod provisioner;
pub mod queue;
pub mod record;
pub mod report;
pub mod router;
pub mod schema;
pub mod store;
pub mod writer;
