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

//! Integration tests for the transfer coordinator.
//!
//! These tests verify end-to-end transfer behaviour including:
//! - Partitioning, provisioning and chunked writes
//! - Partial failures isolated per collection
//! - Graceful drain on shutdown

use async_trait::async_trait;
use conveyor_core::config::TransferConfig;
use conveyor_core::coordinator::{TransferCoordinator, TransferState};
use conveyor_core::error::{ErrorKind, QueueError, TransferError, WriteError};
use conveyor_core::identity::identity;
use conveyor_core::provisioner::Provisioned;
use conveyor_core::queue::RecordQueue;
use conveyor_core::record::Record;
use conveyor_core::router::{Granularity, Router, RoutingStrategy};
use conveyor_core::schema::CollectionSchema;
use conveyor_core::store::{
    BulkDocument, BulkItemResult, CreateOutcome, DocumentStore, MemoryDocumentStore, StoreError,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};

/// In-memory queue for testing.
#[derive(Debug, Default)]
struct TestQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    drains: Mutex<usize>,
}

impl TestQueue {
    async fn push(&self, record: &Record) {
        self.items
            .lock()
            .await
            .push_back(record.to_vec().expect("record encodes"));
    }

    async fn push_raw(&self, payload: &[u8]) {
        self.items.lock().await.push_back(payload.to_vec());
    }

    async fn drains(&self) -> usize {
        *self.drains.lock().await
    }
}

#[async_trait]
impl RecordQueue for TestQueue {
    async fn drain_all(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        *self.drains.lock().await += 1;
        Ok(self.items.lock().await.drain(..).collect())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.items.lock().await.len())
    }
}

/// Queue that replays scripted drain results, then reports empty drains.
#[derive(Debug, Default)]
struct ScriptedQueue {
    script: Mutex<VecDeque<Result<Vec<Vec<u8>>, QueueError>>>,
    drains: Mutex<usize>,
}

impl ScriptedQueue {
    fn new(script: Vec<Result<Vec<Vec<u8>>, QueueError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            drains: Mutex::new(0),
        }
    }

    async fn drains(&self) -> usize {
        *self.drains.lock().await
    }
}

#[async_trait]
impl RecordQueue for ScriptedQueue {
    async fn drain_all(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        *self.drains.lock().await += 1;
        self.script.lock().await.pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(0)
    }
}

/// Store that holds its first bulk write until released.
struct GatedStore {
    inner: MemoryDocumentStore,
    gate_open: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(inner: MemoryDocumentStore) -> Self {
        Self {
            inner,
            gate_open: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
        self.inner.exists(collection).await
    }

    async fn create(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<CreateOutcome, StoreError> {
        self.inner.create(collection, schema).await
    }

    async fn bind_alias(&self, collection: &str, alias: &str) -> Result<(), StoreError> {
        self.inner.bind_alias(collection, alias).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>, StoreError> {
        if !self.gate_open.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.bulk_write(collection, documents).await
    }

    async fn refresh(&self, collection: &str) -> Result<(), StoreError> {
        self.inner.refresh(collection).await
    }
}

fn record(origin: &str, n: usize) -> Record {
    Record::new("git", "commit", "0.12.0", origin)
        .with_uuid(format!("{origin}#{n}"))
        .with_field("timestamp", json!(1_483_228_800 + n))
        .with_data(json!({ "n": n }))
}

fn collection_for(origin: &str) -> String {
    identity(["git", "commit", "0.12.0", origin]).expect("valid identity")
}

fn one_shot(chunk_size: usize) -> TransferConfig {
    TransferConfig::builder()
        .keep_alive(false)
        .chunk_size(chunk_size)
        .build()
        .expect("valid config")
}

fn keep_alive() -> TransferConfig {
    TransferConfig::builder()
        .keep_alive(true)
        .idle_poll_interval(Duration::from_millis(10))
        .build()
        .expect("valid config")
}

async fn wait_until_empty(queue: &TestQueue) {
    for _ in 0..500 {
        if queue.len().await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue was never drained");
}

#[tokio::test]
async fn test_end_to_end_two_sources() {
    let queue = Arc::new(TestQueue::default());
    for n in 0..150 {
        queue.push(&record("https://example.com/a.git", n)).await;
    }
    for n in 0..100 {
        queue.push(&record("https://example.com/b.git", n)).await;
    }
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let summary = coordinator.run(shutdown_rx).await.unwrap();

    assert_eq!(summary.stats.records_read, 250);
    assert_eq!(summary.stats.records_written, 250);
    assert_eq!(summary.stats.collections_provisioned, 2);
    assert_eq!(summary.stats.chunk_writes, 3);
    assert_eq!(summary.unflushed, 0);

    let a = collection_for("https://example.com/a.git");
    let b = collection_for("https://example.com/b.git");
    assert_eq!(store.collections().await.len(), 2);
    assert_eq!(store.document_count(&a).await, 150);
    assert_eq!(store.document_count(&b).await, 100);
    assert_eq!(store.visible_count(&a).await, 150);
    assert_eq!(store.alias_count().await, 1);
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(store.alias_targets("git_commit_0.12.0").await, expected);
    assert_eq!(store.chunk_sizes().await, vec![100, 50, 100]);
    assert_eq!(coordinator.state(), TransferState::Stopped);
}

#[tokio::test]
async fn test_two_aliases_for_two_versions() {
    let queue = Arc::new(TestQueue::default());
    queue
        .push(&Record::new("git", "commit", "0.12.0", "o").with_uuid("1"))
        .await;
    queue
        .push(&Record::new("git", "commit", "0.13.0", "o").with_uuid("2"))
        .await;
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));

    coordinator.run_cycle().await.unwrap();

    assert_eq!(store.alias_count().await, 2);
    assert_eq!(store.alias_targets("git_commit_0.13.0").await.len(), 1);
}

#[tokio::test]
async fn test_arrival_order_is_preserved_per_collection() {
    let queue = Arc::new(TestQueue::default());
    for n in 0..5 {
        queue.push(&record("x", n)).await;
        queue.push(&record("y", n)).await;
    }
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(one_shot(2), Arc::clone(&queue), Arc::new(store.clone()));

    let report = coordinator.run_cycle().await.unwrap();

    assert_eq!(report.collections[0].name, collection_for("x"));
    assert_eq!(report.collections[1].name, collection_for("y"));
    let ids = store.ids(&collection_for("x")).await;
    assert_eq!(ids, (0..5).map(|n| format!("x#{n}")).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_time_bucketed_routing() {
    let queue = Arc::new(TestQueue::default());
    queue.push(&record("a", 0)).await;
    queue.push(&record("b", 0)).await;
    let store = MemoryDocumentStore::new();
    let config = TransferConfig::builder()
        .keep_alive(false)
        .routing(RoutingStrategy::time_bucketed("events", Granularity::Month))
        .build()
        .unwrap();
    let mut coordinator = TransferCoordinator::new(config, Arc::clone(&queue), Arc::new(store.clone()));

    let report = coordinator.run_cycle().await.unwrap();

    // a month boundary may fall between the two records
    let collections = store.collections().await;
    assert!(!collections.is_empty() && collections.len() <= 2);
    assert!(collections.iter().all(|c| c.starts_with("events_") && c.len() == "events_201701".len()));
    assert_eq!(report.total_written(), 2);
    assert_eq!(store.alias_targets("events").await, collections);
}

#[tokio::test]
async fn test_lookups_collection() {
    let queue = Arc::new(TestQueue::default());
    queue.push(&record("a", 0)).await;
    let store = MemoryDocumentStore::new();
    let config = TransferConfig::builder()
        .keep_alive(false)
        .routing(RoutingStrategy::lookups())
        .build()
        .unwrap();
    let mut coordinator = TransferCoordinator::new(config, Arc::clone(&queue), Arc::new(store.clone()));

    coordinator.run_cycle().await.unwrap();

    assert_eq!(store.collections().await, vec!["lookups".to_string()]);
    assert_eq!(store.alias_count().await, 0);
    assert_eq!(store.schema_of("lookups").await, Some(CollectionSchema::lookups()));
    let stored = store.document("lookups", "a#0").await.unwrap();
    assert!(stored.get("data").is_none());
}

#[tokio::test]
async fn test_missing_attribute_rejected_before_any_write() {
    let queue = Arc::new(TestQueue::default());
    queue
        .push(&Record::new("git", "commit", "0.12.0", "").with_uuid("1"))
        .await;
    queue.push(&record("a", 0)).await;
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));

    let err = coordinator.run_cycle().await.unwrap_err();

    assert_eq!(err.report.records_rejected, 1);
    assert_eq!(err.report.total_written(), 1);
    assert_eq!(store.collections().await, vec![collection_for("a")]);
    assert!(err.to_string().contains("1 error(s)"));
}

#[tokio::test]
async fn test_alias_failure_still_writes_collection() {
    let queue = Arc::new(TestQueue::default());
    queue.push(&record("a", 0)).await;
    queue.push(&record("a", 1)).await;
    let store = MemoryDocumentStore::new().with_alias_failure("git_commit_0.12.0");
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));

    let err = coordinator.run_cycle().await.unwrap_err();

    assert_eq!(err.report.total_written(), 2);
    assert_eq!(err.report.errors.len(), 1);
    assert_eq!(err.report.errors[0].kind(), ErrorKind::Provisioning);
    assert_eq!(store.document_count(&collection_for("a")).await, 2);
    assert!(coordinator.is_provisioned(&collection_for("a")));
    assert_eq!(
        err.report.collection(&collection_for("a")).unwrap().provisioned,
        Some(Provisioned::Created)
    );
    assert_eq!(coordinator.stats().collections_provisioned, 1);
}

#[tokio::test]
async fn test_provisioning_failure_isolated_to_one_collection() {
    let queue = Arc::new(TestQueue::default());
    queue.push(&record("a", 0)).await;
    queue.push(&record("b", 0)).await;
    let store = MemoryDocumentStore::new().with_create_failure(&collection_for("a"));
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));

    let err = coordinator.run_cycle().await.unwrap_err();

    let report = &err.report;
    assert_eq!(report.collection(&collection_for("a")).unwrap().written, 0);
    assert_eq!(report.collection(&collection_for("b")).unwrap().written, 1);
    assert_eq!(report.unwritten(), 1);
    assert!(!coordinator.is_provisioned(&collection_for("a")));
}

#[tokio::test]
async fn test_unknown_field_surfaces_as_write_error() {
    let queue = Arc::new(TestQueue::default());
    queue.push(&record("a", 0)).await;
    queue
        .push(&record("a", 1).with_field("unexpected", json!("value")))
        .await;
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));

    let err = coordinator.run_cycle().await.unwrap_err();

    match &err.report.errors[..] {
        [TransferError::Write(WriteError::Rejected {
            diagnostic,
            written,
            ..
        })] => {
            assert!(diagnostic.contains("unexpected"));
            assert_eq!(*written, 1);
        }
        other => panic!("unexpected errors: {other:?}"),
    }
    assert!(err.report.to_string().contains("write (1)"));
}

#[tokio::test]
async fn test_malformed_payload_does_not_stop_batch() {
    let queue = Arc::new(TestQueue::default());
    queue.push_raw(b"{\"backend_name\": ").await;
    queue.push_raw(b"42").await;
    queue.push(&record("a", 0)).await;
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));

    let err = coordinator.run_cycle().await.unwrap_err();

    assert_eq!(err.report.records_rejected, 2);
    assert_eq!(err.report.total_written(), 1);
}

#[tokio::test]
async fn test_shutdown_flushes_batch_pulled_during_write() {
    let queue = Arc::new(TestQueue::default());
    queue.push(&record("a", 0)).await;
    let memory = MemoryDocumentStore::new();
    let store = Arc::new(GatedStore::new(memory.clone()));
    let mut coordinator =
        TransferCoordinator::new(keep_alive(), Arc::clone(&queue), Arc::clone(&store));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let run = tokio::spawn(async move { coordinator.run(shutdown_rx).await });

    // first batch is being written; the reader pulls the second one meanwhile
    store.entered.notified().await;
    queue.push(&record("a", 1)).await;
    wait_until_empty(&queue).await;

    shutdown_tx.send(()).unwrap();
    store.release.notify_one();

    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.stats.records_written, 2);
    assert_eq!(summary.unflushed, 0);
    assert_eq!(memory.document_count(&collection_for("a")).await, 2);
}

#[tokio::test]
async fn test_shutdown_reports_unflushed_records() {
    let queue = Arc::new(TestQueue::default());
    queue.push(&record("a", 0)).await;
    let memory = MemoryDocumentStore::new().with_create_failure(&collection_for("b"));
    let store = Arc::new(GatedStore::new(memory.clone()));
    let mut coordinator =
        TransferCoordinator::new(keep_alive(), Arc::clone(&queue), Arc::clone(&store));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let run = tokio::spawn(async move { coordinator.run(shutdown_rx).await });

    store.entered.notified().await;
    queue.push(&record("b", 0)).await;
    queue.push(&record("b", 1)).await;
    wait_until_empty(&queue).await;

    shutdown_tx.send(()).unwrap();
    store.release.notify_one();

    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.stats.records_written, 1);
    assert_eq!(summary.unflushed, 2);
}

#[tokio::test]
async fn test_shutdown_reports_records_at_risk_from_failed_drain() {
    let queue = Arc::new(ScriptedQueue::new(vec![
        Ok(vec![record("a", 0).to_vec().unwrap()]),
        Err(QueueError::Transaction {
            message: "connection reset during EXEC".to_string(),
            records_at_risk: Some(5),
        }),
    ]));
    let store = Arc::new(GatedStore::new(MemoryDocumentStore::new()));
    let mut coordinator =
        TransferCoordinator::new(keep_alive(), Arc::clone(&queue), Arc::clone(&store));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let run = tokio::spawn(async move { coordinator.run(shutdown_rx).await });

    store.entered.notified().await;
    // the failed drain has been handed off once a third drain starts
    while queue.drains().await < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown_tx.send(()).unwrap();
    store.release.notify_one();

    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.stats.records_written, 1);
    assert_eq!(summary.unflushed, 5);
    assert_eq!(summary.stats.failures, 1);
    assert_eq!(summary.stats.failed_cycles, 1);
    assert_eq!(summary.stats.cycles, 2);
}

#[tokio::test]
async fn test_keep_alive_runs_until_shutdown() {
    let queue = Arc::new(TestQueue::default());
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(keep_alive(), Arc::clone(&queue), Arc::new(store.clone()));
    let mut states = coordinator.subscribe_state();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let run = tokio::spawn(async move { coordinator.run(shutdown_rx).await });

    queue.push(&record("a", 0)).await;
    wait_until_empty(&queue).await;
    queue.push(&record("a", 1)).await;
    wait_until_empty(&queue).await;
    while queue.drains().await < 4 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown_tx.send(()).unwrap();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.stats.records_written, 2);
    assert_eq!(summary.unflushed, 0);
    // empty drains are not handed off in keep-alive mode
    assert_eq!(summary.stats.cycles, 2);
    assert_eq!(*states.borrow_and_update(), TransferState::Stopped);
}

#[tokio::test]
async fn test_dropped_shutdown_sender_stops_run() {
    let queue = Arc::new(TestQueue::default());
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(keep_alive(), Arc::clone(&queue), Arc::new(store.clone()));
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    drop(shutdown_tx);

    let summary = tokio::time::timeout(Duration::from_secs(5), coordinator.run(shutdown_rx))
        .await
        .expect("run ends")
        .unwrap();

    assert_eq!(summary.unflushed, 0);
    assert_eq!(coordinator.state(), TransferState::Stopped);
}

#[tokio::test]
async fn test_redelivery_is_idempotent_with_uuid_ids() {
    let queue = Arc::new(TestQueue::default());
    let store = MemoryDocumentStore::new();
    let mut coordinator =
        TransferCoordinator::new(one_shot(100), Arc::clone(&queue), Arc::new(store.clone()));

    for _ in 0..2 {
        for n in 0..10 {
            queue.push(&record("a", n)).await;
        }
        coordinator.run_cycle().await.unwrap();
    }

    assert_eq!(store.document_count(&collection_for("a")).await, 10);
    assert_eq!(coordinator.stats().records_written, 20);
}

#[test]
fn test_router_agrees_with_identity() {
    let router = Router::new(RoutingStrategy::AttributeKeyed);
    let target = router.route(&record("a", 0)).unwrap();
    assert_eq!(target.name, collection_for("a"));
}
