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

//! Transfer coordinator.
//!
//! The coordinator moves records from a [`RecordQueue`] into a
//! [`DocumentStore`] in cycles:
//!
//! ```text
//!  Idle ──► Reading ──► Routing ──► Writing ──► Idle (keep-alive)
//!                                      │
//!                                      ├──────► Draining ──► Stopped (shutdown signal)
//!                                      └──────► Stopped (one-shot)
//! ```
//!
//! - **Reading**: the queue is drained atomically.
//! - **Routing**: each record is decoded, validated and assigned a collection.
//!   Records are grouped per collection in arrival order. A record that cannot
//!   be routed is reported and skipped.
//! - **Writing**: each collection is provisioned (once per process) and
//!   written in chunks. A failing collection never stops the others.
//!
//! # Concurrency
//!
//! [`TransferCoordinator::run`] spawns one reader task that drains the queue
//! into a bounded handoff channel of capacity one, while the calling task
//! routes and writes. The next drain can happen while the previous batch is
//! being written, but at most one drained batch waits in the handoff.
//!
//! When the shutdown signal fires, the reader is stopped, every batch already
//! pulled from the queue is collected, and exactly one final cycle writes
//! them. A cycle in progress is always finished first.
//!
//! # Examples
//!
//! ```rust,no_run
//! use conveyor_core::config::TransferConfig;
//! use conveyor_core::coordinator::TransferCoordinator;
//! use conveyor_core::queue::RecordQueue;
//! use conveyor_core::store::MemoryDocumentStore;
//! use std::sync::Arc;
//! use tokio::sync::broadcast;
//!
//! # async fn example(queue: Arc<impl RecordQueue + 'static>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryDocumentStore::new());
//! let mut coordinator = TransferCoordinator::new(TransferConfig::default(), queue, store);
//!
//! let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     let _ = shutdown_tx.send(());
//! });
//!
//! let summary = coordinator.run(shutdown_rx).await?;
//! println!("wrote {} records", summary.stats.records_written);
//! # Ok(())
//! # }
//! ```

use crate::config::TransferConfig;
use crate::error::{CoordinatorError, CycleError, ErrorKind, QueueError};
use crate::metrics::{self, PipelineStatus};
use crate::provisioner::{Provisioned, Provisioner};
use crate::queue::RecordQueue;
use crate::record::Record;
use crate::report::{CollectionReport, CycleReport, TransferStats, TransferSummary};
use crate::router::{CollectionTarget, Router};
use crate::store::DocumentStore;
use crate::writer::BulkWriter;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle state of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Waiting for the next cycle.
    Idle,
    /// Waiting for a drained batch.
    Reading,
    /// Decoding and routing a batch.
    Routing,
    /// Provisioning collections and writing chunks.
    Writing,
    /// Flushing batches pulled before the shutdown signal.
    Draining,
    /// Finished; no further cycle will run.
    Stopped,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Routing => "routing",
            Self::Writing => "writing",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

type Handoff = Result<Vec<Vec<u8>>, QueueError>;

/// Moves records from a queue into a document store.
pub struct TransferCoordinator<Q: RecordQueue, S: DocumentStore> {
    config: TransferConfig,
    queue: Arc<Q>,
    router: Router,
    provisioner: Provisioner<S>,
    writer: BulkWriter<S>,
    provisioned: HashSet<String>,
    state: watch::Sender<TransferState>,
    stats: TransferStats,
    cycle: u64,
}

impl<Q, S> TransferCoordinator<Q, S>
where
    Q: RecordQueue + 'static,
    S: DocumentStore + 'static,
{
    /// Creates a coordinator over shared queue and store handles.
    #[must_use]
    pub fn new(config: TransferConfig, queue: Arc<Q>, store: Arc<S>) -> Self {
        info!(
            routing = %config.routing,
            chunk_size = config.chunk_size,
            keep_alive = config.keep_alive,
            delay = ?config.delay,
            "Creating transfer coordinator"
        );

        let (state, _) = watch::channel(TransferState::Idle);

        Self {
            router: Router::new(config.routing.clone()),
            provisioner: Provisioner::new(Arc::clone(&store)),
            writer: BulkWriter::new(store, config.chunk_size),
            config,
            queue,
            provisioned: HashSet::new(),
            state,
            stats: TransferStats::default(),
            cycle: 0,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<TransferState> {
        self.state.subscribe()
    }

    /// Returns the statistics accumulated so far.
    #[must_use]
    pub fn stats(&self) -> TransferStats {
        self.stats.clone()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Returns whether a collection is known to exist.
    #[must_use]
    pub fn is_provisioned(&self, collection: &str) -> bool {
        self.provisioned.contains(collection)
    }

    /// Runs exactly one Reading, Routing, Writing cycle.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] if the drain failed or any record, collection or
    /// chunk failed. The wrapped report still lists everything that was
    /// written.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.set_state(TransferState::Reading);
        let drained = self.queue.drain_all().await;
        let report = self.process(drained).await;
        self.set_state(TransferState::Idle);

        if report.is_success() {
            Ok(report)
        } else {
            Err(CycleError { report })
        }
    }

    /// Runs until the queue is drained once (one-shot) or until `shutdown`
    /// fires (keep-alive).
    ///
    /// The shutdown signal is either a message on the channel or the sender
    /// being dropped. Cycle failures are logged and counted; they do not end
    /// the run.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Reader`] if the reader task panicked.
    #[instrument(skip(self, shutdown), fields(routing = %self.config.routing))]
    pub async fn run(
        &mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<TransferSummary, CoordinatorError> {
        info!("Starting transfer");
        metrics::set_pipeline_status(PipelineStatus::Running);

        let (handoff_tx, mut handoff_rx) = mpsc::channel::<Handoff>(1);
        let (stop_tx, stop_rx) = watch::channel(false);

        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.queue),
            handoff_tx,
            stop_rx,
            ReaderSettings {
                keep_alive: self.config.keep_alive,
                delay: self.config.delay,
                idle_poll_interval: self.config.idle_poll_interval,
            },
        ));

        let mut shutdown_requested = false;
        loop {
            self.set_state(TransferState::Reading);

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    shutdown_requested = true;
                    break;
                }

                handoff = handoff_rx.recv() => match handoff {
                    Some(drained) => {
                        self.process_and_log(drained).await;
                        self.set_state(TransferState::Idle);
                    }
                    None => {
                        debug!("Reader finished");
                        break;
                    }
                }
            }
        }

        let mut unflushed = 0;
        if shutdown_requested {
            unflushed = self.drain(&stop_tx, &mut handoff_rx).await;
        }

        let _ = stop_tx.send(true);
        drop(handoff_rx);
        reader
            .await
            .map_err(|e| CoordinatorError::Reader(e.to_string()))?;

        self.set_state(TransferState::Stopped);
        metrics::set_pipeline_status(PipelineStatus::Stopped);

        let summary = TransferSummary {
            stats: self.stats.clone(),
            unflushed,
        };
        info!(
            cycles = summary.stats.cycles,
            records_read = summary.stats.records_read,
            records_written = summary.stats.records_written,
            unflushed = summary.unflushed,
            "Transfer stopped"
        );

        Ok(summary)
    }

    /// Releases the queue's connections.
    ///
    /// # Errors
    ///
    /// Returns the queue's cleanup error.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.queue.close().await
    }

    async fn drain(
        &mut self,
        stop_tx: &watch::Sender<bool>,
        handoff_rx: &mut mpsc::Receiver<Handoff>,
    ) -> usize {
        self.set_state(TransferState::Draining);
        metrics::set_pipeline_status(PipelineStatus::Draining);
        let _ = stop_tx.send(true);

        let mut pending = Vec::new();
        let mut queue_errors = Vec::new();
        while let Some(handoff) = handoff_rx.recv().await {
            match handoff {
                Ok(payloads) => pending.extend(payloads),
                Err(e) => queue_errors.push(e),
            }
        }

        if pending.is_empty() && queue_errors.is_empty() {
            debug!("Nothing pending at shutdown");
            return 0;
        }

        let at_risk: usize = queue_errors
            .iter()
            .filter_map(QueueError::records_at_risk)
            .sum();

        info!(records = pending.len(), "Writing records pulled before shutdown");
        let mut report = self.process(Ok(pending)).await;
        for e in queue_errors {
            self.record_queue_failure(e, &mut report);
        }
        let lost = report.unwritten();
        let unflushed = lost + at_risk;

        if report.is_success() {
            info!("{report}");
        } else {
            warn!("{report}");
        }
        if unflushed > 0 {
            metrics::increment_queue_losses_by(lost as u64);
            warn!(
                records = unflushed,
                "{unflushed} records have been lost before closing the transfer"
            );
        }

        unflushed
    }

    async fn process_and_log(&mut self, drained: Handoff) {
        let report = self.process(drained).await;

        if report.is_success() {
            metrics::set_pipeline_status(PipelineStatus::Running);
            if report.records_read == 0 {
                debug!(cycle = report.cycle, "Empty cycle");
            } else {
                info!("{report}");
            }
        } else {
            metrics::set_pipeline_status(PipelineStatus::Error);
            warn!("{report}");
        }
    }

    #[instrument(skip(self, drained), fields(cycle = self.cycle + 1))]
    async fn process(&mut self, drained: Handoff) -> CycleReport {
        self.cycle += 1;
        let start = Instant::now();
        let chunks_before = self.writer.chunks_submitted();

        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        match drained {
            Ok(payloads) => {
                report.records_read = payloads.len();
                metrics::increment_records_read_by(payloads.len() as u64);
                metrics::record_cycle_size(payloads.len());

                self.set_state(TransferState::Routing);
                let partitions = self.partition(payloads, &mut report);

                self.set_state(TransferState::Writing);
                for (target, records) in partitions {
                    let outcome = self.write_partition(target, records, &mut report).await;
                    report.collections.push(outcome);
                }
            }
            Err(e) => report.errors.push(Self::log_queue_failure(e).into()),
        }

        report.duration = start.elapsed();
        metrics::record_cycle_duration(report.duration);
        self.stats
            .absorb(&report, self.writer.chunks_submitted() - chunks_before);

        report
    }

    /// Adds a queue failure to a report whose cycle was already counted.
    fn record_queue_failure(&mut self, e: QueueError, report: &mut CycleReport) {
        if report.is_success() {
            self.stats.failed_cycles += 1;
        }
        self.stats.failures += 1;
        report.errors.push(Self::log_queue_failure(e).into());
    }

    fn log_queue_failure(e: QueueError) -> QueueError {
        match e.records_at_risk() {
            Some(at_risk) => {
                metrics::increment_queue_losses_by(at_risk as u64);
                warn!(
                    error = %e,
                    records_at_risk = at_risk,
                    "Queue read failed, {at_risk} records may be lost or redelivered"
                );
            }
            None => warn!(error = %e, "Queue read failed"),
        }
        e
    }

    fn partition(
        &self,
        payloads: Vec<Vec<u8>>,
        report: &mut CycleReport,
    ) -> Vec<(CollectionTarget, Vec<Record>)> {
        let mut partitions: Vec<(CollectionTarget, Vec<Record>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for payload in payloads {
            let routed = Record::from_slice(&payload)
                .and_then(|record| self.router.route(&record).map(|target| (target, record)));

            match routed {
                Ok((target, record)) => match index.get(&target.name) {
                    Some(&i) => partitions[i].1.push(record),
                    None => {
                        index.insert(target.name.clone(), partitions.len());
                        partitions.push((target, vec![record]));
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Rejected record");
                    report.records_rejected += 1;
                    report.errors.push(e.into());
                }
            }
        }

        metrics::increment_records_failed_by(report.records_rejected as u64, ErrorKind::Routing);
        debug!(
            collections = partitions.len(),
            rejected = report.records_rejected,
            "Batch partitioned"
        );

        partitions
    }

    async fn write_partition(
        &mut self,
        target: CollectionTarget,
        records: Vec<Record>,
        report: &mut CycleReport,
    ) -> CollectionReport {
        let attempted = records.len();
        let mut outcome = CollectionReport {
            name: target.name.clone(),
            attempted,
            written: 0,
            provisioned: None,
        };

        if !self.provisioned.contains(&target.name) {
            match self.provisioner.ensure(&target).await {
                Ok(provisioned) => {
                    outcome.provisioned = Some(provisioned);
                    self.provisioned.insert(target.name.clone());
                }
                Err(e) if e.collection_usable() => {
                    warn!(
                        collection = %target.name,
                        error = %e,
                        "Alias binding failed, writing to collection by name"
                    );
                    outcome.provisioned = Some(Provisioned::Created);
                    self.provisioned.insert(target.name.clone());
                    report.errors.push(e.into());
                }
                Err(e) => {
                    error!(
                        collection = %target.name,
                        records = attempted,
                        error = %e,
                        "Provisioning failed, partition not written"
                    );
                    metrics::increment_records_failed_by(attempted as u64, ErrorKind::Provisioning);
                    report.errors.push(e.into());
                    return outcome;
                }
            }
        }

        match self
            .writer
            .write(&target.name, records, &self.config.id_policy)
            .await
        {
            Ok(written) => outcome.written = written,
            Err(e) => {
                outcome.written = e.written();
                error!(
                    collection = %target.name,
                    records = attempted,
                    written = outcome.written,
                    error = %e,
                    "Write failed"
                );
                metrics::increment_records_failed_by(
                    (attempted - outcome.written) as u64,
                    ErrorKind::Write,
                );
                report.errors.push(e.into());
            }
        }

        outcome
    }

    fn set_state(&self, state: TransferState) {
        self.state.send_replace(state);
    }
}

impl<Q: RecordQueue, S: DocumentStore> fmt::Debug for TransferCoordinator<Q, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .field("cycle", &self.cycle)
            .field("provisioned", &self.provisioned.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct ReaderSettings {
    keep_alive: bool,
    delay: Duration,
    idle_poll_interval: Duration,
}

/// Drains the queue into the handoff until stopped.
///
/// Empty drains are handed off only in one-shot mode, so that a one-shot run
/// always completes one cycle.
async fn read_loop<Q: RecordQueue>(
    queue: Arc<Q>,
    handoff: mpsc::Sender<Handoff>,
    mut stop: watch::Receiver<bool>,
    settings: ReaderSettings,
) {
    loop {
        if *stop.borrow() {
            break;
        }

        let drained = queue.drain_all().await;
        let pause = match &drained {
            Ok(payloads) if payloads.is_empty() => settings.delay.max(settings.idle_poll_interval),
            Ok(_) => settings.delay,
            Err(_) => settings.idle_poll_interval,
        };
        let skip = settings.keep_alive && matches!(&drained, Ok(p) if p.is_empty());

        if !skip && handoff.send(drained).await.is_err() {
            break;
        }

        if !settings.keep_alive {
            break;
        }

        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("Queue reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct VecQueue {
        items: Mutex<VecDeque<Vec<u8>>>,
        fail: Mutex<bool>,
    }

    impl VecQueue {
        async fn push(&self, record: &Record) {
            self.items.lock().await.push_back(record.to_vec().unwrap());
        }
    }

    #[async_trait]
    impl RecordQueue for VecQueue {
        async fn drain_all(&self) -> Result<Vec<Vec<u8>>, QueueError> {
            if *self.fail.lock().await {
                return Err(QueueError::Transaction {
                    message: "EXECABORT".to_string(),
                    records_at_risk: Some(3),
                });
            }
            Ok(self.items.lock().await.drain(..).collect())
        }

        async fn len(&self) -> Result<usize, QueueError> {
            Ok(self.items.lock().await.len())
        }
    }

    fn record(origin: &str, n: usize) -> Record {
        Record::new("git", "commit", "1", origin).with_uuid(format!("{origin}-{n}"))
    }

    fn one_shot() -> TransferConfig {
        TransferConfig::builder().keep_alive(false).build().unwrap()
    }

    #[tokio::test]
    async fn test_run_cycle_partitions_by_collection() {
        let queue = Arc::new(VecQueue::default());
        for n in 0..3 {
            queue.push(&record("a", n)).await;
            queue.push(&record("b", n)).await;
        }
        let store = MemoryDocumentStore::new();
        let mut coordinator =
            TransferCoordinator::new(one_shot(), Arc::clone(&queue), Arc::new(store.clone()));

        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.records_read, 6);
        assert_eq!(report.collections.len(), 2);
        assert_eq!(report.total_written(), 6);
        assert_eq!(store.collections().await.len(), 2);
        assert_eq!(coordinator.state(), TransferState::Idle);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provisioning_is_cached() {
        let queue = Arc::new(VecQueue::default());
        let store = MemoryDocumentStore::new();
        let mut coordinator =
            TransferCoordinator::new(one_shot(), Arc::clone(&queue), Arc::new(store.clone()));

        queue.push(&record("a", 0)).await;
        coordinator.run_cycle().await.unwrap();
        queue.push(&record("a", 1)).await;
        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(store.exists_calls().await, 1);
        assert_eq!(report.collections[0].provisioned, None);
        assert_eq!(coordinator.stats().collections_provisioned, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected_and_batch_continues() {
        let queue = Arc::new(VecQueue::default());
        queue.items.lock().await.push_back(b"\x80\x03pickle".to_vec());
        queue.push(&record("a", 0)).await;
        let store = MemoryDocumentStore::new();
        let mut coordinator =
            TransferCoordinator::new(one_shot(), Arc::clone(&queue), Arc::new(store.clone()));

        let err = coordinator.run_cycle().await.unwrap_err();

        assert_eq!(err.report.records_rejected, 1);
        assert_eq!(err.report.total_written(), 1);
        assert_eq!(err.report.errors[0].kind(), ErrorKind::Routing);
    }

    #[tokio::test]
    async fn test_queue_failure_aborts_cycle() {
        let queue = Arc::new(VecQueue::default());
        *queue.fail.lock().await = true;
        let store = MemoryDocumentStore::new();
        let mut coordinator =
            TransferCoordinator::new(one_shot(), Arc::clone(&queue), Arc::new(store.clone()));

        let err = coordinator.run_cycle().await.unwrap_err();

        assert_eq!(err.report.errors.len(), 1);
        assert_eq!(err.report.errors[0].kind(), ErrorKind::Queue);
        assert_eq!(store.bulk_calls().await, 0);
    }

    #[tokio::test]
    async fn test_one_shot_run_stops_after_one_cycle() {
        let queue = Arc::new(VecQueue::default());
        queue.push(&record("a", 0)).await;
        let store = MemoryDocumentStore::new();
        let mut coordinator =
            TransferCoordinator::new(one_shot(), Arc::clone(&queue), Arc::new(store.clone()));
        let (_tx, rx) = broadcast::channel(1);

        let summary = coordinator.run(rx).await.unwrap();

        assert_eq!(summary.stats.cycles, 1);
        assert_eq!(summary.stats.records_written, 1);
        assert_eq!(summary.unflushed, 0);
        assert_eq!(coordinator.state(), TransferState::Stopped);
    }

    #[tokio::test]
    async fn test_one_shot_run_on_empty_queue() {
        let queue = Arc::new(VecQueue::default());
        let store = MemoryDocumentStore::new();
        let mut coordinator =
            TransferCoordinator::new(one_shot(), Arc::clone(&queue), Arc::new(store.clone()));
        let (_tx, rx) = broadcast::channel(1);

        let summary = coordinator.run(rx).await.unwrap();

        assert_eq!(summary.stats.cycles, 1);
        assert_eq!(summary.stats.records_read, 0);
        assert_eq!(store.bulk_calls().await, 0);
    }
}
