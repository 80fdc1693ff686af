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

//! Metrics instrumentation for transfer pipelines.
//!
//! Metrics are recorded through the `metrics` facade, so any exporter
//! (Prometheus, StatsD, ...) can be installed by the application. Without an
//! installed recorder every call is a no-op.
//!
//! # Metrics
//!
//! | Name | Type | Labels |
//! |---|---|---|
//! | `conveyor_records_read_total` | counter | |
//! | `conveyor_records_written_total` | counter | `collection` |
//! | `conveyor_records_failed_total` | counter | `error_type` |
//! | `conveyor_chunks_written_total` | counter | |
//! | `conveyor_collections_provisioned_total` | counter | |
//! | `conveyor_queue_losses_total` | counter | |
//! | `conveyor_cycle_duration_seconds` | histogram | |
//! | `conveyor_chunk_write_duration_seconds` | histogram | |
//! | `conveyor_cycle_size` | histogram | |
//! | `conveyor_pipeline_status` | gauge | |
//!
//! The `collection` label is bounded by the routing strategy. Time-bucketed
//! routing at minute granularity creates a new label value every minute, so
//! exporters with long retention should drop it.
//!
//! # Examples
//!
//! ```rust
//! use conveyor_core::error::ErrorKind;
//! use conveyor_core::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_records_read_by(250);
//! metrics::increment_records_written_by(100, "events_20170101");
//! metrics::increment_records_failed_by(1, ErrorKind::Routing);
//! ```

use crate::error::ErrorKind;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Records taken from the queue.
///
/// Type: Counter
pub const RECORDS_READ_TOTAL: &str = "conveyor_records_read_total";

/// Documents acknowledged by the store.
///
/// Type: Counter
/// Labels: collection
pub const RECORDS_WRITTEN_TOTAL: &str = "conveyor_records_written_total";

/// Records that could not be written.
///
/// Type: Counter
/// Labels: `error_type`
pub const RECORDS_FAILED_TOTAL: &str = "conveyor_records_failed_total";

/// Fully accepted bulk chunks.
///
/// Type: Counter
pub const CHUNKS_WRITTEN_TOTAL: &str = "conveyor_chunks_written_total";

/// Collections created by this process.
///
/// Type: Counter
pub const COLLECTIONS_PROVISIONED_TOTAL: &str = "conveyor_collections_provisioned_total";

/// Records removed from the queue but not durably written.
///
/// Type: Counter
pub const QUEUE_LOSSES_TOTAL: &str = "conveyor_queue_losses_total";

/// Time taken by one cycle.
///
/// Type: Histogram
/// Unit: seconds
pub const CYCLE_DURATION_SECONDS: &str = "conveyor_cycle_duration_seconds";

/// Time taken by one bulk request.
///
/// Type: Histogram
/// Unit: seconds
pub const CHUNK_WRITE_DURATION_SECONDS: &str = "conveyor_chunk_write_duration_seconds";

/// Records per cycle.
///
/// Type: Histogram
/// Unit: records
pub const CYCLE_SIZE: &str = "conveyor_cycle_size";

/// Current pipeline status (0=stopped, 1=running, 2=draining, 3=error).
///
/// Type: Gauge
pub const PIPELINE_STATUS: &str = "conveyor_pipeline_status";

/// Registers metric descriptions with the installed recorder.
///
/// Call once at startup, after installing an exporter.
pub fn init_metrics() {
    describe_counter!(RECORDS_READ_TOTAL, "Total number of records taken from the queue");
    describe_counter!(
        RECORDS_WRITTEN_TOTAL,
        "Total number of documents acknowledged by the document store"
    );
    describe_counter!(
        RECORDS_FAILED_TOTAL,
        "Total number of records rejected during routing or writing"
    );
    describe_counter!(
        CHUNKS_WRITTEN_TOTAL,
        "Total number of bulk chunks accepted without rejections"
    );
    describe_counter!(
        COLLECTIONS_PROVISIONED_TOTAL,
        "Total number of collections created by this process"
    );
    describe_counter!(
        QUEUE_LOSSES_TOTAL,
        "Total number of records removed from the queue but not durably written"
    );

    describe_histogram!(
        CYCLE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken by one read-route-write cycle"
    );
    describe_histogram!(
        CHUNK_WRITE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken by one bulk write request"
    );
    describe_histogram!(
        CYCLE_SIZE,
        metrics::Unit::Count,
        "Number of records processed per cycle"
    );

    describe_gauge!(
        PIPELINE_STATUS,
        "Current pipeline status: 0=stopped, 1=running, 2=draining, 3=error"
    );
}

/// Adds to the count of records read from the queue.
pub fn increment_records_read_by(count: u64) {
    counter!(RECORDS_READ_TOTAL).increment(count);
}

/// Adds to the count of documents acknowledged for a collection.
pub fn increment_records_written_by(count: u64, collection: &str) {
    if count > 0 {
        counter!(RECORDS_WRITTEN_TOTAL, "collection" => collection.to_string()).increment(count);
    }
}

/// Adds to the count of failed records.
///
/// ```rust
/// use conveyor_core::error::ErrorKind;
/// use conveyor_core::metrics;
///
/// metrics::increment_records_failed_by(3, ErrorKind::Provisioning);
/// ```
pub fn increment_records_failed_by(count: u64, kind: ErrorKind) {
    if count > 0 {
        counter!(RECORDS_FAILED_TOTAL, "error_type" => kind.as_str()).increment(count);
    }
}

/// Increments the count of fully accepted chunks.
pub fn increment_chunks_written() {
    counter!(CHUNKS_WRITTEN_TOTAL).increment(1);
}

/// Increments the count of collections created.
pub fn increment_collections_provisioned() {
    counter!(COLLECTIONS_PROVISIONED_TOTAL).increment(1);
}

/// Adds to the count of records lost between queue and store.
pub fn increment_queue_losses_by(count: u64) {
    if count > 0 {
        counter!(QUEUE_LOSSES_TOTAL).increment(count);
    }
}

/// Records the duration of one cycle.
pub fn record_cycle_duration(duration: Duration) {
    histogram!(CYCLE_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Records the duration of one bulk request.
pub fn record_chunk_write_duration(duration: Duration) {
    histogram!(CHUNK_WRITE_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Records the number of records in one cycle.
#[allow(clippy::cast_precision_loss)]
pub fn record_cycle_size(size: usize) {
    histogram!(CYCLE_SIZE).record(size as f64);
}

/// Sets the pipeline status gauge.
pub fn set_pipeline_status(status: PipelineStatus) {
    gauge!(PIPELINE_STATUS).set(f64::from(status as u8));
}

/// Pipeline status for the `pipeline_status` gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineStatus {
    /// Not running.
    Stopped = 0,
    /// Transferring.
    Running = 1,
    /// Flushing the last handoff after a shutdown signal.
    Draining = 2,
    /// The last cycle failed.
    Error = 3,
}

/// Records the elapsed time when dropped.
///
/// ```rust
/// use conveyor_core::metrics::{self, Timer};
///
/// {
///     let _timer = Timer::new("events_20170101", |duration, _collection| {
///         metrics::record_chunk_write_duration(duration);
///     });
///     // ... bulk request ...
/// }
/// ```
pub struct Timer<F>
where
    F: FnOnce(Duration, &str),
{
    start: std::time::Instant,
    label: String,
    record_fn: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce(Duration, &str),
{
    /// Starts a timer.
    pub fn new(label: impl Into<String>, record_fn: F) -> Self {
        Self {
            start: std::time::Instant::now(),
            label: label.into(),
            record_fn: Some(record_fn),
        }
    }
}

impl<F> Drop for Timer<F>
where
    F: FnOnce(Duration, &str),
{
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(duration, &self.label);
        }
    }
}
