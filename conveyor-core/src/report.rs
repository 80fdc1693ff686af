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

//! Cycle reports and running statistics.

use crate::error::{ErrorKind, TransferError};
use crate::provisioner::Provisioned;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Outcome of one collection within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    /// Collection name
    pub name: String,
    /// Records routed to the collection
    pub attempted: usize,
    /// Documents acknowledged by the store
    pub written: usize,
    /// Provisioning outcome; `None` when the collection was already cached or
    /// provisioning failed
    pub provisioned: Option<Provisioned>,
}

/// Aggregate outcome of one Reading, Routing, Writing cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// One-based cycle number
    pub cycle: u64,
    /// Records taken from the queue
    pub records_read: usize,
    /// Records rejected during routing
    pub records_rejected: usize,
    /// Per-collection outcomes, in first-arrival order
    pub collections: Vec<CollectionReport>,
    /// Every failure of the cycle, in occurrence order
    pub errors: Vec<TransferError>,
    /// Wall-clock duration
    pub duration: Duration,
}

impl CycleReport {
    /// Returns whether the cycle had no failure at all.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records routed to some collection.
    #[must_use]
    pub fn total_attempted(&self) -> usize {
        self.collections.iter().map(|c| c.attempted).sum()
    }

    /// Documents acknowledged across all collections.
    #[must_use]
    pub fn total_written(&self) -> usize {
        self.collections.iter().map(|c| c.written).sum()
    }

    /// Records read in this cycle but not durably written.
    #[must_use]
    pub fn unwritten(&self) -> usize {
        self.records_read.saturating_sub(self.total_written())
    }

    /// Returns the collection report for `name`.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Returns the first error of each kind.
    #[must_use]
    pub fn first_error_per_kind(&self) -> BTreeMap<ErrorKind, &TransferError> {
        let mut first = BTreeMap::new();
        for error in &self.errors {
            first.entry(error.kind()).or_insert(error);
        }
        first
    }

    /// Counts errors by kind.
    #[must_use]
    pub fn error_counts(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for error in &self.errors {
            *counts.entry(error.kind()).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: read {}, wrote {} to {} collection(s)",
            self.cycle,
            self.records_read,
            self.total_written(),
            self.collections.len()
        )?;
        if self.records_rejected > 0 {
            write!(f, ", {} rejected", self.records_rejected)?;
        }
        write!(f, " in {:.3}s", self.duration.as_secs_f64())?;

        for collection in &self.collections {
            write!(
                f,
                "\n  {}: {}/{} written",
                collection.name, collection.written, collection.attempted
            )?;
        }

        let counts = self.error_counts();
        for (kind, error) in self.first_error_per_kind() {
            let count = counts.get(&kind).copied().unwrap_or(1);
            write!(f, "\n  {kind} ({count}): {error}")?;
        }

        Ok(())
    }
}

/// Counters accumulated over the lifetime of a coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Cycles run
    pub cycles: u64,
    /// Cycles that reported at least one failure
    pub failed_cycles: u64,
    /// Records taken from the queue
    pub records_read: u64,
    /// Documents acknowledged by the store
    pub records_written: u64,
    /// Records rejected during routing
    pub records_rejected: u64,
    /// Bulk requests submitted
    pub chunk_writes: u64,
    /// Collections created by this process
    pub collections_provisioned: u64,
    /// Failures of any kind
    pub failures: u64,
}

impl TransferStats {
    pub(crate) fn absorb(&mut self, report: &CycleReport, chunk_writes: u64) {
        self.cycles += 1;
        if !report.is_success() {
            self.failed_cycles += 1;
        }
        self.records_read += report.records_read as u64;
        self.records_written += report.total_written() as u64;
        self.records_rejected += report.records_rejected as u64;
        self.chunk_writes += chunk_writes;
        self.collections_provisioned += report
            .collections
            .iter()
            .filter(|c| c.provisioned == Some(Provisioned::Created))
            .count() as u64;
        self.failures += report.errors.len() as u64;
    }
}

/// Final outcome of [`TransferCoordinator::run`](crate::coordinator::TransferCoordinator::run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Statistics at the time the run ended
    pub stats: TransferStats,
    /// Records that were taken from the queue during the final drain but not
    /// durably written
    pub unflushed: usize,
}
