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

//! Error taxonomy for the transfer pipeline.
//!
//! Each stage of a cycle has its own error type so the coordinator can decide
//! how far a failure reaches:
//!
//! | Error | Scope of the failure |
//! |---|---|
//! | [`InvalidComponentError`] | caller error, never retried |
//! | [`RoutingError`] | one record is rejected, the batch continues |
//! | [`ProvisioningError`] | the partition of one collection is not written |
//! | [`WriteError`] | remaining chunks of one partition are skipped |
//! | [`QueueError`] | the whole cycle is aborted |
//!
//! [`TransferError`] wraps all of them for aggregation in a
//! [`CycleReport`](crate::report::CycleReport).

use crate::report::CycleReport;
use crate::store::StoreError;
use std::fmt;

/// An identity component was empty, missing or not text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidComponentError {
    /// No components were given at all.
    #[error("identity requires at least one component")]
    NoComponents,

    /// A component was the empty string.
    #[error("identity component #{position} is empty")]
    Empty {
        /// Zero-based position of the offending component
        position: usize,
    },

    /// A component was not a string value.
    #[error("identity component #{position} is not a string: {value}")]
    NotText {
        /// Zero-based position of the offending component
        position: usize,
        /// Rendering of the rejected value
        value: String,
    },
}

/// A record could not be assigned to a collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// A routing attribute is absent or empty.
    #[error("record is missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Name of the missing attribute
        attribute: &'static str,
    },

    /// The queue payload could not be decoded into a record.
    #[error("malformed record: {reason}")]
    Malformed {
        /// Decoder diagnostic
        reason: String,
    },

    /// The attribute-keyed identity could not be computed.
    #[error("cannot derive collection key: {0}")]
    Identity(#[from] InvalidComponentError),
}

/// A collection or its alias could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// The existence check or the creation failed for a reason other than
    /// "already exists". Nothing may be written to the collection.
    #[error("collection '{collection}' could not be created: {source}")]
    Creation {
        /// Collection name
        collection: String,
        /// Store diagnostic
        #[source]
        source: StoreError,
    },

    /// The collection exists but the alias could not be bound to it.
    #[error("alias '{alias}' could not be bound to collection '{collection}': {source}")]
    AliasBinding {
        /// Collection name
        collection: String,
        /// Alias name
        alias: String,
        /// Store diagnostic
        #[source]
        source: StoreError,
    },
}

impl ProvisioningError {
    /// Returns whether the collection can still be written to directly by name.
    #[must_use]
    pub const fn collection_usable(&self) -> bool {
        matches!(self, Self::AliasBinding { .. })
    }

    /// Returns the collection this error refers to.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Creation { collection, .. } | Self::AliasBinding { collection, .. } => {
                collection
            }
        }
    }
}

/// Documents could not be written to a collection.
///
/// `written` is the number of documents the store acknowledged before the
/// failure; those stay committed.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// One or more documents of a chunk were rejected by the store.
    #[error("chunk {chunk} of '{collection}' had {rejected} rejected document(s), first: {diagnostic}")]
    Rejected {
        /// Collection name
        collection: String,
        /// One-based chunk number
        chunk: usize,
        /// Number of rejected documents in the chunk
        rejected: usize,
        /// First rejection's diagnostic
        diagnostic: String,
        /// Documents acknowledged before the failure
        written: usize,
    },

    /// The bulk request itself failed.
    #[error("chunk {chunk} of '{collection}' could not be submitted: {source}")]
    Request {
        /// Collection name
        collection: String,
        /// One-based chunk number
        chunk: usize,
        /// Store diagnostic
        #[source]
        source: StoreError,
        /// Documents acknowledged before the failure
        written: usize,
    },

    /// A record lacks the field configured as document identifier.
    #[error("record for '{collection}' has no usable id field '{field}'")]
    MissingId {
        /// Collection name
        collection: String,
        /// Configured id field
        field: String,
        /// Documents acknowledged before the failure
        written: usize,
    },

    /// The document identifier could not be derived.
    #[error("document id for '{collection}' could not be derived: {source}")]
    InvalidId {
        /// Collection name
        collection: String,
        /// Identity diagnostic
        #[source]
        source: InvalidComponentError,
        /// Documents acknowledged before the failure
        written: usize,
    },

    /// Written documents could not be made visible.
    #[error("collection '{collection}' could not be refreshed: {source}")]
    Refresh {
        /// Collection name
        collection: String,
        /// Store diagnostic
        #[source]
        source: StoreError,
        /// Documents acknowledged before the failure
        written: usize,
    },
}

impl WriteError {
    /// Returns the number of documents acknowledged before the failure.
    #[must_use]
    pub const fn written(&self) -> usize {
        match self {
            Self::Rejected { written, .. }
            | Self::Request { written, .. }
            | Self::MissingId { written, .. }
            | Self::InvalidId { written, .. }
            | Self::Refresh { written, .. } => *written,
        }
    }
}

/// The queue could not be read or trimmed.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No connection to the queue could be established.
    #[error("queue connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
    },

    /// The read+trim transaction failed.
    ///
    /// `records_at_risk` is the number of records that may have been trimmed
    /// without being delivered, when known.
    #[error("queue transaction error: {message}")]
    Transaction {
        /// Human-readable error message
        message: String,
        /// Records that may be lost or redelivered
        records_at_risk: Option<usize>,
    },

    /// A record could not be encoded for the queue.
    #[error("queue serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// The queue has been closed.
    #[error("queue is closed")]
    Closed,
}

impl QueueError {
    /// Records that may have been lost or will be redelivered, if known.
    #[must_use]
    pub const fn records_at_risk(&self) -> Option<usize> {
        match self {
            Self::Transaction {
                records_at_risk, ..
            } => *records_at_risk,
            _ => None,
        }
    }
}

/// A configuration value failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration for '{parameter}': {message}")]
pub struct ConfigError {
    /// Name of the offending parameter
    pub parameter: String,
    /// What is wrong with it
    pub message: String,
}

impl ConfigError {
    /// Creates a configuration error.
    #[must_use]
    pub fn new(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Failure category, used for cycle summaries and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// [`InvalidComponentError`]
    InvalidComponent,
    /// [`RoutingError`]
    Routing,
    /// [`ProvisioningError`]
    Provisioning,
    /// [`WriteError`]
    Write,
    /// [`QueueError`]
    Queue,
}

impl ErrorKind {
    /// Returns the kind as a static label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidComponent => "invalid_component",
            Self::Routing => "routing",
            Self::Provisioning => "provisioning",
            Self::Write => "write",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any error raised during a transfer cycle.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Identity input error
    #[error(transparent)]
    InvalidComponent(#[from] InvalidComponentError),

    /// Record rejected during routing
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Collection setup failed
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// Bulk write failed
    #[error(transparent)]
    Write(#[from] WriteError),

    /// Queue read failed
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl TransferError {
    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidComponent(_) => ErrorKind::InvalidComponent,
            Self::Routing(_) => ErrorKind::Routing,
            Self::Provisioning(_) => ErrorKind::Provisioning,
            Self::Write(_) => ErrorKind::Write,
            Self::Queue(_) => ErrorKind::Queue,
        }
    }
}

/// A cycle finished with at least one failure.
///
/// Carries the full report so callers can see what was written despite the
/// failures.
#[derive(Debug, thiserror::Error)]
#[error("transfer cycle {} finished with {} error(s)", .report.cycle, .report.errors.len())]
pub struct CycleError {
    /// Aggregate report of the failed cycle
    pub report: CycleReport,
}

/// Errors that stop the coordinator itself rather than a single cycle.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The reader task panicked or was cancelled.
    #[error("queue reader task failed: {0}")]
    Reader(String),
}
