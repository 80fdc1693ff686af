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

//! Document store trait and error types.
//!
//! The [`DocumentStore`] trait is the seam between the pipeline and the system
//! records are written to: an Elasticsearch-compatible index cluster in
//! production, [`MemoryDocumentStore`] in tests.
//!
//! The pipeline relies on five primitives:
//!
//! | Operation | Purpose |
//! |---|---|
//! | [`exists`](DocumentStore::exists) | skip provisioning for known collections |
//! | [`create`](DocumentStore::create) | create a collection with the strict schema |
//! | [`bind_alias`](DocumentStore::bind_alias) | attach a human-readable name |
//! | [`bulk_write`](DocumentStore::bulk_write) | index one chunk, with per-item results |
//! | [`refresh`](DocumentStore::refresh) | make written documents visible |
//!
//! Implementations own their transport concerns: timeouts, connection pooling
//! and request-level retries all live behind this trait. The pipeline never
//! retries a chunk itself.
//!
//! # Implementing a store
//!
//! ```rust
//! use async_trait::async_trait;
//! use conveyor_core::schema::CollectionSchema;
//! use conveyor_core::store::{
//!     BulkDocument, BulkItemResult, CreateOutcome, DocumentStore, StoreError,
//! };
//!
//! struct NullStore;
//!
//! #[async_trait]
//! impl DocumentStore for NullStore {
//!     async fn exists(&self, _collection: &str) -> Result<bool, StoreError> {
//!         Ok(true)
//!     }
//!
//!     async fn create(
//!         &self,
//!         _collection: &str,
//!         _schema: &CollectionSchema,
//!     ) -> Result<CreateOutcome, StoreError> {
//!         Ok(CreateOutcome::AlreadyExists)
//!     }
//!
//!     async fn bind_alias(&self, _collection: &str, _alias: &str) -> Result<(), StoreError> {
//!         Ok(())
//!     }
//!
//!     async fn bulk_write(
//!         &self,
//!         _collection: &str,
//!         documents: Vec<BulkDocument>,
//!     ) -> Result<Vec<BulkItemResult>, StoreError> {
//!         Ok(documents
//!             .into_iter()
//!             .map(|d| BulkItemResult::accepted(d.id.unwrap_or_default()))
//!             .collect())
//!     }
//!
//!     async fn refresh(&self, _collection: &str) -> Result<(), StoreError> {
//!         Ok(())
//!     }
//! }
//! ```

mod memory;

pub use memory::MemoryDocumentStore;

use crate::schema::CollectionSchema;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a [`DocumentStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached.
    ///
    /// Retryable: connection refused, DNS failures, reset connections.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
        /// The underlying connection error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The request did not complete in time.
    #[error("Timeout: {message}")]
    Timeout {
        /// Human-readable error message
        message: String,
    },

    /// The store answered with an error.
    ///
    /// Retryable only for overload statuses (429, 502, 503, 504).
    #[error("Rejected by store: {message}")]
    Rejected {
        /// Store diagnostic, typically `type: reason`
        message: String,
        /// HTTP status, when the store speaks HTTP
        status: Option<u16>,
    },

    /// The store client is misconfigured.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message
        message: String,
        /// Configuration parameter name if applicable
        parameter: Option<String>,
    },

    /// A request or response body could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
        /// The underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Anything else.
    #[error("Store error: {message}")]
    Other {
        /// Human-readable error message
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },
}

impl StoreError {
    /// Creates a connection error from any error type.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a rejection without a status code.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a rejection carrying the HTTP status.
    #[must_use]
    pub fn rejected_with_status(message: impl Into<String>, status: u16) -> Self {
        Self::Rejected {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>, parameter: Option<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            parameter,
        }
    }

    /// Creates a serialization error from any error type.
    #[must_use]
    pub fn serialization(
        source: impl std::error::Error + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a generic error.
    #[must_use]
    pub fn other(message: impl Into<String>, retryable: bool) -> Self {
        Self::Other {
            message: message.into(),
            retryable,
        }
    }

    /// Returns whether the failed request may succeed if sent again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Rejected { status, .. } => {
                matches!(status, Some(429 | 502 | 503 | 504))
            }
            Self::Configuration { .. } | Self::Serialization { .. } => false,
            Self::Other { retryable, .. } => *retryable,
        }
    }
}

/// Result of a collection creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The collection was created by this request.
    Created,
    /// Another writer created it first.
    AlreadyExists,
}

/// One document of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    /// Document id; `None` lets the store assign one
    pub id: Option<String>,
    /// Document body
    pub source: Value,
}

impl BulkDocument {
    /// Creates a document with an explicit id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, source: Value) -> Self {
        Self {
            id: Some(id.into()),
            source,
        }
    }

    /// Creates a document whose id the store assigns.
    #[must_use]
    pub const fn store_assigned(source: Value) -> Self {
        Self { id: None, source }
    }
}

/// Per-document outcome of a bulk request, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkItemResult {
    /// The document was indexed.
    Accepted {
        /// Id the document was stored under
        id: String,
    },
    /// The document was refused.
    Rejected {
        /// Id of the refused document, when known
        id: Option<String>,
        /// Store diagnostic, typically `type: reason`
        reason: String,
    },
}

impl BulkItemResult {
    /// Creates an accepted result.
    #[must_use]
    pub fn accepted(id: impl Into<String>) -> Self {
        Self::Accepted { id: id.into() }
    }

    /// Creates a rejected result.
    #[must_use]
    pub fn rejected(id: Option<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            id,
            reason: reason.into(),
        }
    }

    /// Returns whether the document was indexed.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Metadata about a store implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMetadata {
    /// Human-readable name (e.g., "Elasticsearch")
    pub name: String,

    /// Type identifier used in logs and metric labels (e.g., "elasticsearch")
    pub store_type: String,

    /// Largest number of documents the store accepts per bulk request
    pub max_bulk_size: Option<usize>,

    /// Additional implementation-specific properties
    pub properties: HashMap<String, String>,
}

impl StoreMetadata {
    /// Creates metadata with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, store_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store_type: store_type.into(),
            max_bulk_size: None,
            properties: HashMap::new(),
        }
    }

    /// Sets the bulk size limit.
    #[must_use]
    pub const fn with_max_bulk_size(mut self, size: usize) -> Self {
        self.max_bulk_size = Some(size);
        self
    }

    /// Adds a custom property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A collection-oriented document store.
///
/// Implementations must be safe to share across tasks; every method takes
/// `&self`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns whether a collection with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot answer.
    async fn exists(&self, collection: &str) -> Result<bool, StoreError>;

    /// Creates a collection with the given schema.
    ///
    /// A concurrent creation by another writer must be reported as
    /// [`CreateOutcome::AlreadyExists`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection could not be created for any other
    /// reason.
    async fn create(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<CreateOutcome, StoreError>;

    /// Binds `alias` to `collection`. The alias may already point at other
    /// collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is refused.
    async fn bind_alias(&self, collection: &str, alias: &str) -> Result<(), StoreError>;

    /// Indexes a chunk of documents.
    ///
    /// Returns one [`BulkItemResult`] per input document, in input order. An
    /// `Err` means the request as a whole failed and nothing is known about
    /// individual documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be submitted or its response
    /// could not be read.
    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>, StoreError>;

    /// Makes every acknowledged document of `collection` visible to readers.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh was refused.
    async fn refresh(&self, collection: &str) -> Result<(), StoreError>;

    /// Returns metadata about this store.
    fn metadata(&self) -> StoreMetadata {
        StoreMetadata::new("Unknown", "unknown")
    }
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
        (**self).exists(collection).await
    }

    async fn create(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<CreateOutcome, StoreError> {
        (**self).create(collection, schema).await
    }

    async fn bind_alias(&self, collection: &str, alias: &str) -> Result<(), StoreError> {
        (**self).bind_alias(collection, alias).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>, StoreError> {
        (**self).bulk_write(collection, documents).await
    }

    async fn refresh(&self, collection: &str) -> Result<(), StoreError> {
        (**self).refresh(collection).await
    }

    fn metadata(&self) -> StoreMetadata {
        (**self).metadata()
    }
}
