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

//! Chunked bulk writing.
//!
//! [`BulkWriter::write`] submits the records of one collection in chunks of
//! `chunk_size`. Writing N records therefore takes `ceil(N / chunk_size)` bulk
//! requests.
//!
//! The first failure stops the write:
//!
//! - chunks already acknowledged stay committed,
//! - accepted documents of the failing chunk stay committed and are counted,
//! - later chunks are never submitted,
//! - nothing is retried here; request-level retries belong to the store.
//!
//! The collection is refreshed once at the end whether the write succeeded or
//! not, so whatever was acknowledged becomes visible.

use crate::error::{InvalidComponentError, WriteError};
use crate::identity::identity_from_values;
use crate::metrics::{self, Timer};
use crate::record::{Record, UUID};
use crate::store::{BulkDocument, BulkItemResult, DocumentStore};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Default number of documents per bulk request.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// How the store id of each document is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentIdPolicy {
    /// The store assigns ids. Redelivered records are duplicated.
    StoreAssigned,

    /// The id is the value of a top-level field (string or number).
    Field(String),

    /// The id is the identity of the listed top-level string fields.
    Identity(Vec<String>),
}

impl Default for DocumentIdPolicy {
    fn default() -> Self {
        Self::Field(UUID.to_string())
    }
}

impl DocumentIdPolicy {
    fn document_id(&self, record: &Record) -> Result<Option<String>, IdFailure> {
        match self {
            Self::StoreAssigned => Ok(None),
            Self::Field(field) => match record.get(field) {
                Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
                Some(Value::Number(n)) => Ok(Some(n.to_string())),
                _ => Err(IdFailure::Missing(field.clone())),
            },
            Self::Identity(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    let value = record
                        .get(field)
                        .ok_or_else(|| IdFailure::Missing(field.clone()))?;
                    values.push(value);
                }
                identity_from_values(&values)
                    .map(Some)
                    .map_err(IdFailure::Invalid)
            }
        }
    }
}

enum IdFailure {
    Missing(String),
    Invalid(InvalidComponentError),
}

impl IdFailure {
    fn into_error(self, collection: &str, written: usize) -> WriteError {
        match self {
            Self::Missing(field) => WriteError::MissingId {
                collection: collection.to_string(),
                field,
                written,
            },
            Self::Invalid(source) => WriteError::InvalidId {
                collection: collection.to_string(),
                source,
                written,
            },
        }
    }
}

/// Writes records to one collection in chunks.
#[derive(Debug)]
pub struct BulkWriter<S: DocumentStore> {
    store: Arc<S>,
    chunk_size: usize,
    chunks_submitted: Arc<AtomicU64>,
}

impl<S: DocumentStore> Clone for BulkWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            chunk_size: self.chunk_size,
            chunks_submitted: Arc::clone(&self.chunks_submitted),
        }
    }
}

impl<S: DocumentStore> BulkWriter<S> {
    /// Creates a writer. A `chunk_size` of zero is raised to one;
    /// [`TransferConfig`](crate::config::TransferConfig) rejects it earlier.
    #[must_use]
    pub fn new(store: Arc<S>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            chunks_submitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the number of bulk requests submitted so far, failed ones
    /// included.
    #[must_use]
    pub fn chunks_submitted(&self) -> u64 {
        self.chunks_submitted.load(Ordering::Relaxed)
    }

    /// Writes `records` to `collection` and refreshes it.
    ///
    /// Returns the number of documents the store acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] on the first request failure, per-document
    /// rejection or id derivation failure, or if the final refresh fails after
    /// every chunk succeeded. [`WriteError::written`] holds the number of
    /// documents acknowledged before the failure.
    #[instrument(skip(self, records, id_policy), fields(collection = %collection, records = records.len()))]
    pub async fn write(
        &self,
        collection: &str,
        records: Vec<Record>,
        id_policy: &DocumentIdPolicy,
    ) -> Result<usize, WriteError> {
        if records.is_empty() {
            return Ok(0);
        }

        let outcome = self.write_chunks(collection, records, id_policy).await;

        match (outcome, self.store.refresh(collection).await) {
            (Ok(written), Ok(())) => {
                debug!(written, "Collection refreshed");
                Ok(written)
            }
            (Ok(written), Err(source)) => Err(WriteError::Refresh {
                collection: collection.to_string(),
                source,
                written,
            }),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(refresh_error)) => {
                warn!(
                    error = %refresh_error,
                    written = e.written(),
                    "Refresh after failed write also failed"
                );
                Err(e)
            }
        }
    }

    async fn write_chunks(
        &self,
        collection: &str,
        records: Vec<Record>,
        id_policy: &DocumentIdPolicy,
    ) -> Result<usize, WriteError> {
        let mut written = 0usize;
        let mut records = records.into_iter().peekable();
        let mut chunk_no = 0usize;

        while records.peek().is_some() {
            chunk_no += 1;

            let mut documents = Vec::with_capacity(self.chunk_size);
            for record in records.by_ref().take(self.chunk_size) {
                let id = id_policy
                    .document_id(&record)
                    .map_err(|f| f.into_error(collection, written))?;
                documents.push(BulkDocument {
                    id,
                    source: record.into_source(),
                });
            }
            let submitted = documents.len();
            self.chunks_submitted.fetch_add(1, Ordering::Relaxed);

            let results = {
                let _timer = Timer::new(collection, |duration, _| {
                    metrics::record_chunk_write_duration(duration);
                });
                self.store.bulk_write(collection, documents).await
            }
            .map_err(|source| WriteError::Request {
                collection: collection.to_string(),
                chunk: chunk_no,
                source,
                written,
            })?;

            let mut accepted = 0usize;
            let mut rejected = 0usize;
            let mut first_rejection = None;
            for result in results {
                match result {
                    BulkItemResult::Accepted { .. } => accepted += 1,
                    BulkItemResult::Rejected { id, reason } => {
                        rejected += 1;
                        if first_rejection.is_none() {
                            first_rejection = Some(match id {
                                Some(id) => format!("[{id}] {reason}"),
                                None => reason,
                            });
                        }
                    }
                }
            }

            written += accepted;
            metrics::increment_records_written_by(accepted as u64, collection);

            if let Some(diagnostic) = first_rejection {
                return Err(WriteError::Rejected {
                    collection: collection.to_string(),
                    chunk: chunk_no,
                    rejected,
                    diagnostic,
                    written,
                });
            }

            metrics::increment_chunks_written();
            debug!(chunk = chunk_no, documents = submitted, written, "Chunk written");
        }

        Ok(written)
    }
}
