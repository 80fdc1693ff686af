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

//! In-memory document store.
//!
//! Enforces the collection schema the same way a strict index would, which
//! makes it suitable for exercising partial-failure paths without a cluster.
//! Failures can be injected per operation.

use super::{BulkDocument, BulkItemResult, CreateOutcome, DocumentStore, StoreError, StoreMetadata};
use crate::schema::CollectionSchema;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Collection {
    schema: CollectionSchema,
    ids: HashMap<String, usize>,
    documents: Vec<(String, Value)>,
    refreshed: usize,
}

#[derive(Debug, Default)]
struct Failures {
    create: HashSet<String>,
    create_race: HashSet<String>,
    alias: HashSet<String>,
    refresh: bool,
    bulk_request_on_call: Option<usize>,
    reject_ids: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    aliases: HashMap<String, BTreeSet<String>>,
    failures: Failures,
    next_auto_id: u64,
    exists_calls: usize,
    create_calls: usize,
    bulk_calls: usize,
    refresh_calls: usize,
    chunk_sizes: Vec<usize>,
}

/// Schema-enforcing document store kept in memory.
///
/// Clones share the same state, so a test can keep one handle for inspection
/// while the pipeline owns another.
///
/// # Examples
///
/// ```rust
/// use conveyor_core::schema::CollectionSchema;
/// use conveyor_core::store::{BulkDocument, DocumentStore, MemoryDocumentStore};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryDocumentStore::new();
/// store.create("items", &CollectionSchema::items()).await?;
///
/// let results = store
///     .bulk_write("items", vec![BulkDocument::with_id("1", json!({ "tag": "a" }))])
///     .await?;
///
/// assert!(results[0].is_accepted());
/// assert_eq!(store.document_count("items").await, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-creates a collection, as if another process had provisioned it.
    #[must_use]
    pub fn with_existing_collection(self, name: &str, schema: CollectionSchema) -> Self {
        if let Ok(mut inner) = self.inner.try_write() {
            inner.collections.insert(
                name.to_string(),
                Collection {
                    schema,
                    ..Collection::default()
                },
            );
        }
        self
    }

    /// Makes `create` fail for this collection.
    #[must_use]
    pub fn with_create_failure(self, name: &str) -> Self {
        self.configure(|f| {
            f.create.insert(name.to_string());
        })
    }

    /// Makes `create` report `AlreadyExists` for this collection although
    /// `exists` answered `false`, as when another writer wins the race.
    #[must_use]
    pub fn with_create_race(self, name: &str) -> Self {
        self.configure(|f| {
            f.create_race.insert(name.to_string());
        })
    }

    /// Makes alias binding fail for this alias.
    #[must_use]
    pub fn with_alias_failure(self, alias: &str) -> Self {
        self.configure(|f| {
            f.alias.insert(alias.to_string());
        })
    }

    /// Makes every refresh fail.
    #[must_use]
    pub fn with_refresh_failure(self) -> Self {
        self.configure(|f| f.refresh = true)
    }

    /// Makes the n-th `bulk_write` call (one-based) fail as a whole.
    #[must_use]
    pub fn with_bulk_request_failure_on_call(self, call: usize) -> Self {
        self.configure(|f| f.bulk_request_on_call = Some(call))
    }

    /// Rejects the document with this id on every bulk write.
    #[must_use]
    pub fn with_rejected_id(self, id: &str) -> Self {
        self.configure(|f| {
            f.reject_ids.insert(id.to_string());
        })
    }

    fn configure(self, apply: impl FnOnce(&mut Failures)) -> Self {
        if let Ok(mut inner) = self.inner.try_write() {
            apply(&mut inner.failures);
        }
        self
    }

    /// Returns the names of all collections, sorted.
    pub async fn collections(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<_> = inner.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the schema a collection was created with.
    pub async fn schema_of(&self, collection: &str) -> Option<CollectionSchema> {
        self.inner
            .read()
            .await
            .collections
            .get(collection)
            .map(|c| c.schema)
    }

    /// Returns the collections an alias points at, sorted.
    pub async fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .aliases
            .get(alias)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of aliases.
    pub async fn alias_count(&self) -> usize {
        self.inner.read().await.aliases.len()
    }

    /// Returns the number of documents stored in a collection.
    pub async fn document_count(&self, collection: &str) -> usize {
        self.inner
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }

    /// Returns the number of documents visible to readers, i.e. stored before
    /// the last refresh.
    pub async fn visible_count(&self, collection: &str) -> usize {
        self.inner
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, |c| c.refreshed)
    }

    /// Returns the total number of documents across all collections.
    pub async fn total_documents(&self) -> usize {
        self.inner
            .read()
            .await
            .collections
            .values()
            .map(|c| c.documents.len())
            .sum()
    }

    /// Returns a stored document by id.
    pub async fn document(&self, collection: &str, id: &str) -> Option<Value> {
        let inner = self.inner.read().await;
        let c = inner.collections.get(collection)?;
        c.ids.get(id).map(|&i| c.documents[i].1.clone())
    }

    /// Returns the ids of a collection in write order.
    pub async fn ids(&self, collection: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .collections
            .get(collection)
            .map(|c| c.documents.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the number of `exists` calls.
    pub async fn exists_calls(&self) -> usize {
        self.inner.read().await.exists_calls
    }

    /// Returns the number of `create` calls.
    pub async fn create_calls(&self) -> usize {
        self.inner.read().await.create_calls
    }

    /// Returns the number of `bulk_write` calls.
    pub async fn bulk_calls(&self) -> usize {
        self.inner.read().await.bulk_calls
    }

    /// Returns the number of `refresh` calls.
    pub async fn refresh_calls(&self) -> usize {
        self.inner.read().await.refresh_calls
    }

    /// Returns the size of every chunk received, in call order.
    pub async fn chunk_sizes(&self) -> Vec<usize> {
        self.inner.read().await.chunk_sizes.clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        inner.exists_calls += 1;
        Ok(inner.collections.contains_key(collection))
    }

    async fn create(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<CreateOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        inner.create_calls += 1;

        if inner.failures.create.contains(collection) {
            return Err(StoreError::rejected_with_status(
                format!("simulated creation failure for [{collection}]"),
                500,
            ));
        }

        if inner.failures.create_race.remove(collection) {
            inner.collections.insert(
                collection.to_string(),
                Collection {
                    schema: *schema,
                    ..Collection::default()
                },
            );
            return Ok(CreateOutcome::AlreadyExists);
        }

        if inner.collections.contains_key(collection) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        inner.collections.insert(
            collection.to_string(),
            Collection {
                schema: *schema,
                ..Collection::default()
            },
        );
        debug!(collection = %collection, schema = %schema.variant(), "Created collection");
        Ok(CreateOutcome::Created)
    }

    async fn bind_alias(&self, collection: &str, alias: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if inner.failures.alias.contains(alias) {
            return Err(StoreError::rejected_with_status(
                format!("simulated alias failure for [{alias}]"),
                400,
            ));
        }
        if !inner.collections.contains_key(collection) {
            return Err(StoreError::rejected_with_status(
                format!("index_not_found_exception: no such index [{collection}]"),
                404,
            ));
        }

        inner
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(collection.to_string());
        Ok(())
    }

    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>, StoreError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        inner.bulk_calls += 1;
        inner.chunk_sizes.push(documents.len());

        if inner.failures.bulk_request_on_call == Some(inner.bulk_calls) {
            return Err(StoreError::connection_msg(format!(
                "simulated request failure on bulk call {}",
                inner.bulk_calls
            )));
        }

        let Some(target) = inner.collections.get_mut(collection) else {
            return Err(StoreError::rejected_with_status(
                format!("index_not_found_exception: no such index [{collection}]"),
                404,
            ));
        };

        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            if let Some(id) = &document.id {
                if inner.failures.reject_ids.contains(id) {
                    results.push(BulkItemResult::rejected(
                        Some(id.clone()),
                        format!("simulated rejection of [{id}]"),
                    ));
                    continue;
                }
            }

            if let Err(reason) = target.schema.check_document(&document.source) {
                results.push(BulkItemResult::rejected(document.id, reason));
                continue;
            }

            let id = document.id.unwrap_or_else(|| {
                inner.next_auto_id += 1;
                format!("auto-{}", inner.next_auto_id)
            });

            let mut source = document.source;
            if target.schema.excludes_data_from_source() {
                if let Value::Object(fields) = &mut source {
                    fields.remove("data");
                }
            }

            match target.ids.get(&id) {
                Some(&position) => target.documents[position].1 = source,
                None => {
                    target.ids.insert(id.clone(), target.documents.len());
                    target.documents.push((id.clone(), source));
                }
            }
            trace!(collection = %collection, id = %id, "Indexed document");
            results.push(BulkItemResult::accepted(id));
        }

        Ok(results)
    }

    async fn refresh(&self, collection: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.refresh_calls += 1;

        if inner.failures.refresh {
            return Err(StoreError::timeout(format!(
                "simulated refresh timeout for [{collection}]"
            )));
        }

        let Some(target) = inner.collections.get_mut(collection) else {
            return Err(StoreError::rejected_with_status(
                format!("index_not_found_exception: no such index [{collection}]"),
                404,
            ));
        };
        target.refreshed = target.documents.len();
        Ok(())
    }

    fn metadata(&self) -> StoreMetadata {
        StoreMetadata::new("MemoryDocumentStore", "memory").with_property("dynamic", "strict")
    }
}
