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

//! Idempotent collection provisioning.
//!
//! [`Provisioner::ensure`] makes sure a target collection exists before any
//! document is written to it:
//!
//! 1. If the collection exists, nothing else happens.
//! 2. Otherwise it is created with the target's schema. Losing a creation
//!    race to another writer counts as success.
//! 3. If this call created the collection and the target has an alias, the
//!    alias is bound. A binding failure is reported but never undoes the
//!    creation; the collection stays writable under its own name.

use crate::error::ProvisioningError;
use crate::metrics;
use crate::router::CollectionTarget;
use crate::store::{CreateOutcome, DocumentStore};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Outcome of [`Provisioner::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The collection was created by this call.
    Created,
    /// The collection already existed, or another writer created it first.
    Existing,
}

/// Creates collections and binds their aliases.
#[derive(Debug)]
pub struct Provisioner<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> Clone for Provisioner<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore> Provisioner<S> {
    /// Creates a provisioner over a shared store handle.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Ensures `target` exists, creating it and binding its alias if needed.
    ///
    /// Calling this twice for the same target never fails the second time
    /// because of the first.
    ///
    /// # Errors
    ///
    /// - [`ProvisioningError::Creation`] if the existence check or the creation
    ///   fails. The collection must not be written to.
    /// - [`ProvisioningError::AliasBinding`] if the collection was created but
    ///   the alias could not be bound. The collection is usable.
    #[instrument(skip(self, target), fields(collection = %target.name))]
    pub async fn ensure(&self, target: &CollectionTarget) -> Result<Provisioned, ProvisioningError> {
        let exists = self
            .store
            .exists(&target.name)
            .await
            .map_err(|source| ProvisioningError::Creation {
                collection: target.name.clone(),
                source,
            })?;

        if exists {
            debug!("Collection already exists");
            return Ok(Provisioned::Existing);
        }

        let outcome = self
            .store
            .create(&target.name, &target.schema)
            .await
            .map_err(|source| ProvisioningError::Creation {
                collection: target.name.clone(),
                source,
            })?;

        if outcome == CreateOutcome::AlreadyExists {
            debug!("Collection created concurrently by another writer");
            return Ok(Provisioned::Existing);
        }

        metrics::increment_collections_provisioned();
        info!(schema = %target.schema.variant(), "Created collection");

        if let Some(alias) = &target.alias {
            self.store
                .bind_alias(&target.name, alias)
                .await
                .map_err(|source| ProvisioningError::AliasBinding {
                    collection: target.name.clone(),
                    alias: alias.clone(),
                    source,
                })?;
            info!(alias = %alias, "Bound alias");
        }

        Ok(Provisioned::Created)
    }
}
