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

//! Transfer configuration.
//!
//! ```rust
//! use conveyor_core::config::TransferConfig;
//! use conveyor_core::router::{Granularity, RoutingStrategy};
//! use std::time::Duration;
//!
//! let config = TransferConfig::builder()
//!     .routing(RoutingStrategy::time_bucketed("events", Granularity::Day))
//!     .chunk_size(500)
//!     .delay(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//!
//! assert!(config.keep_alive);
//! ```

use crate::error::ConfigError;
use crate::router::RoutingStrategy;
use crate::writer::{DocumentIdPolicy, DEFAULT_CHUNK_SIZE};
use std::time::Duration;

/// Default pause after a drain that returned nothing.
pub const DEFAULT_IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration of a transfer coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// How records are assigned to collections
    pub routing: RoutingStrategy,

    /// How document ids are chosen
    pub id_policy: DocumentIdPolicy,

    /// Documents per bulk request
    pub chunk_size: usize,

    /// Keep draining after the first cycle
    pub keep_alive: bool,

    /// Pause between drains in keep-alive mode
    pub delay: Duration,

    /// Minimum pause after an empty drain in keep-alive mode
    pub idle_poll_interval: Duration,
}

impl TransferConfig {
    /// Creates a new builder for `TransferConfig`.
    #[must_use]
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            routing: RoutingStrategy::default(),
            id_policy: DocumentIdPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            keep_alive: true,
            delay: Duration::ZERO,
            idle_poll_interval: DEFAULT_IDLE_POLL_INTERVAL,
        }
    }
}

/// Builder for [`TransferConfig`].
#[derive(Debug, Default)]
pub struct TransferConfigBuilder {
    routing: Option<RoutingStrategy>,
    id_policy: Option<DocumentIdPolicy>,
    chunk_size: Option<usize>,
    keep_alive: Option<bool>,
    delay: Option<Duration>,
    idle_poll_interval: Option<Duration>,
}

impl TransferConfigBuilder {
    /// Sets the routing strategy. Default: attribute-keyed.
    #[must_use]
    pub fn routing(mut self, routing: RoutingStrategy) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Sets the document id policy. Default: the `uuid` field.
    #[must_use]
    pub fn id_policy(mut self, policy: DocumentIdPolicy) -> Self {
        self.id_policy = Some(policy);
        self
    }

    /// Sets the number of documents per bulk request. Default: 100.
    #[must_use]
    pub const fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Keeps draining after the first cycle. Default: `true`.
    #[must_use]
    pub const fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Sets the pause between drains. Default: none.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the minimum pause after an empty drain. Default: one second.
    #[must_use]
    pub const fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = Some(interval);
        self
    }

    /// Builds the `TransferConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the chunk size is zero, the routing strategy
    /// has an empty name, or the id policy names no field.
    pub fn build(self) -> Result<TransferConfig, ConfigError> {
        let defaults = TransferConfig::default();

        let chunk_size = self.chunk_size.unwrap_or(defaults.chunk_size);
        if chunk_size == 0 {
            return Err(ConfigError::new("chunk_size", "must be greater than zero"));
        }

        let routing = self.routing.unwrap_or(defaults.routing);
        routing.validate()?;

        let id_policy = self.id_policy.unwrap_or(defaults.id_policy);
        match &id_policy {
            DocumentIdPolicy::Field(field) if field.is_empty() => {
                return Err(ConfigError::new("id_policy", "field name must not be empty"));
            }
            DocumentIdPolicy::Identity(fields) if fields.is_empty() => {
                return Err(ConfigError::new(
                    "id_policy",
                    "identity policy needs at least one field",
                ));
            }
            _ => {}
        }

        Ok(TransferConfig {
            routing,
            id_policy,
            chunk_size,
            keep_alive: self.keep_alive.unwrap_or(defaults.keep_alive),
            delay: self.delay.unwrap_or(defaults.delay),
            idle_poll_interval: self
                .idle_poll_interval
                .unwrap_or(defaults.idle_poll_interval),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Granularity;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::builder().build().unwrap();

        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.routing, RoutingStrategy::AttributeKeyed);
        assert_eq!(config.id_policy, DocumentIdPolicy::Field("uuid".to_string()));
        assert!(config.keep_alive);
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.idle_poll_interval, Duration::from_secs(1));
        assert_eq!(config, TransferConfig::default());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = TransferConfig::builder().chunk_size(0).build().unwrap_err();
        assert_eq!(err.parameter, "chunk_size");
    }

    #[test]
    fn test_invalid_routing_rejected() {
        let err = TransferConfig::builder()
            .routing(RoutingStrategy::time_bucketed("", Granularity::Hour))
            .build()
            .unwrap_err();
        assert_eq!(err.parameter, "routing.base");
    }

    #[test]
    fn test_invalid_id_policy_rejected() {
        assert!(TransferConfig::builder()
            .id_policy(DocumentIdPolicy::Identity(vec![]))
            .build()
            .is_err());
        assert!(TransferConfig::builder()
            .id_policy(DocumentIdPolicy::Field(String::new()))
            .build()
            .is_err());
    }

    #[test]
    fn test_overrides() {
        let config = TransferConfig::builder()
            .keep_alive(false)
            .delay(Duration::from_secs(2))
            .idle_poll_interval(Duration::from_millis(50))
            .id_policy(DocumentIdPolicy::StoreAssigned)
            .build()
            .unwrap();

        assert!(!config.keep_alive);
        assert_eq!(config.delay, Duration::from_secs(2));
        assert_eq!(config.idle_poll_interval, Duration::from_millis(50));
        assert_eq!(config.id_policy, DocumentIdPolicy::StoreAssigned);
    }
}
