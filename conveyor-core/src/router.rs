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

//! Collection routing.
//!
//! The router decides which collection a record belongs to. Exactly one
//! [`RoutingStrategy`] is active per pipeline:
//!
//! - **Attribute-keyed**: one collection per producer and source. The name is
//!   the identity of `(backend_name, category, backend_version, origin)` and the
//!   alias `{backend_name}_{category}_{backend_version}` groups every source of
//!   one producer version.
//!
//!   Example: `git`/`commit`/`0.12.0`/`https://example.com/repo.git` lands in a
//!   40-character hex collection aliased `git_commit_0.12.0`.
//!
//! - **Time-bucketed**: one collection per wall-clock bucket, named
//!   `{base}_{bucket}` and aliased `{base}`.
//!
//!   | Granularity | Bucket format | Example |
//!   |---|---|---|
//!   | minute | `%Y%m%d_%Hh%Mm` | `events_20170101_23h59m` |
//!   | hour | `%Y%m%d_%Hh` | `events_20170101_23h` |
//!   | day | `%Y%m%d` | `events_20170101` |
//!   | month | `%Y%m` | `events_201701` |
//!
//!   The bucket comes from the current UTC time, not from the record, so two
//!   records of one batch can land in different buckets.
//!
//! - **Fixed**: every record goes to one named collection with no alias.
//!
//! Routing performs no I/O.

use crate::error::{ConfigError, RoutingError};
use crate::identity::identity;
use crate::record::{Record, BACKEND_NAME, BACKEND_VERSION, CATEGORY, ORIGIN};
use crate::schema::CollectionSchema;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Default base name for time-bucketed collections.
pub const DEFAULT_BASE_NAME: &str = "events";

/// Default name of the fixed lookup collection.
pub const DEFAULT_LOOKUPS_NAME: &str = "lookups";

/// Size of a time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// One collection per minute.
    Minute,
    /// One collection per hour.
    Hour,
    /// One collection per day.
    #[default]
    Day,
    /// One collection per month.
    Month,
}

impl Granularity {
    /// Returns the `strftime` format of the bucket suffix.
    #[must_use]
    pub const fn format(&self) -> &'static str {
        match self {
            Self::Minute => "%Y%m%d_%Hh%Mm",
            Self::Hour => "%Y%m%d_%Hh",
            Self::Day => "%Y%m%d",
            Self::Month => "%Y%m",
        }
    }

    /// Returns the granularity as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            other => Err(ConfigError::new(
                "granularity",
                format!("unknown granularity '{other}', expected minute, hour, day or month"),
            )),
        }
    }
}

/// How records are assigned to collections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoutingStrategy {
    /// One collection per `(backend_name, category, backend_version, origin)`.
    #[default]
    AttributeKeyed,

    /// One collection per time bucket.
    TimeBucketed {
        /// Collection name prefix and alias
        base: String,
        /// Bucket size
        granularity: Granularity,
    },

    /// A single named collection.
    Fixed {
        /// Collection name
        name: String,
        /// Schema the collection is created with
        schema: CollectionSchema,
    },
}

impl RoutingStrategy {
    /// Time-bucketed routing.
    #[must_use]
    pub fn time_bucketed(base: impl Into<String>, granularity: Granularity) -> Self {
        Self::TimeBucketed {
            base: base.into(),
            granularity,
        }
    }

    /// Fixed routing to the lookup collection.
    #[must_use]
    pub fn lookups() -> Self {
        Self::Fixed {
            name: DEFAULT_LOOKUPS_NAME.to_string(),
            schema: CollectionSchema::lookups(),
        }
    }

    /// Fixed routing to an item collection.
    #[must_use]
    pub fn fixed(name: impl Into<String>) -> Self {
        Self::Fixed {
            name: name.into(),
            schema: CollectionSchema::items(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::AttributeKeyed => Ok(()),
            Self::TimeBucketed { base, .. } if base.is_empty() => {
                Err(ConfigError::new("routing.base", "base name must not be empty"))
            }
            Self::Fixed { name, .. } if name.is_empty() => Err(ConfigError::new(
                "routing.name",
                "collection name must not be empty",
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributeKeyed => f.write_str("attributes"),
            Self::TimeBucketed { base, granularity } => write!(f, "{granularity}:{base}"),
            Self::Fixed { name, .. } => write!(f, "fixed:{name}"),
        }
    }
}

/// Where a record is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionTarget {
    /// Collection name
    pub name: String,
    /// Alias bound after the collection is first created
    pub alias: Option<String>,
    /// Schema used when the collection is created
    pub schema: CollectionSchema,
}

/// Assigns records to collections.
#[derive(Debug, Clone, Default)]
pub struct Router {
    strategy: RoutingStrategy,
}

impl Router {
    /// Creates a router for the given strategy.
    #[must_use]
    pub const fn new(strategy: RoutingStrategy) -> Self {
        Self { strategy }
    }

    /// Returns the active strategy.
    #[must_use]
    pub const fn strategy(&self) -> &RoutingStrategy {
        &self.strategy
    }

    /// Routes a record using the current UTC time.
    ///
    /// # Errors
    ///
    /// See [`Router::route_at`].
    pub fn route(&self, record: &Record) -> Result<CollectionTarget, RoutingError> {
        self.route_at(record, Utc::now())
    }

    /// Routes a record as if the clock read `now`.
    ///
    /// Every strategy rejects records missing a routing attribute, so a record
    /// that routes under one strategy routes under all of them.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::MissingAttribute`] if any of `backend_name`,
    /// `category`, `backend_version` or `origin` is absent or empty.
    pub fn route_at(
        &self,
        record: &Record,
        now: DateTime<Utc>,
    ) -> Result<CollectionTarget, RoutingError> {
        let backend_name = record.require(BACKEND_NAME)?;
        let category = record.require(CATEGORY)?;
        let backend_version = record.require(BACKEND_VERSION)?;
        let origin = record.require(ORIGIN)?;

        let target = match &self.strategy {
            RoutingStrategy::AttributeKeyed => CollectionTarget {
                name: identity([backend_name, category, backend_version, origin])?,
                alias: Some(format!("{backend_name}_{category}_{backend_version}")),
                schema: CollectionSchema::items(),
            },
            RoutingStrategy::TimeBucketed { base, granularity } => CollectionTarget {
                name: format!("{base}_{}", now.format(granularity.format())),
                alias: Some(base.clone()),
                schema: CollectionSchema::items(),
            },
            RoutingStrategy::Fixed { name, schema } => CollectionTarget {
                name: name.clone(),
                alias: None,
                schema: *schema,
            },
        };

        Ok(target)
    }
}
