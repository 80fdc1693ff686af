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

//! Records moved through the pipeline.
//!
//! A [`Record`] is a JSON object as produced by the data collectors upstream of
//! the queue. The pipeline only interprets the routing attributes
//! ([`ROUTING_ATTRIBUTES`]) and, depending on the document id policy, the
//! identity fields. Everything else, including unknown top-level fields, is
//! carried verbatim so the store can apply its own schema policy.
//!
//! # Examples
//!
//! ```rust
//! use conveyor_core::record::Record;
//! use serde_json::json;
//!
//! let record = Record::new("git", "commit", "0.12.0", "https://example.com/repo.git")
//!     .with_uuid("3f1c0b86a1f1f3b5c9a6a7d0a4d4d1d1d7a0f2e3")
//!     .with_data(json!({ "hash": "abc123" }));
//!
//! assert_eq!(record.backend_name(), Some("git"));
//! assert!(record.validate().is_ok());
//! ```

use crate::error::RoutingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Producer type field.
pub const BACKEND_NAME: &str = "backend_name";
/// Record kind field.
pub const CATEGORY: &str = "category";
/// Producer schema version field.
pub const BACKEND_VERSION: &str = "backend_version";
/// Source identity field.
pub const ORIGIN: &str = "origin";
/// Pre-assigned record identity field.
pub const UUID: &str = "uuid";
/// Nested payload field.
pub const DATA: &str = "data";

/// Attributes every record must carry, in collection-key order.
pub const ROUTING_ATTRIBUTES: [&str; 4] = [BACKEND_NAME, CATEGORY, BACKEND_VERSION, ORIGIN];

/// One structured record read from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Creates a record carrying the four routing attributes.
    #[must_use]
    pub fn new(
        backend_name: impl Into<String>,
        category: impl Into<String>,
        backend_version: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert(BACKEND_NAME.to_string(), Value::String(backend_name.into()));
        fields.insert(CATEGORY.to_string(), Value::String(category.into()));
        fields.insert(
            BACKEND_VERSION.to_string(),
            Value::String(backend_version.into()),
        );
        fields.insert(ORIGIN.to_string(), Value::String(origin.into()));
        Self { fields }
    }

    /// Wraps an already decoded JSON object.
    #[must_use]
    pub const fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Decodes a queue payload.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Malformed`] if the payload is not valid JSON or
    /// not a JSON object.
    pub fn from_slice(payload: &[u8]) -> Result<Self, RoutingError> {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(other) => Err(RoutingError::Malformed {
                reason: format!("expected a JSON object, found {}", json_type(&other)),
            }),
            Err(e) => Err(RoutingError::Malformed {
                reason: e.to_string(),
            }),
        }
    }

    /// Encodes the record for the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if a field value cannot be serialized.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }

    /// Sets the pre-assigned identity.
    #[must_use]
    pub fn with_uuid(self, uuid: impl Into<String>) -> Self {
        self.with_field(UUID, Value::String(uuid.into()))
    }

    /// Sets the nested payload.
    #[must_use]
    pub fn with_data(self, data: Value) -> Self {
        self.with_field(DATA, data)
    }

    /// Sets an arbitrary top-level field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Returns a top-level field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a top-level field if it is a non-empty string.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Producer type.
    #[must_use]
    pub fn backend_name(&self) -> Option<&str> {
        self.get_str(BACKEND_NAME)
    }

    /// Record kind.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.get_str(CATEGORY)
    }

    /// Producer schema version.
    #[must_use]
    pub fn backend_version(&self) -> Option<&str> {
        self.get_str(BACKEND_VERSION)
    }

    /// Source identity.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.get_str(ORIGIN)
    }

    /// Pre-assigned identity.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        self.get_str(UUID)
    }

    /// Returns a routing attribute or the error naming it.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::MissingAttribute`] if the attribute is absent,
    /// empty or not a string.
    pub fn require(&self, attribute: &'static str) -> Result<&str, RoutingError> {
        self.get_str(attribute)
            .ok_or(RoutingError::MissingAttribute { attribute })
    }

    /// Checks that all routing attributes are present.
    ///
    /// # Errors
    ///
    /// Returns the first missing attribute in [`ROUTING_ATTRIBUTES`] order.
    pub fn validate(&self) -> Result<(), RoutingError> {
        for attribute in ROUTING_ATTRIBUTES {
            self.require(attribute)?;
        }
        Ok(())
    }

    /// Borrows the underlying fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Converts the record into the document source sent to the store.
    #[must_use]
    pub fn into_source(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_slice_round_trips_unknown_fields() {
        let payload = br#"{"backend_name":"git","category":"commit","backend_version":"1","origin":"o","extra":true}"#;
        let record = Record::from_slice(payload).unwrap();

        assert_eq!(record.get("extra"), Some(&json!(true)));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_from_slice_rejects_non_objects() {
        let err = Record::from_slice(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, RoutingError::Malformed { ref reason } if reason.contains("array")));

        let err = Record::from_slice(b"not json").unwrap_err();
        assert!(matches!(err, RoutingError::Malformed { .. }));
    }

    #[test]
    fn test_validate_reports_first_missing_attribute() {
        let record = Record::new("git", "commit", "", "o");
        assert_eq!(
            record.validate(),
            Err(RoutingError::MissingAttribute {
                attribute: BACKEND_VERSION
            })
        );

        let record = Record::from_map(Map::new()).with_field(ORIGIN, json!("o"));
        assert_eq!(
            record.validate(),
            Err(RoutingError::MissingAttribute {
                attribute: BACKEND_NAME
            })
        );
    }

    #[test]
    fn test_non_string_attribute_is_missing() {
        let record = Record::new("git", "commit", "1", "o").with_field(CATEGORY, json!(7));
        assert_eq!(record.category(), None);
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_into_source() {
        let source = Record::new("git", "commit", "1", "o")
            .with_data(json!({"k": "v"}))
            .into_source();

        assert_eq!(source["data"]["k"], "v");
        assert_eq!(source["origin"], "o");
    }
}
