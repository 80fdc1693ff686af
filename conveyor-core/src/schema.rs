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

//! Collection schema.
//!
//! Every collection is created with the same strict top-level field set and a
//! dynamic `data` object. Existing deployments query these field names and
//! types, so they are part of the persisted-state contract.
//!
//! | Field | Type |
//! |---|---|
//! | `backend_name`, `backend_version`, `category`, `classified_fields_filtered`, `origin`, `perceval_version`, `tag`, `uuid` | keyword |
//! | `timestamp`, `updated_on` | long |
//! | `data` | dynamic object |
//!
//! The [`SchemaVariant::Lookups`] variant has the same fields but keeps `data`
//! out of the stored source.

use serde_json::{json, Map, Value};
use std::fmt;

/// Type of a top-level schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Exact-match string.
    Keyword,
    /// 64-bit integer; numeric input is coerced.
    Long,
    /// Object whose sub-structure is not validated.
    DynamicObject,
}

impl FieldType {
    /// Returns the store's name for this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Long => "long",
            Self::DynamicObject => "object",
        }
    }
}

/// Top-level fields, sorted by name.
pub const FIELDS: [(&str, FieldType); 11] = [
    ("backend_name", FieldType::Keyword),
    ("backend_version", FieldType::Keyword),
    ("category", FieldType::Keyword),
    ("classified_fields_filtered", FieldType::Keyword),
    ("data", FieldType::DynamicObject),
    ("origin", FieldType::Keyword),
    ("perceval_version", FieldType::Keyword),
    ("tag", FieldType::Keyword),
    ("timestamp", FieldType::Long),
    ("updated_on", FieldType::Long),
    ("uuid", FieldType::Keyword),
];

/// Schema flavour of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchemaVariant {
    /// Full source retained.
    #[default]
    Items,
    /// `data` is indexed but excluded from the stored source.
    Lookups,
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Items => f.write_str("items"),
            Self::Lookups => f.write_str("lookups"),
        }
    }
}

/// The schema a collection is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CollectionSchema {
    variant: SchemaVariant,
}

impl CollectionSchema {
    /// Schema for regular item collections.
    #[must_use]
    pub const fn items() -> Self {
        Self {
            variant: SchemaVariant::Items,
        }
    }

    /// Schema for lookup collections.
    #[must_use]
    pub const fn lookups() -> Self {
        Self {
            variant: SchemaVariant::Lookups,
        }
    }

    /// Schema for the given variant.
    #[must_use]
    pub const fn with_variant(variant: SchemaVariant) -> Self {
        Self { variant }
    }

    /// Returns the variant.
    #[must_use]
    pub const fn variant(&self) -> SchemaVariant {
        self.variant
    }

    /// Returns whether `data` is dropped from the stored source.
    #[must_use]
    pub const fn excludes_data_from_source(&self) -> bool {
        matches!(self.variant, SchemaVariant::Lookups)
    }

    /// Looks up the type of a top-level field.
    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        FIELDS
            .binary_search_by(|(field, _)| (*field).cmp(name))
            .ok()
            .map(|i| FIELDS[i].1)
    }

    /// Renders the typeless index mapping used at creation time.
    #[must_use]
    pub fn to_mapping(&self) -> Value {
        let mut properties = Map::new();
        for (name, field_type) in FIELDS {
            let property = match field_type {
                FieldType::DynamicObject => json!({ "type": "object", "dynamic": true }),
                other => json!({ "type": other.as_str() }),
            };
            properties.insert(name.to_string(), property);
        }

        let mut mappings = Map::new();
        mappings.insert("dynamic".to_string(), json!("strict"));
        if self.excludes_data_from_source() {
            mappings.insert("_source".to_string(), json!({ "excludes": ["data"] }));
        }
        mappings.insert("properties".to_string(), Value::Object(properties));

        json!({ "mappings": Value::Object(mappings) })
    }

    /// Checks a document against the schema the way a strict store would.
    ///
    /// # Errors
    ///
    /// Returns a store-style diagnostic naming the first offending field.
    pub fn check_document(&self, document: &Value) -> Result<(), String> {
        let Value::Object(fields) = document else {
            return Err("mapper_parsing_exception: document is not an object".to_string());
        };

        for (name, value) in fields {
            let Some(field_type) = self.field_type(name) else {
                return Err(format!(
                    "strict_dynamic_mapping_exception: mapping set to strict, dynamic introduction of [{name}] within [_doc] is not allowed"
                ));
            };
            if value.is_null() {
                continue;
            }
            let accepted = match field_type {
                FieldType::Keyword => value.is_string() || value.is_number() || value.is_boolean(),
                FieldType::Long => {
                    value.is_number()
                        || value.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok())
                }
                FieldType::DynamicObject => value.is_object(),
            };
            if !accepted {
                return Err(format!(
                    "mapper_parsing_exception: failed to parse field [{name}] of type [{}]",
                    field_type.as_str()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_sorted_for_lookup() {
        let mut names: Vec<_> = FIELDS.iter().map(|(n, _)| *n).collect();
        let sorted = {
            let mut s = names.clone();
            s.sort_unstable();
            s
        };
        assert_eq!(names, sorted);
        names.dedup();
        assert_eq!(names.len(), FIELDS.len());
    }

    #[test]
    fn test_items_mapping() {
        let mapping = CollectionSchema::items().to_mapping();

        assert_eq!(mapping["mappings"]["dynamic"], "strict");
        assert_eq!(mapping["mappings"]["properties"]["uuid"]["type"], "keyword");
        assert_eq!(mapping["mappings"]["properties"]["timestamp"]["type"], "long");
        assert_eq!(mapping["mappings"]["properties"]["data"]["dynamic"], true);
        assert!(mapping["mappings"].get("_source").is_none());
    }

    #[test]
    fn test_lookups_mapping_excludes_data() {
        let mapping = CollectionSchema::lookups().to_mapping();
        assert_eq!(mapping["mappings"]["_source"]["excludes"], json!(["data"]));
    }

    #[test]
    fn test_check_document() {
        let schema = CollectionSchema::items();

        let ok = json!({
            "backend_name": "git",
            "timestamp": 1_483_228_800.5,
            "updated_on": "1483228800",
            "data": { "anything": [1, 2, 3] }
        });
        assert!(schema.check_document(&ok).is_ok());

        let unknown = json!({ "backend_name": "git", "surprise": 1 });
        let err = schema.check_document(&unknown).unwrap_err();
        assert!(err.contains("strict_dynamic_mapping_exception"));
        assert!(err.contains("surprise"));

        let bad_long = json!({ "timestamp": "yesterday" });
        assert!(schema.check_document(&bad_long).is_err());

        let bad_data = json!({ "data": "flat" });
        assert!(schema.check_document(&bad_data).is_err());
    }
}
