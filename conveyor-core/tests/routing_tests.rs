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


//! Tests for collection naming: identities, routing strategies and schemas.

use chrono::{TimeZone, Utc};
use conveyor_core::error::{InvalidComponentError, RoutingError};
use conveyor_core::identity::{identity, is_identity};
use conveyor_core::record::Record;
use conveyor_core::router::{Granularity, Router, RoutingStrategy};
use conveyor_core::schema::CollectionSchema;
use serde_json::json;

fn record() -> Record {
    Record::new("git", "commit", "0.12.0", "https://github.com/chaoss/grimoirelab.git")
}

#[test]
fn test_identity_is_stable_across_calls() {
    let components = ["git", "commit", "0.12.0", "https://github.com/chaoss/grimoirelab.git"];
    let first = identity(components).unwrap();
    let second = identity(components.iter().map(|c| c.to_string())).unwrap();

    assert_eq!(first, second);
    assert!(is_identity(&first));
}

#[test]
fn test_identity_differs_per_component() {
    let base = identity(["git", "commit", "0.12.0", "o"]).unwrap();
    assert_ne!(base, identity(["git", "commit", "0.13.0", "o"]).unwrap());
    assert_ne!(base, identity(["git", "issue", "0.12.0", "o"]).unwrap());
    assert_ne!(base, identity(["github", "commit", "0.12.0", "o"]).unwrap());
}

#[test]
fn test_identity_rejects_empty_component() {
    assert_eq!(
        identity(["git", "", "0.12.0"]),
        Err(InvalidComponentError::Empty { position: 1 })
    );
    assert_eq!(
        identity(Vec::<String>::new()),
        Err(InvalidComponentError::NoComponents)
    );
}

#[test]
fn test_same_source_always_routes_to_same_collection() {
    let router = Router::new(RoutingStrategy::AttributeKeyed);
    let early = Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();

    let a = router.route_at(&record(), early).unwrap();
    let b = router
        .route_at(&record().with_uuid("other").with_data(json!({"x": 1})), late)
        .unwrap();

    assert_eq!(a, b);
}

#[test]
fn test_time_bucket_names() {
    let at = Utc.with_ymd_and_hms(2017, 1, 1, 23, 59, 0).unwrap();
    let cases = [
        (Granularity::Minute, "events_20170101_23h59m"),
        (Granularity::Hour, "events_20170101_23h"),
        (Granularity::Day, "events_20170101"),
        (Granularity::Month, "events_201701"),
    ];

    for (granularity, expected) in cases {
        let router = Router::new(RoutingStrategy::time_bucketed("events", granularity));
        let target = router.route_at(&record(), at).unwrap();
        assert_eq!(target.name, expected);
        assert_eq!(target.alias.as_deref(), Some("events"));
    }
}

#[test]
fn test_bucket_rolls_over_at_boundary() {
    let router = Router::new(RoutingStrategy::time_bucketed("events", Granularity::Day));
    let before = Utc.with_ymd_and_hms(2017, 1, 1, 23, 59, 59).unwrap();
    let after = Utc.with_ymd_and_hms(2017, 1, 2, 0, 0, 0).unwrap();

    assert_eq!(router.route_at(&record(), before).unwrap().name, "events_20170101");
    assert_eq!(router.route_at(&record(), after).unwrap().name, "events_20170102");
}

#[test]
fn test_granularity_parsing() {
    assert_eq!("minute".parse::<Granularity>().unwrap(), Granularity::Minute);
    assert_eq!(" MONTH ".parse::<Granularity>().unwrap(), Granularity::Month);
    assert_eq!("hour".parse::<Granularity>().unwrap(), Granularity::Hour);
    assert!("week".parse::<Granularity>().is_err());
}

#[test]
fn test_every_strategy_requires_routing_attributes() {
    let incomplete = Record::new("git", "commit", "0.12.0", "");
    let strategies = [
        RoutingStrategy::AttributeKeyed,
        RoutingStrategy::time_bucketed("events", Granularity::Day),
        RoutingStrategy::lookups(),
    ];

    for strategy in strategies {
        let err = Router::new(strategy).route(&incomplete).unwrap_err();
        assert_eq!(err, RoutingError::MissingAttribute { attribute: "origin" });
    }
}

#[test]
fn test_lookups_target() {
    let target = Router::new(RoutingStrategy::lookups()).route(&record()).unwrap();

    assert_eq!(target.name, "lookups");
    assert_eq!(target.alias, None);
    assert_eq!(target.schema, CollectionSchema::lookups());
}

#[test]
fn test_items_mapping_is_strict() {
    let mapping = CollectionSchema::items().to_mapping();

    assert_eq!(mapping["mappings"]["dynamic"], "strict");
    assert_eq!(mapping["mappings"]["properties"]["uuid"]["type"], "keyword");
    assert_eq!(mapping["mappings"]["properties"]["timestamp"]["type"], "long");
    assert_eq!(mapping["mappings"]["properties"]["data"]["dynamic"], true);
}

#[test]
fn test_schema_checks_documents() {
    let schema = CollectionSchema::items();
    let valid = record().with_uuid("u").into_source();
    let invalid = record().with_field("unknown", json!(1)).into_source();

    assert!(schema.check_document(&valid).is_ok());
    assert!(schema
        .check_document(&invalid)
        .unwrap_err()
        .contains("strict_dynamic_mapping_exception"));
}
