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


//! Elasticsearch store implementation.

use super::config::ElasticsearchConfig;
use async_trait::async_trait;
use conveyor_core::schema::CollectionSchema;
use conveyor_core::store::{
    BulkDocument, BulkItemResult, CreateOutcome, DocumentStore, StoreError, StoreMetadata,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound of the backoff between two attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

const NDJSON: &str = "application/x-ndjson";

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(default)]
    status: u16,
    error: Option<Value>,
}

/// Elasticsearch document store.
///
/// Cheap to clone: clones share the HTTP connection pool.
#[derive(Clone)]
pub struct ElasticsearchStore {
    client: Client,
    base: Url,
    credentials: Option<(String, Option<String>)>,
    config: ElasticsearchConfig,
}

impl ElasticsearchStore {
    /// Creates a store client. No request is sent; use
    /// [`health_check`](Self::health_check) to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if the URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: ElasticsearchConfig) -> Result<Self, StoreError> {
        let mut base = Url::parse(&config.url).map_err(|e| {
            StoreError::configuration(format!("invalid URL: {e}"), Some("url".to_string()))
        })?;

        let credentials = if base.username().is_empty() {
            None
        } else {
            Some((
                base.username().to_string(),
                base.password().map(str::to_string),
            ))
        };
        let _ = base.set_username("");
        let _ = base.set_password(None);
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()
            .map_err(|e| {
                StoreError::configuration(format!("failed to build HTTP client: {e}"), None)
            })?;

        info!(
            url = %config.redacted_url(),
            timeout = ?config.timeout,
            max_retries = config.max_retries,
            verify_certs = config.verify_certs,
            "Elasticsearch store initialized"
        );

        Ok(Self {
            client,
            base,
            credentials,
            config,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    /// Checks that the cluster answers and logs its version.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error once retries are exhausted.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let url = self.endpoint("")?;
        let response = self
            .send("health check", || self.request(Method::GET, url.clone()))
            .await?;
        let body = Self::json(Self::check_status(response).await?).await?;

        info!(
            cluster = body["cluster_name"].as_str().unwrap_or("unknown"),
            version = body["version"]["number"].as_str().unwrap_or("unknown"),
            "Connected to Elasticsearch"
        );
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base.join(path).map_err(|e| {
            StoreError::configuration(format!("invalid endpoint '{path}': {e}"), None)
        })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_deref()),
            None => builder,
        }
    }

    /// Sends a request, retrying transient failures with exponential backoff.
    async fn send<F>(&self, operation: &str, build: F) -> Result<Response, StoreError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        loop {
            let failure = match build().send().await {
                Ok(response) if Self::is_overloaded(response.status()) => {
                    let status = response.status().as_u16();
                    StoreError::rejected_with_status(Self::read_reason(response).await, status)
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => {
                    let failure = StoreError::timeout(format!(
                        "{operation} timed out after {:?}",
                        self.config.timeout
                    ));
                    if !self.config.retry_on_timeout {
                        return Err(failure);
                    }
                    failure
                }
                Err(e) if e.is_connect() => StoreError::connection(e),
                Err(e) => return Err(StoreError::connection(e)),
            };

            if retries >= self.config.max_retries {
                error!(
                    "Elasticsearch {} failed after {} retries: {}",
                    operation, retries, failure
                );
                return Err(failure);
            }

            retries += 1;
            let delay = self.backoff(retries);
            warn!(
                "Elasticsearch {} failed (attempt {}/{}), retrying in {:?}: {}",
                operation, retries, self.config.max_retries, delay, failure
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.saturating_sub(1).min(16);
        self.config
            .retry_backoff
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }

    fn is_overloaded(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 502 | 503 | 504)
    }

    async fn check_status(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(StoreError::rejected_with_status(
                Self::read_reason(response).await,
                status.as_u16(),
            ))
        }
    }

    async fn json(response: Response) -> Result<Value, StoreError> {
        response
            .json::<Value>()
            .await
            .map_err(|e| StoreError::serialization(e, "failed to decode Elasticsearch response"))
    }

    async fn read_reason(response: Response) -> String {
        let status = response.status();
        match response.text().await {
            Ok(body) => Self::reason_from_body(&body).unwrap_or_else(|| status.to_string()),
            Err(e) => format!("{status}: {e}"),
        }
    }

    /// Extracts `type: reason` from an Elasticsearch error body.
    fn reason_from_body(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        value.get("error").map(Self::error_reason)
    }

    fn error_reason(error: &Value) -> String {
        match error {
            Value::String(message) => message.clone(),
            Value::Object(fields) => {
                let kind = fields.get("type").and_then(Value::as_str);
                let reason = fields.get("reason").and_then(Value::as_str);
                match (kind, reason) {
                    (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
                    (Some(kind), None) => kind.to_string(),
                    (None, Some(reason)) => reason.to_string(),
                    (None, None) => error.to_string(),
                }
            }
            other => other.to_string(),
        }
    }

    fn error_type(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        value["error"]["type"].as_str().map(str::to_string)
    }

    fn bulk_body(collection: &str, documents: &[BulkDocument]) -> Result<String, StoreError> {
        let mut body = String::new();
        for document in documents {
            let action = match &document.id {
                Some(id) => json!({ "index": { "_index": collection, "_id": id } }),
                None => json!({ "index": { "_index": collection } }),
            };
            body.push_str(&action.to_string());
            body.push('\n');
            let source = serde_json::to_string(&document.source)
                .map_err(|e| StoreError::serialization(e, "failed to encode document"))?;
            body.push_str(&source);
            body.push('\n');
        }
        Ok(body)
    }

    fn bulk_results(response: BulkResponse) -> Vec<BulkItemResult> {
        response
            .items
            .into_iter()
            .map(|action| match action.into_values().next() {
                Some(BulkItem {
                    id,
                    error: Some(error),
                    ..
                }) => BulkItemResult::rejected(id, Self::error_reason(&error)),
                Some(BulkItem {
                    id: Some(id),
                    status,
                    ..
                }) if (200..300).contains(&status) => BulkItemResult::accepted(id),
                Some(BulkItem { id, status, .. }) => {
                    BulkItemResult::rejected(id, format!("unexpected item status {status}"))
                }
                None => BulkItemResult::rejected(None, "empty bulk item"),
            })
            .collect()
    }
}

impl std::fmt::Debug for ElasticsearchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchStore")
            .field("url", &self.config.redacted_url())
            .field("timeout", &self.config.timeout)
            .field("max_retries", &self.config.max_retries)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
        let url = self.endpoint(collection)?;
        let response = self
            .send("index lookup", || self.request(Method::HEAD, url.clone()))
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StoreError::rejected_with_status(
                format!("HEAD /{collection} returned {status}"),
                status.as_u16(),
            )),
        }
    }

    #[instrument(skip(self, schema), fields(variant = %schema.variant()))]
    async fn create(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<CreateOutcome, StoreError> {
        let url = self.endpoint(collection)?;
        let mapping = schema.to_mapping();
        let response = self
            .send("index creation", || {
                self.request(Method::PUT, url.clone()).json(&mapping)
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("Index created");
            return Ok(CreateOutcome::Created);
        }

        let body = response.text().await.unwrap_or_default();
        if Self::error_type(&body).as_deref() == Some(ALREADY_EXISTS) {
            debug!("Index created concurrently by another writer");
            return Ok(CreateOutcome::AlreadyExists);
        }

        Err(StoreError::rejected_with_status(
            Self::reason_from_body(&body).unwrap_or_else(|| status.to_string()),
            status.as_u16(),
        ))
    }

    async fn bind_alias(&self, collection: &str, alias: &str) -> Result<(), StoreError> {
        let url = self.endpoint("_aliases")?;
        let actions = json!({
            "actions": [{ "add": { "index": collection, "alias": alias } }]
        });
        let response = self
            .send("alias binding", || {
                self.request(Method::POST, url.clone()).json(&actions)
            })
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>, StoreError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint("_bulk")?;
        let body = Self::bulk_body(collection, &documents)?;
        let response = self
            .send("bulk request", || {
                self.request(Method::POST, url.clone())
                    .header(CONTENT_TYPE, NDJSON)
                    .body(body.clone())
            })
            .await?;

        let response: BulkResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::serialization(e, "failed to decode bulk response"))?;

        if response.items.len() != documents.len() {
            return Err(StoreError::other(
                format!(
                    "bulk response has {} items for {} documents",
                    response.items.len(),
                    documents.len()
                ),
                false,
            ));
        }

        let has_errors = response.errors;
        let results = Self::bulk_results(response);
        if has_errors {
            let rejected = results.iter().filter(|r| !r.is_accepted()).count();
            debug!(rejected, "Bulk request had rejected items");
        }

        Ok(results)
    }

    async fn refresh(&self, collection: &str) -> Result<(), StoreError> {
        let url = self.endpoint(&format!("{collection}/_refresh"))?;
        let response = self
            .send("refresh", || self.request(Method::POST, url.clone()))
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    fn metadata(&self) -> StoreMetadata {
        StoreMetadata::new("Elasticsearch", "elasticsearch")
            .with_property("url", self.config.redacted_url())
            .with_property("timeout_secs", self.config.timeout.as_secs().to_string())
    }
}
