//! Firestore REST API client.
//!
//! Thin client over the v1 REST surface with:
//! - Token caching and one transparent refresh on expired tokens
//! - Retry of idempotent reads on transient failures
//! - Atomic multi-document commits with preconditions
//! - Tracing spans and request metrics

use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::TokenCache;
use crate::types::{
    CommitRequest, CommitResponse, Document, Fields, Precondition, RunQueryRequest,
    RunQueryResponse, StructuredQuery, Write,
};

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl FirestoreConfig {
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .unwrap_or_default();

        if project_id.trim().is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
            ));
        }

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(
                std::env::var("FIRESTORE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            connect_timeout: Duration::from_secs(
                std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            retry: RetryConfig::from_env(),
        })
    }
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    /// `projects/{p}/databases/{d}/documents`
    root: String,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl FirestoreClient {
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let provider = Self::service_account()?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("ugc-firestore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let root = format!(
            "projects/{}/databases/{}/documents",
            config.project_id, config.database_id
        );
        let base_url = format!("https://firestore.googleapis.com/v1/{}", root);

        Ok(Self {
            http,
            config,
            root,
            base_url,
            tokens: Arc::new(TokenCache::new(provider)),
        })
    }

    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    fn service_account() -> FirestoreResult<Arc<dyn TokenProvider>> {
        match CustomServiceAccount::from_env() {
            Ok(Some(account)) => Ok(Arc::new(account)),
            Ok(None) => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
            Err(e) => Err(FirestoreError::auth_error(format!(
                "Failed to load service account: {}",
                e
            ))),
        }
    }

    /// Full resource name, as used inside commit writes.
    pub fn document_name(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.root, collection, doc_id)
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        )
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);

        with_retry(&self.config.retry, "get_document", || async {
            let response = self
                .execute("get_document", collection, |token| {
                    self.http.get(&url).bearer_auth(token)
                })
                .await?;

            match response.status() {
                StatusCode::OK => Ok(Some(response.json::<Document>().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                _ => Err(Self::error_from(response).await),
            }
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` if the id is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);

        let response = self
            .execute("create_document", collection, |token| {
                self.http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
            StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                "{}/{}",
                collection, doc_id
            ))),
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Replace (or, with `mask`, merge) a document's fields, subject to an
    /// optional precondition.
    pub async fn patch_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
        mask: Option<&[&str]>,
        precondition: Option<Precondition>,
    ) -> FirestoreResult<Document> {
        let mut params: Vec<String> = mask
            .unwrap_or_default()
            .iter()
            .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
            .collect();
        if let Some(p) = &precondition {
            if let Some(exists) = p.exists {
                params.push(format!("currentDocument.exists={}", exists));
            }
            if let Some(ts) = &p.update_time {
                params.push(format!(
                    "currentDocument.updateTime={}",
                    urlencoding::encode(ts)
                ));
            }
        }

        let mut url = self.document_url(collection, doc_id);
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }
        let body = Document::new(fields);

        let response = self
            .execute("patch_document", collection, |token| {
                self.http.patch(&url).bearer_auth(token).json(&body)
            })
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(Self::error_from(response).await),
        }
    }

    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<()> {
        let url = self.document_url(collection, doc_id);

        let response = self
            .execute("delete_document", collection, |token| {
                self.http.delete(&url).bearer_auth(token)
            })
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Apply all `writes` atomically. Any failed precondition aborts the
    /// whole commit.
    pub async fn commit(&self, writes: Vec<Write>) -> FirestoreResult<CommitResponse> {
        let url = format!("{}:commit", self.base_url);
        let body = CommitRequest { writes };

        let response = self
            .execute("commit", "(commit)", |token| {
                self.http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Run a structured query under `parent_path` ("" for root collections,
    /// `users/{uid}` for subcollections).
    pub async fn run_query(
        &self,
        parent_path: &str,
        query: StructuredQuery,
    ) -> FirestoreResult<Vec<Document>> {
        let url = if parent_path.is_empty() {
            format!("{}:runQuery", self.base_url)
        } else {
            format!("{}/{}:runQuery", self.base_url, parent_path)
        };
        let body = RunQueryRequest {
            structured_query: query,
        };

        with_retry(&self.config.retry, "run_query", || async {
            let response = self
                .execute("run_query", parent_path, |token| {
                    self.http.post(&url).bearer_auth(token).json(&body)
                })
                .await?;

            if response.status() != StatusCode::OK {
                return Err(Self::error_from(response).await);
            }

            let rows: Vec<RunQueryResponse> = response.json().await?;
            Ok(rows.into_iter().filter_map(|r| r.document).collect())
        })
        .await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Send a request, refreshing the token once if Firestore reports it
    /// expired. Records tracing and metrics for the round trip.
    async fn execute<F>(&self, operation: &str, target: &str, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let span = info_span!("firestore_request", operation = %operation, target = %target);
        let start = Instant::now();

        let result = async {
            let token = self.tokens.get_token().await?;
            let response = build(&token).send().await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            if !(body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("UNAUTHENTICATED")) {
                return Err(FirestoreError::auth_error(body));
            }

            debug!("Firestore token expired, refreshing");
            self.tokens.invalidate().await;
            let token = self.tokens.get_token().await?;
            Ok(build(&token).send().await?)
        }
        .instrument(span)
        .await;

        let status = match &result {
            Ok(response) => response.status().as_u16(),
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);

        result
    }

    async fn error_from(response: Response) -> FirestoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status, body)
    }
}
