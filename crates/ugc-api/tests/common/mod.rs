//! Shared fixtures for API tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use ugc_api::auth::{issue_token, Claims};
use ugc_api::services::{ScriptGenerator, ScriptOptions};
use ugc_api::{create_router, ApiConfig, ApiResult, AppState, DeploymentMode, GenerationService};
use ugc_firestore::{CreditContext, CreditLedger, MemoryLedgerStore, MemoryVideoStore};
use ugc_models::{GeneratedScript, ProductData, TransactionType, VideoStyle};
use ugc_queue::{MemoryProgress, MemoryQueue};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const USER: &str = "user-1";

pub struct FixedScript;

#[async_trait]
impl ScriptGenerator for FixedScript {
    async fn generate(
        &self,
        product: &ProductData,
        _style: VideoStyle,
        _options: &ScriptOptions,
    ) -> ApiResult<GeneratedScript> {
        Ok(GeneratedScript {
            script: format!("Meet {}, the only one you need.", product.title),
            estimated_duration: 15,
            scenes: vec![],
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub videos: Arc<MemoryVideoStore>,
    pub ledger_store: Arc<MemoryLedgerStore>,
    pub ledger: CreditLedger,
    pub queue: Arc<MemoryQueue>,
    pub progress: Arc<MemoryProgress>,
}

pub fn config() -> ApiConfig {
    ApiConfig {
        deployment_mode: DeploymentMode::Development,
        jwt_secret: JWT_SECRET.to_string(),
        payment_webhook_secret: WEBHOOK_SECRET.to_string(),
        rate_limit_rps: 1000,
        ..ApiConfig::default()
    }
}

pub fn test_app() -> TestApp {
    let videos = Arc::new(MemoryVideoStore::new());
    let ledger_store = Arc::new(MemoryLedgerStore::new());
    let ledger = CreditLedger::new(ledger_store.clone());
    let queue = Arc::new(MemoryQueue::new());
    let progress = Arc::new(MemoryProgress::new());

    let generation = GenerationService::new(
        videos.clone(),
        ledger.clone(),
        queue.clone(),
        progress.clone(),
        Arc::new(FixedScript),
    );
    let state = AppState::from_parts(config(), generation, ledger.clone(), queue.clone());

    TestApp {
        router: create_router(state, None),
        videos,
        ledger_store,
        ledger,
        queue,
        progress,
    }
}

impl TestApp {
    pub async fn fund(&self, user: &str, credits: u32) {
        self.ledger
            .grant(user, credits, TransactionType::Purchase, CreditContext::new("test funds"))
            .await
            .unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> (u16, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        read_json(response).await
    }
}

pub async fn read_json(response: Response<Body>) -> (u16, Value) {
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub fn token_for(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
        email: None,
    };
    issue_token(JWT_SECRET, &claims).unwrap()
}

pub fn authed(method: &str, uri: &str, user: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
