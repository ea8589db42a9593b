//! Application state.

use std::sync::Arc;

use ugc_firestore::{
    CreditLedger, FirestoreClient, FirestoreLedgerStore, FirestoreVideoStore, VideoStore,
};
use ugc_queue::{JobQueue, ProgressStore, ProgressTracker, RenderQueue};

use crate::auth::TokenVerifier;
use crate::config::ApiConfig;
use crate::services::{GeminiScriptGenerator, GenerationService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub generation: Arc<GenerationService>,
    pub ledger: CreditLedger,
    pub queue: Arc<dyn RenderQueue>,
    pub tokens: TokenVerifier,
}

impl AppState {
    /// Wire the production stack from environment configuration.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        if config.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET must be set");
        }

        let firestore = FirestoreClient::from_env().await?;
        let videos: Arc<dyn VideoStore> = Arc::new(FirestoreVideoStore::new(firestore.clone()));
        let ledger = CreditLedger::new(Arc::new(FirestoreLedgerStore::new(firestore)));

        let queue = JobQueue::from_env()?;
        let progress: Arc<dyn ProgressTracker> =
            Arc::new(ProgressStore::new(&queue.config().redis_url)?);
        let queue: Arc<dyn RenderQueue> = Arc::new(queue);

        let scripts = Arc::new(GeminiScriptGenerator::from_env()?);

        #[allow(unused_mut)]
        let mut generation = GenerationService::new(
            Arc::clone(&videos),
            ledger.clone(),
            Arc::clone(&queue),
            Arc::clone(&progress),
            scripts,
        );

        #[cfg(feature = "inline-render")]
        if let Some(inline) = crate::services::InlineRenderer::for_deployment(
            config.deployment_mode,
            Arc::clone(&videos),
            ledger.clone(),
            Arc::clone(&progress),
        ) {
            generation = generation.with_inline_fallback(Arc::new(inline));
        }

        Ok(Self::from_parts(config, generation, ledger, queue))
    }

    /// Assemble state from already-built collaborators.
    pub fn from_parts(
        config: ApiConfig,
        generation: GenerationService,
        ledger: CreditLedger,
        queue: Arc<dyn RenderQueue>,
    ) -> Self {
        let tokens = TokenVerifier::new(&config.jwt_secret);
        Self {
            config,
            generation: Arc::new(generation),
            ledger,
            queue,
            tokens,
        }
    }
}
