/*
 * Core library module for the verse-canvas backend, organizing all modules and exposing public APIs.
 * I'm setting up a clean module structure with the error taxonomy, database port, service layer, and route surface.
 */

// Module declarations - I'm organizing code into logical service layers
pub mod database;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

// Re-export commonly used types and utilities for internal use
pub use utils::{
    config::Config,
    error::{AppError, Result},
};

use database::meta_store::{PgMetaStore, SharedMetaStore};
use services::{
    blob_store::SharedBlobStore,
    cache_service::CacheBackend,
    model_client::SharedImageModel,
    CacheService, CleanupService, FsBlobStore, HttpImageModel, ModerationService, PromptComposer,
    RateCoordinator, RedisCache, Scheduler, StorageService, TierLimits, Validator, VerseResolver,
};
use telemetry::Telemetry;

/// Core application state shared across all request handlers.
/// Every external handle (blob, store, cache, model) is created once at
/// bootstrap and shared; no global mutable configuration exists after this.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub validator: Arc<Validator>,
    pub verse_resolver: VerseResolver,
    pub prompt_composer: PromptComposer,
    pub model: SharedImageModel,
    pub storage: StorageService,
    pub moderation: ModerationService,
    pub rate_coordinator: Arc<RateCoordinator>,
    pub cleanup: CleanupService,
    pub telemetry: Telemetry,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Production wiring: PostgreSQL metadata store, Redis cache, filesystem
    /// blob store, and the HTTP image model.
    pub async fn new(config: Config) -> Result<Self> {
        let pool =
            database::create_pool(&config.database_url, config.database_max_connections).await?;
        database::MigrationManager::run_migrations(&pool).await?;

        let meta_store: SharedMetaStore = Arc::new(PgMetaStore::new(
            pool,
            Duration::from_secs(config.store_timeout_secs),
        ));

        let redis_client = redis::Client::open(config.redis_url.clone())?;
        let cache_backend: Arc<dyn CacheBackend> = Arc::new(RedisCache::new(
            redis_client,
            Duration::from_millis(config.cache_timeout_ms),
        ));

        let blob_store: SharedBlobStore = Arc::new(FsBlobStore::new(config.blob_root.clone()));

        let model: SharedImageModel = Arc::new(HttpImageModel::new(
            config.model_api_url.clone(),
            config.model_api_token.clone(),
            Duration::from_secs(config.model_timeout_secs),
        )?);

        let state =
            Self::with_components(config, meta_store, blob_store, cache_backend, model).await;

        // A fresh deployment gets the embedded verse set so rotation has
        // material to work with; failure here degrades, it doesn't abort.
        if let Err(e) = state.verse_resolver.ensure_embedded_verses().await {
            warn!("Failed to seed embedded verses: {}", e);
        }

        Ok(state)
    }

    /// Assemble the service graph from explicit component handles.
    /// The test-suite drives this with in-memory adapters.
    pub async fn with_components(
        config: Config,
        meta_store: SharedMetaStore,
        blob_store: SharedBlobStore,
        cache_backend: Arc<dyn CacheBackend>,
        model: SharedImageModel,
    ) -> Self {
        let cache = CacheService::new(cache_backend, meta_store.clone());

        let validator = Arc::new(Validator::new());
        validator.load_blocklist(&cache).await;

        let verse_resolver = VerseResolver::new(meta_store.clone(), cache.clone());
        let prompt_composer = PromptComposer::new();

        let storage = StorageService::new(
            blob_store.clone(),
            meta_store.clone(),
            cache.clone(),
            config.public_base_url.clone(),
            config.url_signing_secret.clone(),
        );

        let moderation = ModerationService::new(
            meta_store.clone(),
            blob_store.clone(),
            cache.clone(),
            config.enable_content_moderation,
        );

        let rate_coordinator = Arc::new(RateCoordinator::new(TierLimits {
            anonymous: config.rate_limit_anonymous,
            authenticated: config.rate_limit_authenticated,
        }));

        let cleanup = CleanupService::new(
            meta_store,
            blob_store,
            cache,
            config.image_retention_days,
            config.backup_retention_days,
        );

        let telemetry = Telemetry::default();

        let scheduler = Arc::new(Scheduler::new(
            verse_resolver.clone(),
            prompt_composer.clone(),
            model.clone(),
            storage.clone(),
            cleanup.clone(),
            validator.clone(),
            telemetry.clone(),
        ));

        Self {
            config,
            validator,
            verse_resolver,
            prompt_composer,
            model,
            storage,
            moderation,
            rate_coordinator,
            cleanup,
            telemetry,
            scheduler,
        }
    }
}

// Export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD_TIME: &str = env!("BUILD_TIME");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
