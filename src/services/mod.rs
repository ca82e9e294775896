/*
 * Services module aggregator providing centralized access to all business logic services for the verse-canvas backend.
 * I'm organizing validation, verse resolution, prompt composition, model invocation, storage, moderation, rate limiting, cleanup, and scheduling into a cohesive service layer that maintains clean separation of concerns.
 */

pub mod blob_store;
pub mod cache_service;
pub mod cleanup_service;
pub mod model_client;
pub mod moderation_service;
pub mod prompt;
pub mod rate_limiter;
pub mod scheduler;
pub mod storage_service;
pub mod validation;
pub mod verse_service;

// Re-export all services for convenient access throughout the application
pub use blob_store::{BlobStore, FsBlobStore, MemoryBlobStore, SharedBlobStore};
pub use cache_service::{CacheBackend, CacheService, MemoryCache, RedisCache};
pub use cleanup_service::CleanupService;
pub use model_client::{HttpImageModel, ImageModel, SharedImageModel};
pub use moderation_service::ModerationService;
pub use prompt::PromptComposer;
pub use rate_limiter::{RateCoordinator, Tier, TierLimits};
pub use scheduler::Scheduler;
pub use storage_service::StorageService;
pub use validation::Validator;
pub use verse_service::VerseResolver;
