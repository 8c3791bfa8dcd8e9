use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod cache;
mod engine;
mod error;
mod extractor;
mod fetcher;
#[cfg(feature = "logging")]
mod logging;
mod oembed;
mod preview_generator;
mod preview_service;
mod renderer;
mod security;
mod utils;

pub use cache::{
    normalize_key, Cache, CacheConfig, CacheEntry, CachePayload, CacheStats, OutcomeKind,
};
pub use engine::{Engine, EngineRegistry, Template};
pub use error::PreviewError;
pub use extractor::{
    parse_document, DocumentMetadata, MetadataExtractor, PageMetadata, MAX_DESCRIPTION_LENGTH,
    MAX_TITLE_LENGTH,
};
pub use fetcher::{
    FetchBudget, FetchResult, FetchedResource, Fetcher, FetcherConfig, DEFAULT_USER_AGENT,
};
#[cfg(feature = "logging")]
pub use logging::{log_error_card, log_preview_card, setup_logging, LogConfig, LogLevelGuard};
pub use oembed::{OEmbedFormat, OEmbedResponse};
pub use preview_generator::UrlPreviewGenerator;
pub use preview_service::{PreviewService, PreviewServiceConfig, MAX_CONCURRENT_REQUESTS};
pub use renderer::Renderer;
pub use security::{GuardedResolver, UrlValidationConfig, UrlValidator};
pub use utils::truncate_str;

/// Normalized result of extraction, independent of any HTML shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewData {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Trusted player markup, built only from a validated media id.
    pub embed_html: Option<String>,
    pub site_name: Option<String>,
    pub favicon: Option<String>,
    /// URL actually fetched, after redirects.
    pub source_url: String,
}

/// What a caller of [`PreviewService::resolve`] gets back. `html` is safe to
/// insert as-is; when `ok` is false it is a bare link or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPreview {
    pub html: String,
    pub ok: bool,
}

#[async_trait]
pub trait PreviewGenerator {
    async fn generate_preview(&self, url: &str) -> Result<PreviewData, PreviewError>;
}
