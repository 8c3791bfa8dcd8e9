use crate::cache::{normalize_key, Cache, CacheConfig, CachePayload};
use crate::engine::EngineRegistry;
use crate::fetcher::{FetchBudget, Fetcher};
use crate::{PreviewData, PreviewError, RenderedPreview, Renderer, UrlPreviewGenerator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

/// PreviewService turns shared URLs into ready-to-insert HTML fragments.
///
/// Results, failures included, are cached per normalized URL, and concurrent
/// requests for the same URL share a single fetch.
#[derive(Clone)]
pub struct PreviewService {
    generator: Arc<UrlPreviewGenerator>,
    renderer: Renderer,
    cache: Cache,
    // Max Concurrent Requests
    semaphore: Arc<Semaphore>,
}

pub const MAX_CONCURRENT_REQUESTS: usize = 500;

impl Default for PreviewService {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewService {
    pub fn new() -> Self {
        Self::new_with_config(PreviewServiceConfig::default())
    }

    pub fn with_cache_cap(cache_capacity: usize) -> Self {
        Self::new_with_config(PreviewServiceConfig::new(cache_capacity))
    }

    /// Every call goes to the network; concurrent calls for one URL still
    /// share a fetch.
    pub fn no_cache() -> Self {
        Self::new_with_config(PreviewServiceConfig::new(0))
    }

    pub fn new_with_config(config: PreviewServiceConfig) -> Self {
        debug!(
            cache_capacity = config.cache.capacity,
            max_concurrent_requests = config.max_concurrent_requests,
            "Initializing PreviewService"
        );

        let mut generator = UrlPreviewGenerator::new_with_fetcher(config.fetcher.unwrap_or_default())
            .with_budget(config.page_budget)
            .with_oembed_budget(config.oembed_budget);
        if let Some(registry) = config.registry {
            generator = generator.with_registry(registry);
        }

        Self {
            generator: Arc::new(generator),
            renderer: Renderer::new(),
            cache: Cache::new(config.cache),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Resolves a URL to its preview fragment. Never fails: anything that
    /// goes wrong yields `ok: false` with a bare link, or an empty fragment
    /// when the input is not an http(s) URL.
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, url: &str) -> RenderedPreview {
        let parsed = match self.generator.registry().resolve_str(url) {
            Ok((parsed, _)) => parsed,
            Err(e) => {
                e.log();
                return self.unavailable(url);
            }
        };
        let key = normalize_key(&parsed);

        let generator = self.generator.clone();
        let renderer = self.renderer;
        let semaphore = self.semaphore.clone();
        let target = parsed.to_string();

        let entry = self
            .cache
            .get_or_resolve(key, move || async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    warn!("Preview semaphore closed");
                    return CachePayload::Unavailable;
                };
                match generator.generate(&target).await {
                    Ok((engine, data)) => {
                        CachePayload::Rendered(renderer.render(engine, &target, &data))
                    }
                    Err(e) => {
                        e.log();
                        CachePayload::Unavailable
                    }
                }
            })
            .await;

        match &entry.payload {
            CachePayload::Rendered(html) => RenderedPreview {
                html: html.clone(),
                ok: true,
            },
            CachePayload::Unavailable => self.unavailable(url),
        }
    }

    /// Like [`resolve`](Self::resolve), but stops waiting after `timeout`.
    /// The fetch itself keeps running and still fills the cache.
    pub async fn resolve_with_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPreview, PreviewError> {
        tokio::time::timeout(timeout, self.resolve(url))
            .await
            .map_err(|_| PreviewError::Timeout(format!("preview not ready within {timeout:?}")))
    }

    /// Uncached structured preview, for callers that render on their own.
    #[instrument(level = "debug", skip(self))]
    pub async fn generate_preview(&self, url: &str) -> Result<PreviewData, PreviewError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PreviewError::Network("preview service is shut down".to_string()))?;
        self.generator.generate(url).await.map(|(_, data)| data)
    }

    /// Drops the cached outcome for `url` so the next resolve refetches.
    pub fn invalidate(&self, url: &str) -> bool {
        match self.generator.registry().resolve_str(url) {
            Ok((parsed, _)) => self.cache.invalidate(&normalize_key(&parsed)),
            Err(_) => false,
        }
    }

    fn unavailable(&self, url: &str) -> RenderedPreview {
        RenderedPreview {
            html: self.renderer.fallback(url),
            ok: false,
        }
    }
}

pub struct PreviewServiceConfig {
    pub cache: CacheConfig,
    pub max_concurrent_requests: usize,
    pub fetcher: Option<Fetcher>,
    pub registry: Option<Arc<EngineRegistry>>,
    pub page_budget: FetchBudget,
    pub oembed_budget: FetchBudget,
}

impl Default for PreviewServiceConfig {
    fn default() -> Self {
        Self::new(CacheConfig::default().capacity)
    }
}

impl PreviewServiceConfig {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: CacheConfig {
                capacity: cache_capacity,
                ..CacheConfig::default()
            },
            max_concurrent_requests: MAX_CONCURRENT_REQUESTS,
            fetcher: None,
            registry: None,
            page_budget: FetchBudget::page(),
            oembed_budget: FetchBudget::oembed(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_max_concurrent_requests(mut self, max_concurrent_requests: usize) -> Self {
        self.max_concurrent_requests = max_concurrent_requests;
        self
    }

    pub fn with_success_ttl(mut self, ttl: Duration) -> Self {
        self.cache.success_ttl = ttl;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.cache.negative_ttl = ttl;
        self
    }

    pub fn with_page_budget(mut self, budget: FetchBudget) -> Self {
        self.page_budget = budget;
        self
    }

    pub fn with_oembed_budget(mut self, budget: FetchBudget) -> Self {
        self.oembed_budget = budget;
        self
    }
}
