use crate::engine::{Engine, EngineRegistry};
use crate::fetcher::{FetchBudget, Fetcher};
use crate::{MetadataExtractor, PreviewData, PreviewError, PreviewGenerator};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The uncached pipeline: match, fetch, extract.
#[derive(Clone)]
pub struct UrlPreviewGenerator {
    registry: Arc<EngineRegistry>,
    pub fetcher: Fetcher,
    extractor: MetadataExtractor,
    budget: FetchBudget,
}

impl Default for UrlPreviewGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlPreviewGenerator {
    pub fn new() -> Self {
        Self::new_with_fetcher(Fetcher::new())
    }

    pub fn new_with_fetcher(fetcher: Fetcher) -> Self {
        Self {
            registry: Arc::new(EngineRegistry::default()),
            extractor: MetadataExtractor::new(fetcher.clone()),
            fetcher,
            budget: FetchBudget::page(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_budget(mut self, budget: FetchBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_oembed_budget(mut self, budget: FetchBudget) -> Self {
        self.extractor = self.extractor.with_oembed_budget(budget);
        self
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Runs the pipeline and reports which engine handled the URL, so the
    /// caller can pick the matching template.
    #[instrument(level = "debug", skip(self))]
    pub async fn generate(&self, url: &str) -> Result<(Engine, PreviewData), PreviewError> {
        let (parsed, engine) = self.registry.resolve_str(url)?;
        debug!(engine = engine.id(), "Matched engine");

        let resource = self.fetcher.fetch(&parsed, &self.budget).await?;
        let data = self.extractor.extract(engine, &parsed, &resource).await?;
        Ok((engine, data))
    }
}

#[async_trait]
impl PreviewGenerator for UrlPreviewGenerator {
    async fn generate_preview(&self, url: &str) -> Result<PreviewData, PreviewError> {
        self.generate(url).await.map(|(_, data)| data)
    }
}
