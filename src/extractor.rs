use crate::engine::Engine;
use crate::fetcher::{FetchBudget, FetchedResource, Fetcher};
use crate::oembed::{self, OEmbedFormat, OEmbedResponse};
use crate::utils::{decode_body, resolve_url, truncate_str};
use crate::{PreviewData, PreviewError};
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

pub const MAX_TITLE_LENGTH: usize = 80;
pub const MAX_DESCRIPTION_LENGTH: usize = 250;

/// Raw metadata collected from one source, before precedence is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub favicon: Option<String>,
}

impl PageMetadata {
    /// Fills gaps in `self` from `lower`; fields already set win.
    fn or(self, lower: PageMetadata) -> PageMetadata {
        PageMetadata {
            title: self.title.or(lower.title),
            description: self.description.or(lower.description),
            image_url: self.image_url.or(lower.image_url),
            site_name: self.site_name.or(lower.site_name),
            favicon: self.favicon.or(lower.favicon),
        }
    }
}

/// The metadata layers found in a parsed HTML document.
#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub open_graph: PageMetadata,
    pub twitter_card: PageMetadata,
    pub fallback: PageMetadata,
    pub oembed_link: Option<(Url, OEmbedFormat)>,
}

/// Metadata extractor, responsible for turning fetched content into preview data
#[derive(Clone)]
pub struct MetadataExtractor {
    fetcher: Fetcher,
    oembed_budget: FetchBudget,
}

impl MetadataExtractor {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            oembed_budget: FetchBudget::oembed(),
        }
    }

    pub fn with_oembed_budget(mut self, budget: FetchBudget) -> Self {
        self.oembed_budget = budget;
        self
    }

    /// Extracts preview data for `requested` from a fetched resource.
    ///
    /// Field precedence: provider-specific > oEmbed > Open Graph > Twitter
    /// card > plain document (`<title>`, `meta[name=description]`).
    #[instrument(level = "debug", skip(self, resource))]
    pub async fn extract(
        &self,
        engine: Engine,
        requested: &Url,
        resource: &FetchedResource,
    ) -> Result<PreviewData, PreviewError> {
        let body = decode_body(&resource.bytes, resource.content_type.as_deref());
        let base = &resource.final_url;

        let metadata = match resource
            .content_type
            .as_deref()
            .and_then(OEmbedFormat::from_content_type)
        {
            // The URL pointed straight at an oEmbed document.
            Some(format) => from_oembed(&OEmbedResponse::parse(&body, format)?, base),
            None => {
                let document = parse_document(&body, base);
                let oembed = match document.oembed_link.clone() {
                    Some((endpoint, format)) => self.fetch_oembed(&endpoint, format).await,
                    None => None,
                };
                let oembed = oembed.map(|o| from_oembed(&o, base)).unwrap_or_default();
                oembed
                    .or(document.open_graph)
                    .or(document.twitter_card)
                    .or(document.fallback)
            }
        };

        self.build(engine, requested, base, metadata)
    }

    fn build(
        &self,
        engine: Engine,
        requested: &Url,
        final_url: &Url,
        metadata: PageMetadata,
    ) -> Result<PreviewData, PreviewError> {
        // The id comes from the URL the user shared; providers often redirect
        // watch pages to consent or mobile hosts.
        let media_id = engine
            .media_id(requested)
            .or_else(|| engine.media_id(final_url));

        let provider = provider_metadata(engine, media_id.as_deref());
        let metadata = provider.or(metadata);
        let embed_html = media_id.as_deref().and_then(|id| engine.embed_html(id));

        let title = metadata
            .title
            .or_else(|| match engine {
                Engine::GitHub => media_id.clone(),
                _ => None,
            })
            .map(|t| truncate_str(&t, MAX_TITLE_LENGTH))
            .unwrap_or_default();
        let description = metadata
            .description
            .map(|d| truncate_str(&d, MAX_DESCRIPTION_LENGTH))
            .filter(|d| !d.is_empty());

        if title.is_empty() && embed_html.is_none() {
            return Err(PreviewError::extraction(format!(
                "no title or embeddable media for {requested}"
            )));
        }

        Ok(PreviewData {
            title,
            description,
            image_url: metadata.image_url,
            embed_html,
            site_name: metadata
                .site_name
                .or_else(|| engine.site_name().map(String::from)),
            favicon: metadata.favicon,
            source_url: final_url.to_string(),
        })
    }

    async fn fetch_oembed(&self, endpoint: &Url, format: OEmbedFormat) -> Option<OEmbedResponse> {
        debug!(endpoint = %endpoint, "Following oEmbed discovery link");
        let resource = match self.fetcher.fetch(endpoint, &self.oembed_budget).await {
            Ok(resource) => resource,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "oEmbed lookup failed, using page metadata");
                return None;
            }
        };
        let body = decode_body(&resource.bytes, resource.content_type.as_deref());
        let format = resource
            .content_type
            .as_deref()
            .and_then(OEmbedFormat::from_content_type)
            .unwrap_or(format);

        OEmbedResponse::parse(&body, format)
            .map_err(|e| warn!(endpoint = %endpoint, error = %e, "Ignoring malformed oEmbed"))
            .ok()
    }
}

/// Values a provider strategy knows without looking at the page.
fn provider_metadata(engine: Engine, media_id: Option<&str>) -> PageMetadata {
    match (engine, media_id) {
        (Engine::YouTube, Some(id)) => PageMetadata {
            image_url: Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
            favicon: Some("https://www.youtube.com/favicon.ico".to_string()),
            ..PageMetadata::default()
        },
        (Engine::Twitter, Some(_)) => PageMetadata {
            site_name: engine.site_name().map(String::from),
            favicon: Some("https://abs.twimg.com/favicons/twitter.ico".to_string()),
            ..PageMetadata::default()
        },
        (Engine::GitHub, Some(_)) => PageMetadata {
            site_name: engine.site_name().map(String::from),
            favicon: Some("https://github.githubassets.com/favicons/favicon.svg".to_string()),
            ..PageMetadata::default()
        },
        _ => PageMetadata::default(),
    }
}

fn from_oembed(oembed: &OEmbedResponse, base: &Url) -> PageMetadata {
    PageMetadata {
        title: oembed.title.clone(),
        description: None,
        image_url: oembed
            .thumbnail_url
            .as_deref()
            .and_then(|u| resolve_url(u, base)),
        site_name: oembed.provider_name.clone(),
        favicon: None,
    }
}

/// Reads every metadata layer from an HTML document, resolving relative
/// references against `base`. Never fails: html5ever recovers from
/// unterminated tags and stray bytes.
pub fn parse_document(body: &str, base: &Url) -> DocumentMetadata {
    let document = Html::parse_document(body);
    let absolute = |reference: Option<String>| reference.and_then(|r| resolve_url(&r, base));

    DocumentMetadata {
        open_graph: PageMetadata {
            title: meta_content(&document, "property", "og:title"),
            description: meta_content(&document, "property", "og:description"),
            image_url: absolute(
                meta_content(&document, "property", "og:image:secure_url")
                    .or_else(|| meta_content(&document, "property", "og:image")),
            ),
            site_name: meta_content(&document, "property", "og:site_name"),
            favicon: None,
        },
        twitter_card: PageMetadata {
            title: meta_content(&document, "name", "twitter:title"),
            description: meta_content(&document, "name", "twitter:description"),
            image_url: absolute(meta_content(&document, "name", "twitter:image")),
            site_name: None,
            favicon: None,
        },
        fallback: PageMetadata {
            title: element_text(&document, "title"),
            description: meta_content(&document, "name", "description"),
            image_url: absolute(meta_content(&document, "itemprop", "image")),
            site_name: None,
            favicon: absolute(link_href(
                &document,
                "link[rel~='icon'], link[rel='shortcut icon']",
            )),
        },
        oembed_link: oembed::discover(&document, base),
    }
}

fn meta_content(document: &Html, attr: &str, key: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[{attr}]")).ok()?;
    document
        .select(&selector)
        .find(|el| {
            el.value()
                .attr(attr)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(key))
        })
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn element_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn link_href(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr("href"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
