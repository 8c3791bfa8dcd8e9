use crate::utils::{mime_essence, resolve_url};
use crate::PreviewError;
use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

/// The subset of an oEmbed response the previews use.
///
/// `html` is kept for completeness but never rendered: it is remote markup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OEmbedResponse {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OEmbedFormat {
    Json,
    Xml,
}

impl OEmbedFormat {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = mime_essence(content_type);
        if essence.contains("html") {
            None
        } else if essence.ends_with("json") {
            Some(OEmbedFormat::Json)
        } else if essence.ends_with("xml") {
            Some(OEmbedFormat::Xml)
        } else {
            None
        }
    }
}

impl OEmbedResponse {
    pub fn parse(body: &str, format: OEmbedFormat) -> Result<Self, PreviewError> {
        let parsed = match format {
            OEmbedFormat::Json => serde_json::from_str::<OEmbedResponse>(body)
                .map_err(|e| PreviewError::extraction(format!("invalid oEmbed JSON: {e}")))?,
            OEmbedFormat::Xml => quick_xml::de::from_str::<OEmbedResponse>(body)
                .map_err(|e| PreviewError::extraction(format!("invalid oEmbed XML: {e}")))?,
        };
        Ok(parsed.trimmed())
    }

    fn trimmed(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }
        Self {
            kind: clean(self.kind),
            title: clean(self.title),
            author_name: clean(self.author_name),
            provider_name: clean(self.provider_name),
            thumbnail_url: clean(self.thumbnail_url),
            html: clean(self.html),
        }
    }
}

/// Finds the first oEmbed discovery link in a document, JSON preferred.
pub fn discover(document: &Html, base: &Url) -> Option<(Url, OEmbedFormat)> {
    let selector = Selector::parse("link[rel~='alternate'][href][type]").ok()?;

    let mut xml = None;
    for link in document.select(&selector) {
        let kind = link.value().attr("type").unwrap_or_default().to_ascii_lowercase();
        let Some(href) = link
            .value()
            .attr("href")
            .and_then(|href| resolve_url(href, base))
            .and_then(|href| Url::parse(&href).ok())
        else {
            continue;
        };

        match kind.trim() {
            "application/json+oembed" => return Some((href, OEmbedFormat::Json)),
            "text/xml+oembed" | "application/xml+oembed" if xml.is_none() => {
                xml = Some((href, OEmbedFormat::Xml));
            }
            _ => {}
        }
    }
    xml
}
