//! HTML fragments for previews.
//!
//! Every remote string goes through `htmlescape`; `embed_html` is the only
//! raw markup and is produced by [`Engine::embed_html`] from validated ids.

use crate::engine::{Engine, Template};
use crate::PreviewData;
use htmlescape::encode_minimal;
use std::fmt::Write;
use url::Url;

const LINK_ATTRS: &str = r#"target="_blank" rel="noopener nofollow ugc""#;

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Self
    }

    /// Renders a preview of `url`, the address the caller shared. Links point
    /// there rather than at `data.source_url`, which is where redirects ended.
    /// Never fails; a preview without any usable field degrades to the
    /// link-only fragment.
    pub fn render(&self, engine: Engine, url: &str, data: &PreviewData) -> String {
        let Some(href) = safe_href(url) else {
            return String::new();
        };
        if data.title.is_empty() && data.embed_html.is_none() {
            return self.fallback(url);
        }

        let mut html = String::new();
        let _ = write!(
            html,
            r#"<aside class="onebox {engine_id}" data-onebox-src="{href}">"#,
            engine_id = engine.id(),
        );
        self.write_header(&mut html, &href, url, data);
        html.push_str(r#"<article class="onebox-body">"#);

        match engine.template() {
            Template::Video => self.write_video_body(&mut html, &href, data),
            Template::Generic => self.write_generic_body(&mut html, &href, data),
        }

        html.push_str("</article></aside>");
        html
    }

    /// Link-only fragment for a URL that could not be previewed. Input that
    /// is not an http(s) URL renders as nothing.
    pub fn fallback(&self, url: &str) -> String {
        match safe_href(url) {
            Some(href) => format!(r#"<a href="{href}" class="onebox" {LINK_ATTRS}>{href}</a>"#),
            None => String::new(),
        }
    }

    fn write_header(&self, html: &mut String, href: &str, url: &str, data: &PreviewData) {
        html.push_str(r#"<header class="source">"#);
        if let Some(favicon) = data.favicon.as_deref().and_then(safe_href) {
            let _ = write!(html, r#"<img src="{favicon}" class="site-icon" width="16" height="16">"#);
        }
        let label = data
            .site_name
            .as_deref()
            .map(encode_minimal)
            .unwrap_or_else(|| host_label(url));
        let _ = write!(html, r#"<a href="{href}" {LINK_ATTRS}>{label}</a></header>"#);
    }

    fn write_video_body(&self, html: &mut String, href: &str, data: &PreviewData) {
        match &data.embed_html {
            Some(embed) => {
                html.push_str(r#"<div class="video-container">"#);
                html.push_str(embed);
                html.push_str("</div>");
            }
            None => self.write_thumbnail(html, href, data),
        }
        self.write_title(html, href, data);
        self.write_description(html, data);
    }

    fn write_generic_body(&self, html: &mut String, href: &str, data: &PreviewData) {
        self.write_thumbnail(html, href, data);
        self.write_title(html, href, data);
        self.write_description(html, data);
    }

    fn write_thumbnail(&self, html: &mut String, href: &str, data: &PreviewData) {
        if let Some(image) = data.image_url.as_deref().and_then(safe_href) {
            let _ = write!(
                html,
                r#"<a href="{href}" {LINK_ATTRS}><img src="{image}" class="thumbnail"></a>"#
            );
        }
    }

    fn write_title(&self, html: &mut String, href: &str, data: &PreviewData) {
        if !data.title.is_empty() {
            let _ = write!(
                html,
                r#"<h3><a href="{href}" {LINK_ATTRS}>{}</a></h3>"#,
                encode_minimal(&data.title)
            );
        }
    }

    fn write_description(&self, html: &mut String, data: &PreviewData) {
        if let Some(description) = &data.description {
            let _ = write!(html, "<p>{}</p>", encode_minimal(description));
        }
    }
}

/// Escaped URL for a double-quoted attribute, or `None` unless it is an
/// absolute http(s) URL.
fn safe_href(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    matches!(parsed.scheme(), "http" | "https").then(|| encode_minimal(url.trim()))
}

fn host_label(url: &str) -> String {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(encode_minimal))
        .unwrap_or_default()
}
