//! Provider engines and the registry that picks one for a URL.
//!
//! Matching is a pure function of the URL and the registry: no network I/O
//! and no per-request state.

use crate::PreviewError;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static YOUTUBE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"));

static NUMERIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,20}$").expect("static regex"));

static GITHUB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,100}$").expect("static regex"));

/// A registered extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    YouTube,
    Vimeo,
    CollegeHumor,
    Twitter,
    GitHub,
    Generic,
}

/// Which HTML layout the renderer uses for an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Generic,
    Video,
}

impl Engine {
    pub const ALL: [Engine; 6] = [
        Engine::YouTube,
        Engine::Vimeo,
        Engine::CollegeHumor,
        Engine::Twitter,
        Engine::GitHub,
        Engine::Generic,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Engine::YouTube => "youtube",
            Engine::Vimeo => "vimeo",
            Engine::CollegeHumor => "college_humor",
            Engine::Twitter => "twitter",
            Engine::GitHub => "github",
            Engine::Generic => "generic",
        }
    }

    /// Lower is tried first. The generic engine is always last.
    pub fn priority(&self) -> u32 {
        match self {
            Engine::YouTube => 10,
            Engine::Vimeo => 20,
            Engine::CollegeHumor => 30,
            Engine::Twitter => 40,
            Engine::GitHub => 50,
            Engine::Generic => u32::MAX,
        }
    }

    pub fn template(&self) -> Template {
        match self {
            Engine::YouTube | Engine::Vimeo | Engine::CollegeHumor => Template::Video,
            _ => Template::Generic,
        }
    }

    /// Display name used when the page does not announce one.
    pub fn site_name(&self) -> Option<&'static str> {
        match self {
            Engine::YouTube => Some("YouTube"),
            Engine::Vimeo => Some("Vimeo"),
            Engine::CollegeHumor => Some("CollegeHumor"),
            Engine::Twitter => Some("X (formerly Twitter)"),
            Engine::GitHub => Some("GitHub"),
            Engine::Generic => None,
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        match self {
            Engine::Generic => true,
            _ => self.media_id(url).is_some(),
        }
    }

    /// The validated provider identifier carried by the URL, if any.
    ///
    /// Only values returned from here are ever slotted into embed markup.
    pub fn media_id(&self, url: &Url) -> Option<String> {
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        let host = host.trim_end_matches('.');
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match self {
            Engine::YouTube => youtube_id(host, &segments, url),
            Engine::Vimeo => {
                if !host_is(host, "vimeo.com") {
                    return None;
                }
                segments
                    .last()
                    .filter(|id| NUMERIC_ID.is_match(id))
                    .map(|id| id.to_string())
            }
            Engine::CollegeHumor => {
                if !host_is(host, "collegehumor.com") {
                    return None;
                }
                match segments.as_slice() {
                    ["video", id, ..] if NUMERIC_ID.is_match(id) => Some(id.to_string()),
                    _ => None,
                }
            }
            Engine::Twitter => {
                if !host_is(host, "twitter.com") && !host_is(host, "x.com") {
                    return None;
                }
                match segments.as_slice() {
                    [_, "status", id, ..] if NUMERIC_ID.is_match(id) => Some(id.to_string()),
                    _ => None,
                }
            }
            Engine::GitHub => {
                if !host_is(host, "github.com") {
                    return None;
                }
                match segments.as_slice() {
                    [owner, repo, ..]
                        if GITHUB_NAME.is_match(owner) && GITHUB_NAME.is_match(repo) =>
                    {
                        Some(format!("{owner}/{}", repo.trim_end_matches(".git")))
                    }
                    _ => None,
                }
            }
            Engine::Generic => None,
        }
    }

    /// Fixed player markup built from a validated id.
    pub fn embed_html(&self, media_id: &str) -> Option<String> {
        let src = match self {
            Engine::YouTube if YOUTUBE_ID.is_match(media_id) => {
                format!("https://www.youtube.com/embed/{media_id}")
            }
            Engine::Vimeo if NUMERIC_ID.is_match(media_id) => {
                format!("https://player.vimeo.com/video/{media_id}")
            }
            Engine::CollegeHumor if NUMERIC_ID.is_match(media_id) => {
                format!("https://www.collegehumor.com/e/{media_id}")
            }
            _ => return None,
        };
        Some(format!(
            r#"<iframe src="{src}" width="480" height="270" frameborder="0" allowfullscreen></iframe>"#
        ))
    }
}

fn host_is(host: &str, domain: &str) -> bool {
    host == domain || host.strip_suffix(domain).is_some_and(|p| p.ends_with('.'))
}

fn youtube_id(host: &str, segments: &[&str], url: &Url) -> Option<String> {
    let candidate = if host_is(host, "youtu.be") {
        segments.first().map(|s| s.to_string())
    } else if host_is(host, "youtube.com") || host_is(host, "youtube-nocookie.com") {
        match segments {
            ["watch"] => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            ["embed" | "shorts" | "v" | "live", id, ..] => Some(id.to_string()),
            _ => None,
        }
    } else {
        None
    };
    candidate.filter(|id| YOUTUBE_ID.is_match(id))
}

/// Ordered, immutable set of engines built once at startup.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    engines: Vec<Engine>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(Engine::ALL)
    }
}

impl EngineRegistry {
    /// Builds a registry from the given engines. Order of the input does not
    /// matter; engines are sorted by priority and the generic fallback is
    /// always present.
    pub fn new(engines: impl IntoIterator<Item = Engine>) -> Self {
        let mut engines: Vec<Engine> = engines.into_iter().collect();
        if !engines.contains(&Engine::Generic) {
            engines.push(Engine::Generic);
        }
        engines.sort_by_key(Engine::priority);
        engines.dedup();
        Self { engines }
    }

    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }

    pub fn resolve(&self, url: &Url) -> Engine {
        self.engines
            .iter()
            .copied()
            .find(|engine| engine.matches(url))
            .unwrap_or(Engine::Generic)
    }

    /// Parses and screens the input, then resolves. Engine resolution is never
    /// attempted on malformed input.
    pub fn resolve_str(&self, url: &str) -> Result<(Url, Engine), PreviewError> {
        let parsed = Url::parse(url.trim())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PreviewError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(PreviewError::InvalidUrl("No host in URL".to_string()));
        }
        let engine = self.resolve(&parsed);
        Ok((parsed, engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(url: &str) -> Engine {
        EngineRegistry::default().resolve_str(url).unwrap().1
    }

    #[test]
    fn test_registry_is_priority_ordered() {
        let registry = EngineRegistry::new([Engine::Generic, Engine::GitHub, Engine::YouTube]);
        assert_eq!(
            registry.engines(),
            &[Engine::YouTube, Engine::GitHub, Engine::Generic]
        );
        assert_eq!(EngineRegistry::new([]).engines(), &[Engine::Generic]);
    }

    #[test]
    fn test_youtube_urls() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "http://youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://m.youtube.com/shorts/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "HTTPS://WWW.YOUTUBE.COM/embed/dQw4w9WgXcQ",
        ] {
            assert_eq!(resolve(url), Engine::YouTube, "{url}");
        }
        assert_eq!(resolve("https://www.youtube.com/watch?v=short"), Engine::Generic);
        assert_eq!(resolve("https://notyoutube.com/watch?v=dQw4w9WgXcQ"), Engine::Generic);
    }

    #[test]
    fn test_provider_urls() {
        assert_eq!(resolve("https://vimeo.com/76979871"), Engine::Vimeo);
        assert_eq!(
            resolve("http://www.collegehumor.com/video/6446038/mitt-romney-style"),
            Engine::CollegeHumor
        );
        assert_eq!(resolve("https://x.com/rustlang/status/1234567890"), Engine::Twitter);
        assert_eq!(resolve("https://github.com/rust-lang/rust"), Engine::GitHub);
        assert_eq!(resolve("https://github.com/rust-lang"), Engine::Generic);
        assert_eq!(resolve("https://example.com/video/1"), Engine::Generic);
    }

    #[test]
    fn test_scheme_equivalence() {
        let registry = EngineRegistry::default();
        let (_, a) = registry.resolve_str("http://vimeo.com/1").unwrap();
        let (_, b) = registry.resolve_str("https://vimeo.com/1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_urls_rejected() {
        let registry = EngineRegistry::default();
        for url in ["", "not a url", "ftp://vimeo.com/1", "mailto:someone@example.com"] {
            assert!(
                matches!(registry.resolve_str(url), Err(PreviewError::InvalidUrl(_))),
                "{url}"
            );
        }
    }

    #[test]
    fn test_embed_only_from_validated_ids() {
        assert!(Engine::YouTube.embed_html("dQw4w9WgXcQ").is_some());
        assert!(Engine::YouTube.embed_html("\"><script>").is_none());
        assert!(Engine::Vimeo.embed_html("12a").is_none());
        assert!(Engine::GitHub.embed_html("a/b").is_none());
    }
}
