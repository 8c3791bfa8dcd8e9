use crate::security::{GuardedResolver, UrlValidationConfig, UrlValidator};
use crate::utils::mime_essence;
use crate::PreviewError;
use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE, LOCATION},
    Client, Response,
};
use std::error::Error as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = concat!("onebox-preview/", env!("CARGO_PKG_VERSION"));

/// Resource bounds for a single retrieval, redirects included.
#[derive(Debug, Clone)]
pub struct FetchBudget {
    pub max_redirects: usize,
    /// Wall clock for the whole retrieval: every hop, headers and body.
    pub timeout: Duration,
    pub max_bytes: u64,
    /// Media types accepted for the final response. Empty accepts anything.
    pub allowed_content_types: Vec<String>,
}

impl Default for FetchBudget {
    fn default() -> Self {
        Self::page()
    }
}

impl FetchBudget {
    /// Budget for the page being previewed.
    pub fn page() -> Self {
        Self {
            max_redirects: 5,
            timeout: Duration::from_secs(10),
            max_bytes: 2 * 1024 * 1024,
            allowed_content_types: [
                "text/html",
                "application/xhtml+xml",
                "application/json",
                "application/xml",
                "text/xml",
            ]
            .map(String::from)
            .to_vec(),
        }
    }

    /// Tighter budget for secondary oEmbed lookups.
    pub fn oembed() -> Self {
        Self {
            max_redirects: 2,
            timeout: Duration::from_secs(3),
            max_bytes: 64 * 1024,
            allowed_content_types: [
                "application/json",
                "application/json+oembed",
                "text/javascript",
                "application/xml",
                "text/xml",
                "text/xml+oembed",
            ]
            .map(String::from)
            .to_vec(),
        }
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn accepts(&self, content_type: Option<&str>) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = mime_essence(content_type);
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
    }
}

/// A successfully retrieved response body.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// URL of the response actually read, after redirects.
    pub final_url: Url,
    pub status: u16,
}

pub type FetchResult = Result<FetchedResource, PreviewError>;

/// Transport settings supplied by the hosting application.
///
/// # Examples
/// ```ignore
/// let fetcher = Fetcher::new_with_config(FetcherConfig {
///     user_agent: "my-forum/2.0 (+https://forum.example)".to_string(),
///     proxy: Some("http://proxy.internal:3128".to_string()),
///     ..FetcherConfig::default()
/// })?;
/// ```
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub headers: Option<HeaderMap>,
    pub proxy: Option<String>,
    /// Static name resolution, applied before the system resolver and
    /// checked against the validation policy like any other lookup.
    pub resolve_overrides: Vec<(String, SocketAddr)>,
    pub validation: UrlValidationConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(5),
            headers: None,
            proxy: None,
            resolve_overrides: Vec::new(),
            validation: UrlValidationConfig::default(),
        }
    }
}

impl FetcherConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_validation(mut self, validation: UrlValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_resolve_override(mut self, domain: impl Into<String>, addr: SocketAddr) -> Self {
        self.resolve_overrides.push((domain.into(), addr));
        self
    }
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    validator: UrlValidator,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        debug!("Fetcher initialized with default configuration");
        Self::new_with_config(FetcherConfig::default()).unwrap_or_else(|e| {
            error!(error = %e, "Failed to create HTTP client");
            panic!("Failed to initialize HTTP client: {}", e);
        })
    }

    pub fn new_with_config(config: FetcherConfig) -> Result<Self, PreviewError> {
        let mut client_builder = Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(config.connect_timeout)
            // Redirects are followed by hand so every hop is validated and counted.
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(10);

        if let Some(headers) = config.headers {
            client_builder = client_builder.default_headers(headers);
        }

        let mut resolver = GuardedResolver::new(&config.validation, &config.resolve_overrides);
        if let Some(proxy) = config.proxy {
            let proxy_host = Url::parse(&proxy)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string));
            let proxy = reqwest::Proxy::all(&proxy)
                .map_err(|e| PreviewError::Network(format!("invalid proxy '{proxy}': {e}")))?;
            client_builder = client_builder.proxy(proxy);
            if let Some(host) = proxy_host {
                resolver = resolver.trusting(host);
            }
        }
        client_builder = client_builder.dns_resolver(Arc::new(resolver));

        let client = client_builder
            .build()
            .map_err(|e| PreviewError::Network(e.to_string()))?;

        Ok(Self {
            client,
            validator: UrlValidator::new(config.validation),
        })
    }

    /// Retrieves `url` within `budget`. Exhausting any bound is a typed failure.
    #[instrument(level = "debug", skip(self, budget), err)]
    pub async fn fetch(&self, url: &Url, budget: &FetchBudget) -> FetchResult {
        match tokio::time::timeout(budget.timeout, self.fetch_within(url, budget)).await {
            Ok(result) => result,
            Err(_) => Err(PreviewError::Timeout(format!(
                "no complete response within {:?}",
                budget.timeout
            ))),
        }
    }

    async fn fetch_within(&self, url: &Url, budget: &FetchBudget) -> FetchResult {
        let mut current = url.clone();
        let mut redirects = 0;

        loop {
            // Resolved addresses are checked by the client's resolver at connect time.
            self.validator.validate_url(&current)?;

            debug!(url = %current, hop = redirects, "Sending request");
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status();
            if status.is_redirection() {
                if let Some(next) = redirect_target(&response, &current) {
                    if redirects >= budget.max_redirects {
                        return Err(PreviewError::TooManyRedirects {
                            limit: budget.max_redirects,
                        });
                    }
                    redirects += 1;
                    debug!(from = %current, to = %next, "Following redirect");
                    current = next;
                    continue;
                }
            }

            if !status.is_success() {
                return Err(PreviewError::HttpError {
                    status: status.as_u16(),
                });
            }

            return read_body(response, current, budget).await;
        }
    }
}

fn redirect_target(response: &Response, current: &Url) -> Option<Url> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

async fn read_body(response: Response, final_url: Url, budget: &FetchBudget) -> FetchResult {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    if !budget.accepts(content_type.as_deref()) {
        return Err(PreviewError::UnsupportedContentType(
            content_type.unwrap_or_else(|| "<none>".to_string()),
        ));
    }

    if let Some(declared) = response.content_length() {
        if declared > budget.max_bytes {
            return Err(PreviewError::TooLarge {
                max_bytes: budget.max_bytes,
            });
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest_error)?;
        if bytes.len() as u64 + chunk.len() as u64 > budget.max_bytes {
            return Err(PreviewError::TooLarge {
                max_bytes: budget.max_bytes,
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    debug!(url = %final_url, content_length = bytes.len(), "Successfully fetched resource");
    Ok(FetchedResource {
        bytes,
        content_type,
        final_url,
        status,
    })
}

fn map_reqwest_error(err: reqwest::Error) -> PreviewError {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(preview_error) = cause.downcast_ref::<PreviewError>() {
            return preview_error.clone();
        }
        source = cause.source();
    }
    if err.is_timeout() {
        return PreviewError::Timeout(err.to_string());
    }
    PreviewError::Network(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_content_types() {
        let budget = FetchBudget::page();
        assert!(budget.accepts(Some("text/html; charset=UTF-8")));
        assert!(budget.accepts(Some("Application/XHTML+XML")));
        assert!(!budget.accepts(Some("image/png")));
        assert!(!budget.accepts(None));

        let open = FetchBudget {
            allowed_content_types: Vec::new(),
            ..FetchBudget::page()
        };
        assert!(open.accepts(None));
    }

    #[test]
    fn test_oembed_budget_is_tighter() {
        let page = FetchBudget::page();
        let oembed = FetchBudget::oembed();
        assert!(oembed.max_bytes < page.max_bytes);
        assert!(oembed.timeout < page.timeout);
    }

    #[tokio::test]
    async fn test_fetch_blocks_loopback_by_default() {
        let fetcher = Fetcher::new();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = fetcher.fetch(&url, &FetchBudget::page()).await.unwrap_err();
        assert!(matches!(err, PreviewError::Blocked(_)));
    }
}
