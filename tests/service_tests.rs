use onebox_preview::{
    Fetcher, FetcherConfig, PreviewError, PreviewGenerator, PreviewService, PreviewServiceConfig,
    RenderedPreview, UrlPreviewGenerator, UrlValidationConfig, MAX_TITLE_LENGTH,
};
use std::sync::Arc;
use std::time::Duration;
use unicode_segmentation::UnicodeSegmentation;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROVIDER_HOSTS: [&str; 5] = [
    "www.collegehumor.com",
    "www.youtube.com",
    "vimeo.com",
    "github.com",
    "twitter.com",
];

/// Fetcher that sends every provider host to the mock server.
fn provider_fetcher(server: &MockServer) -> Fetcher {
    let config = PROVIDER_HOSTS.iter().fold(
        FetcherConfig::default().with_validation(UrlValidationConfig::permissive()),
        |config, host| config.with_resolve_override(*host, *server.address()),
    );
    Fetcher::new_with_config(config).unwrap()
}

fn service(server: &MockServer) -> PreviewService {
    service_with(server, PreviewServiceConfig::new(100))
}

fn service_with(server: &MockServer, config: PreviewServiceConfig) -> PreviewService {
    PreviewService::new_with_config(config.with_fetcher(provider_fetcher(server)))
}

fn provider_url(server: &MockServer, host: &str, path_and_query: &str) -> String {
    format!("http://{host}:{}{path_and_query}", server.address().port())
}

fn html_page(head: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<!DOCTYPE html><html><head>{head}</head><body><p>body</p></body></html>"),
        "text/html; charset=utf-8",
    )
}

const COLLEGEHUMOR_HEAD: &str = r#"
    <title>CollegeHumor</title>
    <meta property="og:title" content="Mitt Romney Style <Gangnam Style Parody> & more">
    <meta property="og:description" content="Mitt Romney dances his way to victory.">
    <meta property="og:image" content="http://0.static.collegehumor.cvcdn.com/84/36/ch.jpg">
"#;

#[tokio::test]
async fn test_video_page_renders_escaped_title_and_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/6446038/mitt-romney-style"))
        .respond_with(html_page(COLLEGEHUMOR_HEAD))
        .expect(1)
        .mount(&server)
        .await;

    let url = provider_url(&server, "www.collegehumor.com", "/video/6446038/mitt-romney-style");
    let result = service(&server).resolve(&url).await;

    assert!(result.ok, "{}", result.html);
    assert!(result.html.contains(r#"<aside class="onebox college_humor""#));
    assert!(result
        .html
        .contains("Mitt Romney Style &lt;Gangnam Style Parody&gt; &amp; more"));
    assert!(result.html.contains(&url));
    assert!(result
        .html
        .contains(r#"<iframe src="https://www.collegehumor.com/e/6446038""#));
    assert!(!result.html.contains("<Gangnam"));
}

#[tokio::test]
async fn test_not_found_renders_only_the_link() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing?a=1&b=<2>", server.uri());
    let service = PreviewService::new_with_config(
        PreviewServiceConfig::new(100).with_fetcher(provider_fetcher(&server)),
    );
    let result = service.resolve(&url).await;

    let escaped = url.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
    assert_eq!(
        result,
        RenderedPreview {
            html: format!(
                r#"<a href="{escaped}" class="onebox" target="_blank" rel="noopener nofollow ugc">{escaped}</a>"#
            ),
            ok: false,
        }
    );
}

#[tokio::test]
async fn test_success_cached_within_ttl() {
    let server = MockServer::start().await;
    Mock::given(path("/article"))
        .respond_with(html_page(r#"<meta property="og:title" content="Cached article">"#))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server);
    let url = format!("{}/article", server.uri());

    let first = service.resolve(&url).await;
    // Fragments do not change the key.
    let second = service.resolve(&format!("{url}#comments")).await;

    assert!(first.ok);
    assert_eq!(first, second);
    assert_eq!(service.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_failure_cached_within_negative_ttl() {
    let server = MockServer::start().await;
    Mock::given(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server);
    let url = format!("{}/down", server.uri());

    assert!(!service.resolve(&url).await.ok);
    assert!(!service.resolve(&url).await.ok);
}

#[tokio::test]
async fn test_refused_connection_cached_as_failure() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let fetcher = Fetcher::new_with_config(
        FetcherConfig::default().with_validation(UrlValidationConfig::permissive()),
    )
    .unwrap();
    let service =
        PreviewService::new_with_config(PreviewServiceConfig::new(10).with_fetcher(fetcher));
    let url = format!("http://{addr}/gone");

    let first = service.resolve(&url).await;
    let second = service.resolve(&url).await;

    assert!(!first.ok);
    assert!(first.html.contains(&url));
    assert_eq!(first, second);
    assert_eq!(service.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_redirected_page_links_to_shared_url() {
    let server = MockServer::start().await;
    Mock::given(path("/short"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", "/canonical/long-article"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/canonical/long-article"))
        .respond_with(html_page(r#"<meta property="og:title" content="Long Article">"#))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/short", server.uri());
    let result = service(&server).resolve(&url).await;

    assert!(result.ok, "{}", result.html);
    assert!(result.html.contains("Long Article"));
    assert!(result.html.contains(&format!(r#"data-onebox-src="{url}""#)));
    assert!(result.html.contains(&format!(r#"<a href="{url}""#)));
    assert!(!result.html.contains("/canonical/long-article"));
}

#[tokio::test]
async fn test_failure_refetched_after_negative_ttl() {
    let server = MockServer::start().await;
    Mock::given(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let service = service_with(
        &server,
        PreviewServiceConfig::new(100).with_negative_ttl(Duration::from_millis(100)),
    );
    let url = format!("{}/flaky", server.uri());

    assert!(!service.resolve(&url).await.ok);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!service.resolve(&url).await.ok);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_fetch() {
    let server = MockServer::start().await;
    Mock::given(path("/popular"))
        .respond_with(
            html_page(r#"<meta property="og:title" content="Everyone wants this">"#)
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = Arc::new(service(&server));
    let url = format!("{}/popular", server.uri());

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = Arc::clone(&service);
            let url = url.clone();
            tokio::spawn(async move { service.resolve(&url).await })
        })
        .collect();

    let results: Vec<RenderedPreview> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert!(results[0].ok);
    assert!(results.iter().all(|r| r == &results[0]));
}

#[tokio::test]
async fn test_cancelled_caller_does_not_cancel_fetch() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(
            html_page(r#"<meta property="og:title" content="Worth the wait">"#)
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server);
    let url = format!("{}/slow", server.uri());

    let impatient = service
        .resolve_with_timeout(&url, Duration::from_millis(50))
        .await;
    assert!(matches!(impatient, Err(PreviewError::Timeout(_))));

    tokio::time::sleep(Duration::from_millis(600)).await;
    let result = service.resolve(&url).await;
    assert!(result.ok);
    assert!(result.html.contains("Worth the wait"));
}

#[tokio::test]
async fn test_no_cache_refetches() {
    let server = MockServer::start().await;
    Mock::given(path("/fresh"))
        .respond_with(html_page("<title>Always fresh</title>"))
        .expect(2)
        .mount(&server)
        .await;

    let service = service_with(&server, PreviewServiceConfig::new(0));
    let url = format!("{}/fresh", server.uri());
    assert!(service.resolve(&url).await.ok);
    assert!(service.resolve(&url).await.ok);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(path("/edited"))
        .respond_with(html_page("<title>Edited</title>"))
        .expect(2)
        .mount(&server)
        .await;

    let service = service(&server);
    let url = format!("{}/edited", server.uri());
    assert!(service.resolve(&url).await.ok);
    assert!(service.invalidate(&url));
    assert!(service.resolve(&url).await.ok);
}

#[tokio::test]
async fn test_malformed_input_never_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let service = service(&server);
    for input in ["", "not a url", "javascript:alert(1)", "ftp://example.com/file", "http://"] {
        let result = service.resolve(input).await;
        assert!(!result.ok);
        assert_eq!(result.html, "", "input {input:?}");
    }
}

#[tokio::test]
async fn test_oembed_takes_precedence_over_open_graph() {
    let server = MockServer::start().await;
    let oembed_href = format!("{}/oembed?format=json", server.uri());
    let head = format!(
        r#"
        <link rel="alternate" type="application/json+oembed" href="{oembed_href}">
        <meta property="og:title" content="Open Graph title">
        <meta property="og:description" content="Open Graph description">
        <meta property="og:site_name" content="OG Site">
        <title>Document title</title>
    "#
    );
    Mock::given(path("/story"))
        .respond_with(html_page(&head))
        .mount(&server)
        .await;
    Mock::given(path("/oembed"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "rich",
            "version": "1.0",
            "title": "oEmbed title",
            "provider_name": "oEmbed Provider",
            "html": "<script>alert(1)</script>"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generator = UrlPreviewGenerator::new_with_fetcher(provider_fetcher(&server));
    let data = generator
        .generate_preview(&format!("{}/story", server.uri()))
        .await
        .unwrap();

    assert_eq!(data.title, "oEmbed title");
    assert_eq!(data.site_name.as_deref(), Some("oEmbed Provider"));
    // Fields oEmbed lacks come from the next layer down.
    assert_eq!(data.description.as_deref(), Some("Open Graph description"));
    assert_eq!(data.embed_html, None);
}

#[tokio::test]
async fn test_broken_oembed_falls_back_to_open_graph() {
    let server = MockServer::start().await;
    let head = format!(
        r#"<link rel="alternate" type="application/json+oembed" href="{}/oembed">
           <meta property="og:title" content="Open Graph title">"#,
        server.uri()
    );
    Mock::given(path("/story"))
        .respond_with(html_page(&head))
        .mount(&server)
        .await;
    Mock::given(path("/oembed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let generator = UrlPreviewGenerator::new_with_fetcher(provider_fetcher(&server));
    let data = generator
        .generate_preview(&format!("{}/story", server.uri()))
        .await
        .unwrap();
    assert_eq!(data.title, "Open Graph title");
}

#[tokio::test]
async fn test_open_graph_over_twitter_card_over_title() {
    let server = MockServer::start().await;
    Mock::given(path("/layers"))
        .respond_with(html_page(
            r#"
            <title>Document title</title>
            <meta name="description" content="Plain description">
            <meta name="twitter:title" content="Card title">
            <meta name="twitter:description" content="Card description">
            <meta property="og:title" content="Open Graph title">
        "#,
        ))
        .mount(&server)
        .await;

    let generator = UrlPreviewGenerator::new_with_fetcher(provider_fetcher(&server));
    let data = generator
        .generate_preview(&format!("{}/layers", server.uri()))
        .await
        .unwrap();

    assert_eq!(data.title, "Open Graph title");
    assert_eq!(data.description.as_deref(), Some("Card description"));
}

#[tokio::test]
async fn test_long_title_truncated() {
    let server = MockServer::start().await;
    let long_title = "Très long titre ".repeat(20);
    Mock::given(path("/long"))
        .respond_with(html_page(&format!("<title>{long_title}</title>")))
        .mount(&server)
        .await;

    let generator = UrlPreviewGenerator::new_with_fetcher(provider_fetcher(&server));
    let data = generator
        .generate_preview(&format!("{}/long", server.uri()))
        .await
        .unwrap();

    assert!(data.title.ends_with("..."));
    assert!(data.title.graphemes(true).count() <= MAX_TITLE_LENGTH);
}

#[tokio::test]
async fn test_youtube_page_gets_player_embed() {
    let server = MockServer::start().await;
    Mock::given(path("/watch"))
        .and(query_param("v", "dQw4w9WgXcQ"))
        .respond_with(html_page(
            r#"<meta property="og:title" content="Never Gonna Give You Up">"#,
        ))
        .mount(&server)
        .await;

    let url = provider_url(&server, "www.youtube.com", "/watch?v=dQw4w9WgXcQ");
    let result = service(&server).resolve(&url).await;

    assert!(result.ok);
    assert!(result.html.contains(r#"<aside class="onebox youtube""#));
    assert!(result
        .html
        .contains(r#"<iframe src="https://www.youtube.com/embed/dQw4w9WgXcQ""#));
    assert!(result.html.contains("Never Gonna Give You Up"));
}

#[tokio::test]
async fn test_github_repo_without_metadata_uses_repo_name() {
    let server = MockServer::start().await;
    Mock::given(path("/rust-lang/rust"))
        .respond_with(html_page(""))
        .mount(&server)
        .await;

    let generator = UrlPreviewGenerator::new_with_fetcher(provider_fetcher(&server));
    let data = generator
        .generate_preview(&provider_url(&server, "github.com", "/rust-lang/rust"))
        .await
        .unwrap();

    assert_eq!(data.title, "rust-lang/rust");
    assert_eq!(data.site_name.as_deref(), Some("GitHub"));
}

#[tokio::test]
async fn test_page_without_metadata_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(path("/bare"))
        .respond_with(html_page(""))
        .mount(&server)
        .await;

    let url = format!("{}/bare", server.uri());
    let generator = UrlPreviewGenerator::new_with_fetcher(provider_fetcher(&server));
    assert!(matches!(
        generator.generate_preview(&url).await,
        Err(PreviewError::ExtractionFailure { .. })
    ));

    let result = service(&server).resolve(&url).await;
    assert!(!result.ok);
    assert!(result.html.starts_with("<a href="));
}
