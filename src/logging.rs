use crate::utils::truncate_str;
use crate::PreviewData;
use std::fmt::Display;
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

#[derive(Debug)]
pub struct LogConfig {
    pub log_dir: PathBuf,
    pub log_level: String,
    pub console_output: bool,
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".into(),
            log_level: "info".into(),
            console_output: true,
            file_output: false,
        }
    }
}

const CARD_WIDTH: usize = 72;
const LABEL_WIDTH: usize = 7;
const CONTENT_WIDTH: usize = CARD_WIDTH - LABEL_WIDTH - 4;

fn card_line(label: &str, value: &str) -> String {
    format!(
        "║ {:<label_width$}{:<content_width$} ║",
        label,
        truncate_str(value, CONTENT_WIDTH),
        label_width = LABEL_WIDTH,
        content_width = CONTENT_WIDTH,
    )
}

/// Writes a boxed summary of a preview at info level.
pub fn log_preview_card(preview: &PreviewData) {
    let border = "═".repeat(CARD_WIDTH - 2);
    let or_na = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());

    info!(
        "\n╔{border}╗\n{}\n{}\n{}\n{}\n{}\n{}\n╚{border}╝",
        card_line("URL:", &preview.source_url),
        card_line("Title:", &preview.title),
        card_line("Desc:", &or_na(&preview.description)),
        card_line("Image:", &or_na(&preview.image_url)),
        card_line("Site:", &or_na(&preview.site_name)),
        card_line("Embed:", if preview.embed_html.is_some() { "yes" } else { "no" }),
    );
}

pub fn log_error_card<E: Display + std::error::Error>(url: &str, error: &E) {
    let border = "═".repeat(CARD_WIDTH - 2);
    let divider = "─".repeat(CARD_WIDTH - 2);

    let mut details = error.to_string();
    if let Some(source) = error.source() {
        details = format!("{details} (caused by: {source})");
    }

    error!(
        "\n╔{border}╗\n{}\n║{divider}║\n{}\n╚{border}╝",
        card_line("URL:", url),
        card_line("Error:", &details),
    );
}

/// Installs the global subscriber. Honors `RUST_LOG` over `config.log_level`.
pub fn setup_logging(config: LogConfig) -> std::io::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let mut layers = Vec::new();

    if config.console_output {
        let console_layer = subscriber_fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .compact();
        layers.push(console_layer.boxed());
    }

    if config.file_output {
        std::fs::create_dir_all(&config.log_dir)?;

        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "onebox-preview.log");

        let file_layer = subscriber_fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .with_writer(file_appender);

        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(std::io::Error::other)?;

    debug!("Logging system initialized with config: {:?}", config);
    Ok(())
}

/// Scoped subscriber for tests and tools; restored on drop.
pub struct LogLevelGuard {
    _guard: tracing::dispatcher::DefaultGuard,
}

impl LogLevelGuard {
    pub fn set_level(level: &str) -> Self {
        let filter = EnvFilter::new(level);
        let subscriber = tracing_subscriber::registry()
            .with(subscriber_fmt::layer().with_test_writer())
            .with(filter);

        LogLevelGuard {
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }
}
