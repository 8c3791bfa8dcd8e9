use clap::{Arg, ArgAction, Command};
use colored::Colorize;
use onebox_preview::{
    log_error_card, log_preview_card, setup_logging, FetchBudget, Fetcher, FetcherConfig,
    LogConfig, PreviewService, PreviewServiceConfig, UrlValidationConfig,
};
use std::error::Error;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = Command::new("onebox preview")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Unfurl URLs into preview HTML fragments")
        .arg(
            Arg::new("urls")
                .help("URLs to preview")
                .required(true)
                .num_args(1..),
        )
        .arg(
            Arg::new("blacklist")
                .short('b')
                .long("blacklist")
                .help("Block these domains (comma-separated)")
                .value_name("DOMAINS"),
        )
        .arg(
            Arg::new("allow-private")
                .long("allow-private")
                .help("Allow private IPs and localhost (DANGEROUS)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .help("Per-page timeout in seconds (default: 10)")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("data")
                .long("data")
                .help("Print extracted fields instead of HTML")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    setup_logging(LogConfig {
        log_level: "info".into(),
        ..LogConfig::default()
    })?;

    let mut validation = if matches.get_flag("allow-private") {
        println!("{}", "Private addresses allowed".yellow());
        UrlValidationConfig::permissive()
    } else {
        UrlValidationConfig::default()
    };
    if let Some(blacklist) = matches.get_one::<String>("blacklist") {
        for domain in blacklist.split(',') {
            validation.blocked_domains.insert(domain.trim().to_string());
        }
    }

    let mut page_budget = FetchBudget::page();
    if let Some(seconds) = matches.get_one::<u64>("timeout") {
        page_budget = page_budget.with_timeout(Duration::from_secs(*seconds));
    }

    let fetcher = Fetcher::new_with_config(FetcherConfig::default().with_validation(validation))?;
    let service = PreviewService::new_with_config(
        PreviewServiceConfig::default()
            .with_fetcher(fetcher)
            .with_page_budget(page_budget),
    );

    println!("{}", "Onebox Preview".bold().green());
    println!("{}", "==============".green());

    let urls: Vec<&String> = matches.get_many::<String>("urls").unwrap_or_default().collect();
    for url in urls {
        if matches.get_flag("data") {
            match service.generate_preview(url).await {
                Ok(preview) => log_preview_card(&preview),
                Err(e) => log_error_card(url, &e),
            }
            continue;
        }

        let rendered = service.resolve(url).await;
        let status = if rendered.ok {
            "ok".green()
        } else {
            "fallback".red()
        };
        println!("\n{} [{}]", url.bold(), status);
        println!("{}", rendered.html);
    }

    let stats = service.cache().stats();
    println!(
        "\n{}: {} entries, {} hits, {} misses",
        "Cache".bold(),
        stats.entries,
        stats.hits,
        stats.misses
    );

    Ok(())
}
