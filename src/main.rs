use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use izu_radar::{Config, Pipeline, ReqwestFetcher, output, server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "izu-radar")]
#[command(about = "Coastal Izu listing discovery")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        #[arg(long, env = "RADAR_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Run once and write the result files
    Once {
        #[arg(default_value = "public")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // before clap reads RADAR_BIND
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let command = Cli::parse().command.unwrap_or_else(|| Command::Serve {
        bind: std::env::var("RADAR_BIND").unwrap_or_else(|_| "0.0.0.0:8080".into()),
    });
    let cfg = Config::load()?;

    let origin = Url::parse(&cfg.site.base_url).context("site.base_url")?;
    let fetcher = ReqwestFetcher::new(&cfg.fetch, &origin)?;
    fetcher.warmup().await;
    let pipeline = Pipeline::new(cfg, Arc::new(fetcher))?;

    match command {
        Command::Serve { bind } => {
            server::serve(pipeline, &bind).await?;
        }
        Command::Once { out_dir } => {
            let report = pipeline.run(None).await?;
            let written = output::write_report(&out_dir, &report).await?;
            info!(
                listings = report.listings.len(),
                files = ?written,
                "results written"
            );
        }
    }
    Ok(())
}
