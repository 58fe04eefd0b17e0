// src/main.rs
mod config;
mod dashboard;
mod fetcher;
mod range;
mod report;
mod web;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    dashboard::DisplayState,
    fetcher::StreamhosterClient,
    range::{DEFAULT_LOOKBACK_DAYS, DateRange, parse_date},
    report::MediaStatReport,
};

#[derive(Parser)]
#[command(name = "streamviz")]
#[command(about = "Streamhoster media analytics -> dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dashboard server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8050")]
        bind: String,

        /// Days before today covered by the initial load
        #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
        lookback_days: u64,
    },

    /// Fetch one report and print it
    Fetch {
        /// First day (YYYY-MM-DD or YYYYMMDD); defaults to yesterday
        #[arg(long)]
        start: Option<String>,

        /// Last day (YYYY-MM-DD or YYYYMMDD); defaults to today
        #[arg(long)]
        end: Option<String>,

        /// Only keep media whose key contains this text (case-sensitive)
        #[arg(long, default_value = "")]
        media_key: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("streamviz=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    let client = StreamhosterClient::new(&cfg).context("build analytics client")?;
    let today = Local::now().date_naive();

    match cli.cmd {
        Command::Serve { bind, lookback_days } => {
            let bind: SocketAddr = bind.parse().context("parse bind addr")?;
            let credentials = cfg
                .dashboard_auth
                .clone()
                .context("STREAMHOSTER_USER and STREAMHOSTER_PASS must be set to serve the dashboard")?;

            let state = web::AppState {
                client: Arc::new(client),
                display: Arc::new(DisplayState::new()),
                credentials: Arc::new(credentials),
                lookback_days,
            };
            info!(endpoint = %state.client.endpoint(), timeout = ?cfg.timeout, "loading initial report");
            web::load_initial(&state, today).await;
            web::serve(state, bind).await?;
        }

        Command::Fetch {
            start,
            end,
            media_key,
            json,
        } => {
            let fallback = DateRange::trailing(DEFAULT_LOOKBACK_DAYS, today);
            let start = start.as_deref().map(parse_date).transpose()?.unwrap_or(fallback.start());
            let end = end.as_deref().map(parse_date).transpose()?.unwrap_or(fallback.end());
            let range = DateRange::bounded(start, end, today)?;

            let report = client
                .fetch(&range, &media_key)
                .await
                .with_context(|| format!("fetch report for {}", range))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_table(&range, &report);
            }
        }
    }

    Ok(())
}

fn print_table(range: &DateRange, report: &MediaStatReport) {
    if report.is_empty() {
        println!("{}: no data available", range);
        return;
    }

    let key_width = report
        .rows()
        .iter()
        .map(|r| r.media_key.chars().count())
        .max()
        .unwrap_or(0)
        .max("mediaKey".len());

    println!("{:<key_width$}  {:>10}  {:>10}  {:>14}", "mediaKey", "views", "uniques", "dataTransferGB");
    for r in report.rows() {
        println!(
            "{:<key_width$}  {:>10}  {:>10}  {:>14.3}",
            r.media_key, r.views, r.uniques, r.data_transfer_gb
        );
    }

    let s = report.summary();
    println!(
        "{}: {} media, {} views, {} uniques, {:.2} GB",
        range, s.media, s.views, s.uniques, s.data_transfer_gb
    );
}
