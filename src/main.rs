//! # Press Stream
//!
//! Continuously scrapes press releases from many independent sites, archives
//! each one exactly once, and republishes newly archived releases as
//! per-source server-sent-event streams that clients can resume from any
//! point.
//!
//! ## Features
//!
//! - Sources are data: a YAML list of index pages, paginated indexes or
//!   RSS/Atom feeds plus CSS selectors for title, content, cruft and date
//! - Charset sniffing and tolerant date parsing for messy sites
//! - SQLite archive keyed on `(permalink, source)` with monotonic event ids
//! - Replay from `Last-Event-ID` joined to the live feed without gaps or
//!   duplicates
//! - One failing site, or one failing release, never holds up the others
//!
//! ## Usage
//!
//! ```sh
//! press_stream --config sources.yaml
//! curl -N http://localhost:9998/tesco
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Discover**: list candidate releases for each source
//! 2. **Dedup**: drop releases already in the archive
//! 3. **Scrape**: fetch and extract each new release
//! 4. **Stash**: archive it, assigning its event id
//! 5. **Publish**: push the event to live subscribers

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod broker;
mod charset;
mod cli;
mod config;
mod dates;
mod error;
mod fetch;
mod markup;
mod models;
mod outputs;
mod scheduler;
mod scrapers;
mod server;
mod store;
mod utils;

use broker::Broker;
use cli::Cli;
use config::Config;
use fetch::{Fetcher, HttpFetcher};
use scheduler::{Scheduler, SchedulerConfig};
use scrapers::Source;
use store::Store;
use utils::ensure_parent_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut config = Config::load(&args.config)?;
    if let Some(listen) = &args.listen {
        config.listen = listen.clone();
    }
    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    if let Some(interval) = args.interval {
        config.interval_secs = interval;
    }

    let sources = config::build_sources(&config, args.historical)?;
    let sources = config::restrict(sources, &args.only)?;

    if args.list {
        for source in &sources {
            println!("{}", source.name());
        }
        return Ok(());
    }

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
        Duration::from_secs(config.request_timeout_secs),
        &config.user_agent,
    )?);

    if let Some(name) = &args.test {
        return test_source(&sources, name, fetcher.as_ref(), &args).await;
    }

    serve(config, sources, fetcher).await
}

/// `--test`: one Source, once, no archive.
async fn test_source(
    sources: &[Arc<dyn Source>],
    name: &str,
    fetcher: &dyn Fetcher,
    args: &Cli,
) -> Result<(), Box<dyn Error>> {
    let source = sources
        .iter()
        .find(|s| s.name() == name)
        .ok_or_else(|| error::Error::Config(format!("unknown source {name:?}")))?;

    info!(source = name, "Dry run");
    let items = scheduler::dry_run(source.as_ref(), fetcher).await?;
    print!("{}", outputs::render(&items, args.output_format())?);
    Ok(())
}

async fn serve(
    config: Config,
    sources: Vec<Arc<dyn Source>>,
    fetcher: Arc<dyn Fetcher>,
) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();
    info!("press_stream starting up");

    ensure_parent_dir(&config.database).await?;
    let store = Store::open(&config.database).await?;
    let broker = Broker::new(
        store.clone(),
        sources.iter().map(|s| s.name().to_string()),
        config.subscriber_buffer,
    );

    let scheduler = Scheduler::new(
        sources,
        store.clone(),
        broker.clone(),
        fetcher,
        SchedulerConfig {
            interval: Duration::from_secs(config.interval_secs),
            source_budget: Duration::from_secs(config.source_budget_secs),
            max_concurrent_sources: config.max_concurrent_sources,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(addr = %config.listen, topics = broker.topics().len(), "Serving event streams");

    let app = server::router(broker.clone());
    let on_shutdown = {
        let broker = broker.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown requested");
            // Stop polling and end every subscriber stream so the server
            // can drain its connections.
            let _ = shutdown_tx.send(true);
            broker.close();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(on_shutdown)
        .await?;

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task failed");
    }
    store.close().await;

    let elapsed = start_time.elapsed();
    info!(?elapsed, secs = elapsed.as_secs(), "Shutdown complete");
    Ok(())
}
