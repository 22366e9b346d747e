//! Polling loop driving every Source through the pipeline.
//!
//! One cycle runs, for each Source:
//!
//! 1. **Discover** candidate items (a failure skips the Source this cycle)
//! 2. **Dedup** against the archive
//! 3. **Scrape** each incomplete item from its permalink (a failure skips only
//!    that item, which is naturally retried next cycle)
//! 4. **Stash** each completed item
//! 5. **Publish** the Event, only once the stash has committed
//!
//! Sources run concurrently in a bounded pool, each in its own task and under
//! its own time budget. Items within a Source are handled one at a time so a
//! topic's events are published in id order.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout_at};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::models::{Event, Item};
use crate::scrapers::Source;
use crate::store::Store;
use crate::utils::truncate_for_log;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub source_budget: Duration,
    pub max_concurrent_sources: usize,
}

/// What happened to one Source during one cycle.
#[derive(Debug, Default, Clone)]
pub struct SourceReport {
    pub source: String,
    pub discovered: usize,
    pub new: usize,
    pub archived: usize,
    pub failed: usize,
    /// `(url, error)` for every failure, in the order they happened.
    pub errors: Vec<(String, String)>,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, url: &str, err: &Error) {
        error!(source = %self.source, %url, kind = err.kind(), error = %err, "Pipeline step failed");
        self.failed += 1;
        self.errors.push((url.to_string(), err.to_string()));
    }

    fn fail(&mut self, url: &str, reason: String) {
        self.failed += 1;
        self.errors.push((url.to_string(), reason));
    }

    fn interrupted(&mut self, why: Interrupted, budget: Duration) {
        match why {
            Interrupted::Budget => {
                warn!(source = %self.source, budget_secs = budget.as_secs(), "Source ran out of time");
                self.fail("", format!("time budget of {budget:?} exceeded"));
            }
            Interrupted::Shutdown => {
                info!(source = %self.source, "Shutdown requested; leaving the rest for the next run");
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn archived(&self) -> usize {
        self.sources.iter().map(|s| s.archived).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources, {} archived, {} failed",
            self.sources.len(),
            self.archived(),
            self.failed()
        )
    }
}

/// Why a step was abandoned before it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    Budget,
    Shutdown,
}

type SourceTask = Pin<Box<dyn Future<Output = SourceReport> + Send>>;

#[derive(Clone)]
pub struct Scheduler {
    sources: Arc<[Arc<dyn Source>]>,
    store: Store,
    broker: Broker,
    fetcher: Arc<dyn Fetcher>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        store: Store,
        broker: Broker,
        fetcher: Arc<dyn Fetcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            sources: sources.into(),
            store,
            broker,
            fetcher,
            config,
        }
    }

    /// Poll every `interval` until `shutdown` turns true. The first cycle
    /// starts immediately.
    ///
    /// A cycle in progress is not dropped on shutdown: it watches the same
    /// signal, abandons whatever fetch or scrape is in flight and returns, so
    /// every task it spawned has finished when this does.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            sources = self.sources.len(),
            interval_secs = self.config.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            }
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle(&shutdown).await;
        }
        info!("Scheduler stopped");
    }

    /// Run every Source once.
    ///
    /// Sources are polled concurrently, at most `max_concurrent_sources` at a
    /// time, each on its own task and under its own time budget.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Once this reads `true`, each Source stops after its
    ///   current archive step.
    ///
    /// # Returns
    ///
    /// One [`SourceReport`] per Source, in configuration order, whatever
    /// order they finished in.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let (_stop, shutdown) = watch::channel(false);
    /// let report = scheduler.run_cycle(&shutdown).await;
    /// info!(%report, "Cycle complete");
    /// ```
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> CycleReport {
        let started = std::time::Instant::now();

        let tasks: Vec<SourceTask> = self
            .sources
            .iter()
            .map(|source| {
                let this = self.clone();
                let source = Arc::clone(source);
                let shutdown = shutdown.clone();
                let task: SourceTask = Box::pin(async move {
                    let name = source.name().to_string();
                    // A task per Source keeps even a panic contained.
                    let polled =
                        tokio::spawn(async move { this.poll_source(source.as_ref(), shutdown).await });
                    match polled.await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(source = %name, error = %e, "Source task died");
                            let mut report = SourceReport::new(&name);
                            report.fail("", e.to_string());
                            report
                        }
                    }
                });
                task
            })
            .collect();

        let reports: Vec<SourceReport> = stream::iter(tasks)
            .buffer_unordered(self.config.max_concurrent_sources.max(1))
            .collect()
            .await;

        // Keep configuration order regardless of completion order.
        let mut ordered = Vec::with_capacity(reports.len());
        for source in self.sources.iter() {
            if let Some(report) = reports.iter().find(|r| r.source == source.name()) {
                ordered.push(report.clone());
            }
        }
        let report = CycleReport { sources: ordered };
        info!(
            %report,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );
        report
    }

    /// One Source's full pipeline, bounded by the per-source budget.
    pub async fn poll_source(&self, source: &dyn Source, shutdown: watch::Receiver<bool>) -> SourceReport {
        let mut report = SourceReport::new(source.name());
        let deadline = Instant::now() + self.config.source_budget;
        self.pipeline(source, &mut report, deadline, shutdown).await;
        info!(
            source = %report.source,
            discovered = report.discovered,
            new = report.new,
            archived = report.archived,
            failed = report.failed,
            "Source polled"
        );
        report
    }

    /// Only discovery and the fetch/scrape of one item are ever abandoned
    /// part way. The deadline and shutdown are otherwise checked between
    /// items, so an item that reached the archive step is stashed and
    /// published together.
    #[instrument(level = "info", skip_all, fields(source = %source.name()))]
    async fn pipeline(
        &self,
        source: &dyn Source,
        report: &mut SourceReport,
        deadline: Instant,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let budget = self.config.source_budget;
        let discover = source.discover(self.fetcher.as_ref());
        let outcome = interruptible(deadline, &mut shutdown, discover).await;
        let discovered = match outcome {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                report.record("", &e);
                return;
            }
            Err(why) => {
                report.interrupted(why, budget);
                return;
            }
        };
        report.discovered = discovered.len();

        let fresh = match self.store.which_are_new(discovered).await {
            Ok(fresh) => fresh,
            Err(e) => {
                report.record("", &e);
                return;
            }
        };
        report.new = fresh.len();

        for mut item in fresh {
            if *shutdown.borrow() {
                report.interrupted(Interrupted::Shutdown, budget);
                break;
            }
            if Instant::now() >= deadline {
                report.interrupted(Interrupted::Budget, budget);
                break;
            }
            if !item.complete {
                let scrape = complete_item(source, self.fetcher.as_ref(), &mut item);
                let outcome = interruptible(deadline, &mut shutdown, scrape).await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        report.record(&item.permalink, &e);
                        continue;
                    }
                    Err(why) => {
                        report.interrupted(why, budget);
                        break;
                    }
                }
            }

            let permalink = item.permalink.clone();
            match self.archive(item).await {
                Ok(Ok(Some(event))) => {
                    debug!(id = event.id, %permalink, "Archived");
                    report.archived += 1;
                }
                Ok(Ok(None)) => debug!(%permalink, "Already archived"),
                Ok(Err(e)) => report.record(&permalink, &e),
                Err(e) => {
                    error!(source = %report.source, %permalink, error = %e, "Archive task died");
                    report.fail(&permalink, e.to_string());
                }
            }
        }
    }

    /// Stash `item` and publish its Event. The pair runs on its own task so
    /// a committed row is always published, even if the caller goes away.
    fn archive(&self, item: Item) -> JoinHandle<Result<Option<Event>>> {
        let store = self.store.clone();
        let broker = self.broker.clone();
        tokio::spawn(async move {
            let event = store.stash(&item).await?;
            if let Some(event) = &event {
                broker.publish(event);
            }
            Ok::<_, Error>(event)
        })
    }
}

/// Run `step` unless the deadline passes or shutdown is signalled first.
async fn interruptible<T>(
    deadline: Instant,
    shutdown: &mut watch::Receiver<bool>,
    step: impl Future<Output = T>,
) -> std::result::Result<T, Interrupted> {
    tokio::select! {
        out = timeout_at(deadline, step) => out.map_err(|_| Interrupted::Budget),
        _ = stopped(shutdown) => Err(Interrupted::Shutdown),
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // With the sender gone nobody can ask us to stop.
            std::future::pending::<()>().await;
        }
    }
}

/// Fetch an incomplete item's permalink and let the Source scrape it.
pub async fn complete_item(source: &dyn Source, fetcher: &dyn Fetcher, item: &mut Item) -> Result<()> {
    let url = Url::parse(&item.permalink)
        .map_err(|e| Error::Extraction(format!("bad permalink {:?}: {e}", item.permalink)))?;
    let page = fetcher.fetch(&url).await?;
    source.scrape(item, &page.text)?;
    if item.published_at.is_none() {
        item.published_at = Some(Utc::now());
    }
    item.complete = true;
    debug!(
        permalink = %item.permalink,
        title = %truncate_for_log(&item.title, 80),
        "Scraped"
    );
    Ok(())
}

/// Discover and scrape one Source without touching the archive. Items that
/// fail to scrape are logged and left out.
pub async fn dry_run(source: &dyn Source, fetcher: &dyn Fetcher) -> Result<Vec<Item>> {
    let discovered = source.discover(fetcher).await?;
    let mut items = Vec::with_capacity(discovered.len());
    for mut item in discovered {
        if !item.complete {
            if let Err(e) = complete_item(source, fetcher, &mut item).await {
                error!(source = source.name(), url = %item.permalink, error = %e, "Scrape failed");
                continue;
            }
        }
        items.push(item);
    }
    Ok(items)
}
