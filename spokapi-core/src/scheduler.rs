use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use chrono::Local;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::browser::Page;
use crate::cache::ProgramCache;
use crate::config::StalenessPolicy;
use crate::context::Activity;
use crate::context::SchedulerContext;
use crate::error::Error;
use crate::models::Program;
use crate::tab_pool::PoolSlotKind;
use crate::tab_pool::TabPool;

/// Runs refresh cycles against the registered sources.
pub struct FetchScheduler {
    context: Arc<SchedulerContext>,
    pool: Arc<TabPool>,
    cache: Arc<ProgramCache>,
    periodic: Mutex<Option<CancellationToken>>,
}

impl FetchScheduler {
    pub fn new(
        context: Arc<SchedulerContext>,
        pool: Arc<TabPool>,
        cache: Arc<ProgramCache>,
    ) -> Self {
        FetchScheduler {
            context,
            pool,
            cache,
            periodic: Default::default(),
        }
    }

    /// Runs a cycle unless one is already running.
    ///
    /// Returns `Ok(false)` without waiting when a cycle is already running.
    /// `None` selects every registered source not in the denylist.
    pub async fn run_cycle(&self, source_ids: Option<Vec<String>>) -> Result<bool, Error> {
        let guard = match FetchGuard::acquire(&self.context.activity, &self.pool) {
            Some(guard) => guard,
            None => {
                tracing::debug!("Already fetching, skip");
                return Ok(false);
            }
        };
        let result = self.fetch(source_ids).await;
        guard.finish().await;
        result.map(|_| true)
    }

    async fn fetch(&self, source_ids: Option<Vec<String>>) -> Result<(), Error> {
        let full = source_ids.is_none();
        let source_ids = self.select(source_ids);

        tracing::info!(full, sources.len = source_ids.len(), "Fetching programs...");
        let now = Instant::now();

        if !source_ids.is_empty() {
            let handle = self
                .pool
                .attach(source_ids.len() + PoolSlotKind::RESERVED)
                .await?;

            let max = self.context.config.scheduler.max_concurrent_fetches;
            for (i, batch) in source_ids.chunks(max).enumerate() {
                let fetches = batch.iter().enumerate().filter_map(|(j, source_id)| {
                    let slot = PoolSlotKind::Source(i * max + j);
                    let page = handle.slot(slot)?.clone();
                    Some(async move { self.fetch_source(source_id, page.as_ref()).await })
                });
                futures::future::join_all(fetches).await;
            }

            for i in 0..source_ids.len() {
                if let Some(page) = handle.slot(PoolSlotKind::Source(i)) {
                    self.reset_page(page.as_ref()).await;
                }
            }
        }

        if full {
            for source_id in self.cache.retain_sources(&source_ids) {
                tracing::debug!(source.id = source_id, "Drop programs no longer selected");
            }
        }
        if let StalenessPolicy::MaxAge(max_age) = self.context.config.scheduler.staleness {
            if let Ok(max_age) = chrono::Duration::from_std(max_age) {
                for source_id in self.cache.expire(max_age, Local::now()) {
                    tracing::debug!(source.id = source_id, "Drop stale programs");
                }
            }
        }

        let elapsed = now.elapsed();
        tracing::info!(elapsed = %humantime::format_duration(elapsed), "Done");
        Ok(())
    }

    fn select(&self, source_ids: Option<Vec<String>>) -> Vec<String> {
        let registry = &self.context.registry;
        let source_ids = match source_ids {
            Some(source_ids) => source_ids,
            None => return registry.enabled_ids(),
        };
        let mut selected: Vec<String> = vec![];
        for source_id in source_ids {
            if selected.contains(&source_id) {
                continue;
            }
            match registry.get(&source_id) {
                Some(adapter) if registry.is_denied(&source_id, adapter.channel()) => {
                    tracing::debug!(source.id = source_id, "Denylisted, skip");
                }
                Some(_) => selected.push(source_id),
                None => {
                    tracing::warn!(source.id = source_id, "No such source, skip");
                }
            }
        }
        selected
    }

    // Failures are local to the source and leave it with no programs.
    async fn fetch_source(&self, source_id: &str, page: &dyn Page) {
        let registry = &self.context.registry;
        let adapter = match registry.get(source_id) {
            Some(adapter) => adapter,
            None => return,
        };

        let now = Instant::now();
        let timeout = self.context.config.scheduler.fetch_timeout;
        let programs = match tokio::time::timeout(timeout, adapter.fetch_programs(page)).await {
            Ok(Ok(programs)) => programs,
            Ok(Err(err)) => {
                tracing::warn!(%err, source.id = source_id, "Failed to fetch programs");
                vec![]
            }
            Err(_) => {
                tracing::warn!(source.id = source_id, "Timed out fetching programs");
                vec![]
            }
        };

        let fetched_at = Local::now();
        let programs: Vec<Program> = programs
            .into_iter()
            .filter(|program| !registry.is_denied(source_id, &program.channel))
            .map(|mut program| {
                program.source_id = source_id.to_string();
                program.watching = false;
                program.stopped = false;
                program.fetched_at = Some(fetched_at);
                program
            })
            .collect();

        let elapsed = now.elapsed();
        tracing::debug!(
            source.id = source_id,
            programs.len = programs.len(),
            elapsed = %humantime::format_duration(elapsed),
            "Fetched",
        );
        self.cache.replace(source_id, programs, fetched_at);
    }

    async fn reset_page(&self, page: &dyn Page) {
        let config = &self.context.config;
        if let Err(err) = page
            .goto(&config.browser.neutral_url, config.watch.navigation_timeout)
            .await
        {
            tracing::warn!(%err, page.id = page.target_id(), "Failed to reset source page");
        }
    }

    /// Runs a full cycle on every tick until stopped.  The first tick fires
    /// immediately.
    pub fn start_periodic(self: &Arc<Self>, interval: Duration) {
        let token = CancellationToken::new();
        let prev = self
            .periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(prev) = prev {
            prev.cancel();
        }

        tracing::info!(interval = %humantime::format_duration(interval), "Start periodic refresh");
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => (),
                }
                match scheduler.run_cycle(None).await {
                    Ok(true) => (),
                    Ok(false) => tracing::debug!("Refresh skipped"),
                    Err(err) => {
                        tracing::error!(%err, "Refresh failed, retry on the next tick");
                    }
                }
            }
            tracing::info!("Stopped periodic refresh");
        });
    }

    pub fn stop_periodic(&self) -> bool {
        let token = self
            .periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_periodic_running(&self) -> bool {
        self.periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

// Ends the fetch and releases the pool even when the cycle future is dropped.
struct FetchGuard<'a> {
    activity: &'a Activity,
    pool: &'a Arc<TabPool>,
    done: bool,
}

impl<'a> FetchGuard<'a> {
    fn acquire(activity: &'a Activity, pool: &'a Arc<TabPool>) -> Option<Self> {
        activity.try_begin_fetch().then_some(FetchGuard {
            activity,
            pool,
            done: false,
        })
    }

    async fn finish(mut self) {
        self.activity.end_fetch();
        self.done = true;
        self.pool.release().await;
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.activity.end_fetch();
        tracing::debug!("Fetch cycle cancelled");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let pool = self.pool.clone();
            runtime.spawn(async move {
                pool.release().await;
            });
        }
    }
}
