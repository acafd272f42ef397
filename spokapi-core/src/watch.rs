use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio_util::sync::CancellationToken;

use crate::browser::Page;
use crate::context::Activity;
use crate::context::SchedulerContext;
use crate::error::Error;
use crate::models::ProgramKey;
use crate::models::WatchOutcome;
use crate::models::WatchStatus;
use crate::source::SourceAdapter;
use crate::source::CHANNEL_UNSUPPORTED_MESSAGE;
use crate::tab_pool::TabPool;

/// Arbitrates the watch page between successive watch and stop requests.
pub struct WatchController {
    context: Arc<SchedulerContext>,
    pool: Arc<TabPool>,
    state: Mutex<WatchState>,
}

#[derive(Default)]
struct WatchState {
    // Incremented by every watch or stop request.
    generation: u64,
    cancel: Option<CancellationToken>,
    status: WatchStatus,
    source_id: Option<String>,
}

impl WatchController {
    pub fn new(context: Arc<SchedulerContext>, pool: Arc<TabPool>) -> Self {
        WatchController {
            context,
            pool,
            state: Default::default(),
        }
    }

    pub fn status(&self) -> WatchStatus {
        self.lock_state().status.clone()
    }

    /// Plays `url` of the source on the watch page.
    ///
    /// A watch request still in flight is abandoned and returns
    /// `WatchOutcome::Superseded`.
    pub async fn watch(&self, source_id: &str, url: &str) -> Result<WatchOutcome, Error> {
        let registry = &self.context.registry;
        let adapter = registry.get(source_id).ok_or(Error::SourceNotFound)?;
        if registry.is_denied(source_id, adapter.channel()) {
            return Err(Error::SourceDisabled);
        }

        let (generation, token) = {
            let mut state = self.lock_state();
            if let Some(prev) = state.cancel.take() {
                tracing::debug!("Supersede the previous watch request");
                prev.cancel();
            }
            state.generation += 1;
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            state.status = WatchStatus {
                watching: Some(ProgramKey::new(source_id, url)),
                stopped: None,
            };
            state.source_id = Some(source_id.to_string());
            (state.generation, token)
        };

        let guard = WatchGuard::new(&self.context.activity);
        tracing::info!(source.id = source_id, url, "Watching...");
        let result = tokio::select! {
            _ = token.cancelled() => Ok(WatchOutcome::Superseded),
            result = self.play(adapter.as_ref(), url) => result,
        };

        {
            let mut state = self.lock_state();
            if state.generation == generation {
                state.cancel = None;
                if !matches!(result, Ok(WatchOutcome::Playing)) {
                    state.status.watching = None;
                    state.source_id = None;
                }
            }
        }
        match &result {
            Ok(outcome) => tracing::info!(source.id = source_id, ?outcome, "Watch done"),
            Err(err) => tracing::error!(%err, source.id = source_id, "Failed to watch"),
        }

        drop(guard);
        self.pool.release().await;
        result
    }

    async fn play(&self, adapter: &dyn SourceAdapter, url: &str) -> Result<WatchOutcome, Error> {
        let page = self.pool.watch_page().await?;
        let timeout = self.context.config.watch.timeout;
        let outcome = tokio::time::timeout(timeout, adapter.watch(page.as_ref(), url)).await??;
        if outcome == WatchOutcome::Unsupported {
            adapter
                .stop(page.as_ref(), Some(CHANNEL_UNSUPPORTED_MESSAGE))
                .await?;
        }
        Ok(outcome)
    }

    /// Returns the watch page to a neutral state.
    pub async fn stop(&self) -> Result<(), Error> {
        let source_id = {
            let mut state = self.lock_state();
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.generation += 1;
            if let Some(key) = state.status.watching.take() {
                state.status.stopped = Some(key);
            }
            state.source_id.take()
        };

        let guard = WatchGuard::new(&self.context.activity);
        tracing::info!(source.id = ?source_id, "Stopping...");
        let result = self.reset(source_id.as_deref()).await;
        drop(guard);
        self.pool.release().await;
        result
    }

    async fn reset(&self, source_id: Option<&str>) -> Result<(), Error> {
        let page = self.pool.watch_page().await?;
        let adapter = source_id.and_then(|id| self.context.registry.get(id));
        if let Some(adapter) = adapter {
            match adapter.stop(page.as_ref(), None).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(%err, source.id = adapter.id(), "Failed to stop, reset the page");
                }
            }
        }
        self.goto_stop_page(page.as_ref()).await
    }

    async fn goto_stop_page(&self, page: &dyn Page) -> Result<(), Error> {
        let config = &self.context.config;
        page.goto(config.browser.stop_url(), config.watch.navigation_timeout)
            .await
    }

    fn lock_state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Clears the watching flag even when a request is dropped halfway.
struct WatchGuard<'a>(&'a Activity);

impl<'a> WatchGuard<'a> {
    fn new(activity: &'a Activity) -> Self {
        activity.begin_watch();
        WatchGuard(activity)
    }
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        self.0.end_watch();
    }
}
