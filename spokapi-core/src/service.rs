use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::browser::DevToolsConnector;
use crate::browser::BrowserConnector;
use crate::cache::ProgramCache;
use crate::config::Config;
use crate::context::Credentials;
use crate::context::ProviderCredential;
use crate::context::SchedulerContext;
use crate::error::Error;
use crate::models::ChannelRule;
use crate::models::Program;
use crate::models::WatchOutcome;
use crate::scheduler::FetchScheduler;
use crate::source::SourceRegistry;
use crate::tab_pool::TabPool;
use crate::watch::WatchController;

/// Entry points of the core.
pub struct Service {
    context: Arc<SchedulerContext>,
    cache: Arc<ProgramCache>,
    scheduler: Arc<FetchScheduler>,
    watch: WatchController,
}

impl Service {
    /// Creates a service attaching to the browser at `browser.endpoint`.
    pub fn new(config: Arc<Config>) -> Result<Self, Error> {
        let connector = DevToolsConnector::new(&config.browser)?;
        let credentials = Arc::new(Credentials::new(&config.provider));
        let registry = SourceRegistry::from_config(&config, &credentials);
        Ok(Self::with_parts(
            config,
            registry,
            credentials,
            Arc::new(connector),
        ))
    }

    pub fn with_parts(
        config: Arc<Config>,
        registry: SourceRegistry,
        credentials: Arc<Credentials>,
        connector: Arc<dyn BrowserConnector>,
    ) -> Self {
        let context = SchedulerContext::new(config.clone(), registry, credentials);
        let pool = Arc::new(TabPool::new(config, connector, context.activity.clone()));
        let cache = Arc::new(ProgramCache::new());
        let scheduler = Arc::new(FetchScheduler::new(
            context.clone(),
            pool.clone(),
            cache.clone(),
        ));
        let watch = WatchController::new(context.clone(), pool);
        Service {
            context,
            cache,
            scheduler,
            watch,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.context.registry
    }

    /// Returns `Ok(false)` when a cycle is already running.
    pub async fn trigger_refresh(&self, source_ids: Option<Vec<String>>) -> Result<bool, Error> {
        self.scheduler.run_cycle(source_ids).await
    }

    pub fn snapshot(&self) -> Vec<Program> {
        self.cache.snapshot_with(&self.watch.status())
    }

    /// Reads the cache, filling it first when it's empty.
    pub async fn snapshot_or_fetch(&self) -> Result<Vec<Program>, Error> {
        if self.cache.is_empty() && !self.scheduler.run_cycle(None).await? {
            self.wait_for_cycle().await;
        }
        Ok(self.snapshot())
    }

    async fn wait_for_cycle(&self) {
        let interval = self.context.config.scheduler.poll_interval;
        while self.context.activity.is_fetching() {
            tracing::debug!("Waiting for the running cycle...");
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn watch(&self, source_id: &str, url: &str) -> Result<WatchOutcome, Error> {
        self.watch.watch(source_id, url).await
    }

    pub async fn stop(&self) -> Result<(), Error> {
        self.watch.stop().await
    }

    pub fn set_denylist(&self, channel: &str, rule: ChannelRule) {
        self.context.registry.set_rule(channel, rule);
    }

    pub fn denylist(&self) -> Vec<String> {
        self.context.registry.denylist()
    }

    /// Merges non-empty fields of `update` into the active credential.
    pub fn set_credentials(&self, update: CredentialsUpdate) -> Result<(), Error> {
        let current = self.context.credentials.get();
        let name = match (update.provider, current.as_ref()) {
            (Some(name), _) => name,
            (None, Some(credential)) => credential.name.clone(),
            (None, None) => return Err(Error::ProviderUnsupported),
        };
        let known = self
            .context
            .config
            .providers
            .keys()
            .any(|provider| provider.eq_ignore_ascii_case(&name));
        if !known {
            return Err(Error::ProviderUnsupported);
        }
        let (username, password) = match current {
            Some(credential) => (credential.username, credential.password),
            None => Default::default(),
        };
        self.context.credentials.set(Some(ProviderCredential {
            name,
            username: update.username.unwrap_or(username),
            password: update.password.unwrap_or(password),
        }));
        Ok(())
    }

    pub fn credentials(&self) -> Option<ProviderCredential> {
        self.context.credentials.get()
    }

    /// Empties the cache so that the next read refetches.
    pub fn break_cache(&self) {
        tracing::info!("Break the cache");
        self.cache.clear();
    }

    pub fn start_periodic(&self, interval: Duration) {
        self.scheduler.start_periodic(interval);
    }

    pub fn stop_periodic(&self) -> bool {
        self.scheduler.stop_periodic()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsUpdate {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}
