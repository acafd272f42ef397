mod provider;
mod scripted;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::browser::Page;
use crate::config::Config;
use crate::context::Credentials;
use crate::context::ProviderCredential;
use crate::error::Error;
use crate::models::ChannelRule;
use crate::models::Program;
use crate::models::WatchOutcome;

pub use provider::ProviderLogin;
pub use scripted::ScriptedSource;

#[cfg(test)]
pub(crate) mod stub;

pub const CHANNEL_UNSUPPORTED_MESSAGE: &str =
    "This channel is not available with your TV provider.";

/// Scraping and playback logic of one video source.
///
/// The page is borrowed for the duration of a single call.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn channel(&self) -> &str;

    /// Returns an empty list when nothing is live.
    async fn fetch_programs(&self, page: &dyn Page) -> Result<Vec<Program>, Error>;

    async fn watch(&self, page: &dyn Page, url: &str) -> Result<WatchOutcome, Error>;

    async fn stop(&self, page: &dyn Page, message: Option<&str>) -> Result<(), Error>;

    /// Returns `false` when the active provider is unsupported.
    async fn login(&self, page: &dyn Page) -> Result<bool, Error>;

    fn provider(&self) -> Option<ProviderCredential>;
}

/// Registered adapters and the runtime denylist.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: RwLock<IndexMap<String, Arc<dyn SourceAdapter>>>,
    // lowercase source ids or channel names
    denylist: RwLock<BTreeSet<String>>,
}

impl SourceRegistry {
    pub fn new<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        SourceRegistry {
            adapters: Default::default(),
            denylist: RwLock::new(
                denylist
                    .into_iter()
                    .map(|id| id.as_ref().to_lowercase())
                    .collect(),
            ),
        }
    }

    pub fn from_config(config: &Arc<Config>, credentials: &Arc<Credentials>) -> Self {
        let registry = Self::new(&config.unsupported_channels);
        for (id, source_config) in config.sources.iter() {
            registry.register(Arc::new(ScriptedSource::new(
                id,
                source_config.clone(),
                config.clone(),
                credentials.clone(),
            )));
        }
        registry
    }

    pub fn register(&self, adapter: Arc<dyn SourceAdapter>) {
        tracing::debug!(source.id = adapter.id(), "Registered");
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(adapter.id().to_string(), adapter);
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<dyn SourceAdapter>> {
        let adapter = self
            .adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(id);
        if adapter.is_some() {
            tracing::debug!(source.id = id, "Unregistered");
        }
        adapter
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Registered ids in registration order, minus denylisted ones.
    pub fn enabled_ids(&self) -> Vec<String> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        adapters
            .iter()
            .filter(|(id, adapter)| !self.is_denied(id, adapter.channel()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_denied(&self, source_id: &str, channel: &str) -> bool {
        let denylist = self.denylist.read().unwrap_or_else(PoisonError::into_inner);
        denylist.contains(&source_id.to_lowercase()) || denylist.contains(&channel.to_lowercase())
    }

    pub fn set_rule(&self, channel: &str, rule: ChannelRule) {
        let channel = channel.to_lowercase();
        let mut denylist = self.denylist.write().unwrap_or_else(PoisonError::into_inner);
        match rule {
            ChannelRule::Allow => denylist.remove(&channel),
            ChannelRule::Block => denylist.insert(channel.clone()),
        };
        tracing::info!(channel, ?rule, "Updated denylist");
    }

    pub fn denylist(&self) -> Vec<String> {
        self.denylist
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
