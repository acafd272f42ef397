use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;

use crate::config::Config;
use crate::config::ProviderConfig;
use crate::source::SourceRegistry;

/// State shared by every component, passed explicitly to constructors.
pub struct SchedulerContext {
    pub config: Arc<Config>,
    pub registry: SourceRegistry,
    pub credentials: Arc<Credentials>,
    pub activity: Arc<Activity>,
}

impl SchedulerContext {
    pub fn new(
        config: Arc<Config>,
        registry: SourceRegistry,
        credentials: Arc<Credentials>,
    ) -> Arc<Self> {
        Arc::new(SchedulerContext {
            config,
            registry,
            credentials,
            activity: Default::default(),
        })
    }
}

/// Tracks whether a fetch cycle or a watch request is using the browser.
#[derive(Debug, Default)]
pub struct Activity {
    fetching: AtomicBool,
    watching: AtomicUsize,
}

impl Activity {
    /// Returns `false` when a cycle is already running.
    pub fn try_begin_fetch(&self) -> bool {
        self.fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_fetch(&self) {
        self.fetching.store(false, Ordering::Release);
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::Acquire)
    }

    pub fn begin_watch(&self) {
        self.watching.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_watch(&self) {
        let _ = self
            .watching
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Acquire) > 0
    }

    pub fn is_idle(&self) -> bool {
        !self.is_fetching() && !self.is_watching()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderCredential {
    pub name: String,
    pub username: String,
    pub password: String,
}

/// The active provider credential, editable at runtime.
#[derive(Debug, Default)]
pub struct Credentials(RwLock<Option<ProviderCredential>>);

impl Credentials {
    pub fn new(config: &ProviderConfig) -> Self {
        let credential = config.name.as_ref().map(|name| ProviderCredential {
            name: name.clone(),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
        });
        Credentials(RwLock::new(credential))
    }

    pub fn get(&self) -> Option<ProviderCredential> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, credential: Option<ProviderCredential>) {
        tracing::info!(
            provider = credential.as_ref().map(|c| c.name.as_str()),
            "Updated credentials"
        );
        match self.0.write() {
            Ok(mut guard) => *guard = credential,
            Err(poisoned) => *poisoned.into_inner() = credential,
        }
    }

    pub fn provider_name(&self) -> Option<String> {
        self.get().map(|credential| credential.name)
    }
}
