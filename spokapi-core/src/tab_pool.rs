use std::fmt;
use std::sync::Arc;

use crate::browser::Browser;
use crate::browser::BrowserConnector;
use crate::browser::Page;
use crate::config::Config;
use crate::context::Activity;
use crate::error::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolSlotKind {
    Watch,
    Status,
    Source(usize),
}

impl PoolSlotKind {
    pub const RESERVED: usize = 2;

    pub fn index(self) -> usize {
        match self {
            Self::Watch => 0,
            Self::Status => 1,
            Self::Source(i) => Self::RESERVED + i,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Watch,
            1 => Self::Status,
            _ => Self::Source(index - Self::RESERVED),
        }
    }
}

impl fmt::Display for PoolSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watch => write!(f, "watch"),
            Self::Status => write!(f, "status"),
            Self::Source(i) => write!(f, "source#{}", i),
        }
    }
}

/// Pages borrowed from the pool for one fetch cycle or one watch request.
#[derive(Clone)]
pub struct PoolHandle {
    watch: Arc<dyn Page>,
    status: Arc<dyn Page>,
    sources: Vec<Arc<dyn Page>>,
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("watch", &self.watch.target_id())
            .field("status", &self.status.target_id())
            .field(
                "sources",
                &self
                    .sources
                    .iter()
                    .map(|page| page.target_id())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PoolHandle {
    pub fn watch(&self) -> &Arc<dyn Page> {
        &self.watch
    }

    pub fn status(&self) -> &Arc<dyn Page> {
        &self.status
    }

    pub fn slot(&self, kind: PoolSlotKind) -> Option<&Arc<dyn Page>> {
        match kind {
            PoolSlotKind::Watch => Some(&self.watch),
            PoolSlotKind::Status => Some(&self.status),
            PoolSlotKind::Source(i) => self.sources.get(i),
        }
    }

    pub fn len(&self) -> usize {
        PoolSlotKind::RESERVED + self.sources.len()
    }

    fn pages(&self) -> impl Iterator<Item = (PoolSlotKind, &Arc<dyn Page>)> {
        [&self.watch, &self.status]
            .into_iter()
            .chain(self.sources.iter())
            .enumerate()
            .map(|(i, page)| (PoolSlotKind::from_index(i), page))
    }
}

/// Owns the pages of the shared browser.
///
/// The browser itself is externally owned.  Releasing the pool only drops the
/// connection to it.
pub struct TabPool {
    config: Arc<Config>,
    connector: Arc<dyn BrowserConnector>,
    activity: Arc<Activity>,
    state: tokio::sync::Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    browser: Option<Box<dyn Browser>>,
    handle: Option<PoolHandle>,
    // Survives releases so that the same page keeps playing the watch slot.
    watch_target_id: Option<String>,
}

impl TabPool {
    pub fn new(
        config: Arc<Config>,
        connector: Arc<dyn BrowserConnector>,
        activity: Arc<Activity>,
    ) -> Self {
        TabPool {
            config,
            connector,
            activity,
            state: Default::default(),
        }
    }

    /// Ensures exactly `required_slots` pages exist and returns them.
    pub async fn attach(&self, required_slots: usize) -> Result<PoolHandle, Error> {
        let mut state = self.state.lock().await;
        self.attach_locked(&mut state, required_slots).await
    }

    /// Returns the watch page, attaching only when the pool is detached.
    pub async fn watch_page(&self) -> Result<Arc<dyn Page>, Error> {
        let mut state = self.state.lock().await;
        if let Some(ref handle) = state.handle {
            return Ok(handle.watch.clone());
        }
        let handle = self
            .attach_locked(&mut state, PoolSlotKind::RESERVED)
            .await?;
        Ok(handle.watch)
    }

    /// Detaches from the browser when neither a fetch nor a watch is active.
    pub async fn release(&self) -> bool {
        let mut state = self.state.lock().await;
        if !self.activity.is_idle() {
            tracing::debug!(
                fetching = self.activity.is_fetching(),
                watching = self.activity.is_watching(),
                "Keep attached"
            );
            return false;
        }
        if state.browser.is_none() {
            return false;
        }
        state.handle = None;
        state.browser = None;
        tracing::info!("Released browser");
        true
    }

    pub async fn is_attached(&self) -> bool {
        self.state.lock().await.browser.is_some()
    }

    pub async fn watch_target_id(&self) -> Option<String> {
        self.state.lock().await.watch_target_id.clone()
    }

    async fn attach_locked(
        &self,
        state: &mut PoolState,
        required_slots: usize,
    ) -> Result<PoolHandle, Error> {
        let required_slots = required_slots.max(PoolSlotKind::RESERVED);

        if state.browser.is_none() {
            let browser = self.connector.connect().await.inspect_err(|err| {
                tracing::error!(%err, "Failed to attach to browser");
            })?;
            tracing::info!("Attached to browser");
            state.browser = Some(browser);
        }
        let browser = state.browser.as_deref().ok_or(Error::BrowserUnavailable)?;

        let mut pages = browser.pages().await?;

        let sticky = state
            .watch_target_id
            .as_deref()
            .and_then(|id| pages.iter().position(|page| page.target_id() == id));
        let reused = state
            .handle
            .as_ref()
            .zip(sticky)
            .is_some_and(|(handle, i)| handle.watch.target_id() == pages[i].target_id());
        let watch = match sticky {
            Some(i) => pages.remove(i),
            None => {
                let page = if pages.is_empty() {
                    browser.new_page().await?
                } else {
                    pages.remove(0)
                };
                let url = &self.config.browser.neutral_url;
                if let Err(err) = page.goto(url, self.config.watch.navigation_timeout).await {
                    tracing::warn!(%err, page.id = page.target_id(), "Failed to reset watch page");
                }
                tracing::debug!(page.id = page.target_id(), "Designated watch page");
                state.watch_target_id = Some(page.target_id().to_string());
                page
            }
        };

        let others = required_slots - 1;
        while pages.len() < others {
            pages.push(browser.new_page().await?);
        }
        for page in pages.split_off(others) {
            tracing::debug!(page.id = page.target_id(), "Close excess page");
            if let Err(err) = page.close().await {
                tracing::warn!(%err, page.id = page.target_id(), "Failed to close page");
            }
        }

        let mut pages = pages.into_iter();
        let status = pages.next().ok_or(Error::BrowserUnavailable)?;
        let handle = PoolHandle {
            watch,
            status,
            sources: pages.collect(),
        };

        for (slot, page) in handle.pages() {
            // Overrides are still active on a page of the current attachment.
            if reused && slot == PoolSlotKind::Watch {
                continue;
            }
            self.setup_page(slot, page.as_ref()).await;
        }
        if let Some(ref url) = self.config.browser.status_url {
            if let Err(err) = handle.status.goto(url, self.config.watch.navigation_timeout).await {
                tracing::warn!(%err, "Failed to show status page");
            }
        }

        tracing::debug!(slots = handle.len(), "Attached pages");
        state.handle = Some(handle.clone());
        Ok(handle)
    }

    // Failures here degrade the page but never the attachment.
    async fn setup_page(&self, slot: PoolSlotKind, page: &dyn Page) {
        let config = &self.config.browser;
        if config.clear_viewport_override {
            if let Err(err) = page.clear_viewport_override().await {
                tracing::warn!(%err, %slot, "Failed to clear viewport override");
            }
        }
        if let Some(ref user_agent) = config.user_agent {
            if let Err(err) = page.set_user_agent(user_agent).await {
                tracing::warn!(%err, %slot, "Failed to set user agent");
            }
        }
        if let Some(ref geolocation) = config.geolocation {
            if let Err(err) = page.set_geolocation(geolocation).await {
                tracing::warn!(%err, %slot, "Failed to set geolocation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::stub::BrowserConnectorStub;
    use crate::config::GeolocationConfig;
    use assert_matches::assert_matches;
    use test_log::test;

    fn new_pool(config: Config) -> (TabPool, BrowserConnectorStub, Arc<Activity>) {
        let connector = BrowserConnectorStub::new();
        let activity = Arc::new(Activity::default());
        let pool = TabPool::new(
            Arc::new(config),
            Arc::new(connector.clone()),
            activity.clone(),
        );
        (pool, connector, activity)
    }

    #[test]
    fn test_pool_slot_kind() {
        assert_eq!(PoolSlotKind::Watch.index(), 0);
        assert_eq!(PoolSlotKind::Status.index(), 1);
        assert_eq!(PoolSlotKind::Source(0).index(), 2);
        for i in 0..5 {
            assert_eq!(PoolSlotKind::from_index(i).index(), i);
        }
        assert_eq!(PoolSlotKind::Source(3).to_string(), "source#3");
    }

    #[test(tokio::test)]
    async fn test_attach_creates_missing_pages() {
        let (pool, connector, _) = new_pool(Default::default());

        let handle = pool.attach(4).await.unwrap();
        assert_eq!(handle.len(), 4);
        assert_eq!(connector.state().page_ids().len(), 4);
        assert!(handle.slot(PoolSlotKind::Source(1)).is_some());
        assert!(handle.slot(PoolSlotKind::Source(2)).is_none());
        assert!(pool.is_attached().await);
        assert_eq!(
            pool.watch_target_id().await.as_deref(),
            Some(handle.watch().target_id())
        );
    }

    #[test(tokio::test)]
    async fn test_attach_navigates_first_page_for_watch() {
        let (pool, connector, _) = new_pool(Default::default());
        let first = connector.state().add_page("https://example.com/old");
        connector.state().add_page("https://example.com/other");

        let handle = pool.attach(2).await.unwrap();
        assert_eq!(handle.watch().target_id(), first.target_id());
        assert_eq!(first.current_url(), "about:blank");
    }

    #[test(tokio::test)]
    async fn test_attach_sticky_watch_page() {
        let (pool, connector, _) = new_pool(Default::default());
        let handle = pool.attach(3).await.unwrap();
        let watch_id = handle.watch().target_id().to_string();
        drop(handle);
        assert!(pool.release().await);

        // The browser reorders its pages while detached.
        {
            let mut pages = connector.state().pages.lock().unwrap();
            pages.rotate_left(1);
            assert_ne!(pages[0].target_id(), watch_id);
        }

        let handle = pool.attach(3).await.unwrap();
        assert_eq!(handle.watch().target_id(), watch_id);
        assert_eq!(connector.state().connects(), 2);
    }

    #[test(tokio::test)]
    async fn test_attach_closes_excess_pages() {
        let (pool, connector, _) = new_pool(Default::default());
        let handle = pool.attach(5).await.unwrap();
        let watch_id = handle.watch().target_id().to_string();

        let handle = pool.attach(3).await.unwrap();
        assert_eq!(handle.len(), 3);
        assert_eq!(connector.state().page_ids().len(), 3);
        assert_eq!(handle.watch().target_id(), watch_id);

        let handle = pool.attach(0).await.unwrap();
        assert_eq!(handle.len(), 2);
        assert_eq!(connector.state().page_ids().len(), 2);
    }

    #[test(tokio::test)]
    async fn test_attach_setup_failures_are_not_fatal() {
        let mut config = Config::default();
        config.browser.user_agent = Some("FakeAgent/1.0".to_string());
        config.browser.geolocation = Some(GeolocationConfig {
            latitude: 40.0,
            longitude: -74.0,
            accuracy: 10.0,
        });
        let (pool, connector, _) = new_pool(config);

        // The stub rejects geolocation overrides.
        let handle = pool.attach(3).await.unwrap();
        assert_eq!(handle.len(), 3);
        for page in connector.state().pages.lock().unwrap().iter() {
            assert_eq!(
                page.user_agent.lock().unwrap().as_deref(),
                Some("FakeAgent/1.0")
            );
        }
    }

    #[test(tokio::test)]
    async fn test_attach_keeps_watch_page_untouched_while_attached() {
        let mut config = Config::default();
        config.browser.user_agent = Some("FakeAgent/1.0".to_string());
        let (pool, connector, _) = new_pool(config);
        let user_agent_of = |id: &str| {
            connector
                .state()
                .pages
                .lock()
                .unwrap()
                .iter()
                .find(|page| page.target_id() == id)
                .and_then(|page| page.user_agent.lock().unwrap().clone())
        };

        let handle = pool.attach(2).await.unwrap();
        let watch_id = handle.watch().target_id().to_string();
        let watch_page = connector
            .state()
            .pages
            .lock()
            .unwrap()
            .iter()
            .find(|page| page.target_id() == watch_id)
            .cloned()
            .unwrap();
        *watch_page.user_agent.lock().unwrap() = None;

        // A page in use by a watch must not be reconfigured by a later fetch.
        let handle = pool.attach(3).await.unwrap();
        assert_eq!(handle.watch().target_id(), watch_id);
        assert_eq!(user_agent_of(&watch_id), None);
        for (_, page) in handle.pages().skip(1) {
            assert_eq!(
                user_agent_of(page.target_id()).as_deref(),
                Some("FakeAgent/1.0")
            );
        }
        drop(handle);

        // Overrides end with the session, so a new attachment sets them again.
        assert!(pool.release().await);
        let handle = pool.attach(2).await.unwrap();
        assert_eq!(handle.watch().target_id(), watch_id);
        assert_eq!(user_agent_of(&watch_id).as_deref(), Some("FakeAgent/1.0"));
    }

    #[test(tokio::test)]
    async fn test_attach_shows_status_page() {
        let mut config = Config::default();
        config.browser.status_url = Some("http://localhost/loading".to_string());
        let (pool, connector, _) = new_pool(config);

        let handle = pool.attach(2).await.unwrap();
        let status_id = handle.status().target_id().to_string();
        let pages = connector.state().pages.lock().unwrap();
        let status = pages
            .iter()
            .find(|page| page.target_id() == status_id)
            .unwrap();
        assert_eq!(status.current_url(), "http://localhost/loading");
    }

    #[test(tokio::test)]
    async fn test_attach_unreachable() {
        let (pool, connector, _) = new_pool(Default::default());
        connector.state().set_unreachable(true);
        assert_matches!(pool.attach(2).await, Err(Error::BrowserUnavailable));
        assert!(!pool.is_attached().await);

        connector.state().set_unreachable(false);
        assert_matches!(pool.attach(2).await, Ok(_));
    }

    #[test(tokio::test)]
    async fn test_watch_page_reuses_attachment() {
        let (pool, connector, _) = new_pool(Default::default());
        let handle = pool.attach(4).await.unwrap();

        let page = pool.watch_page().await.unwrap();
        assert_eq!(page.target_id(), handle.watch().target_id());
        // Source pages are left alone.
        assert_eq!(connector.state().page_ids().len(), 4);
        assert_eq!(connector.state().connects(), 1);
    }

    #[test(tokio::test)]
    async fn test_watch_page_attaches_when_detached() {
        let (pool, connector, _) = new_pool(Default::default());
        let page = pool.watch_page().await.unwrap();
        assert!(pool.is_attached().await);
        assert_eq!(connector.state().page_ids().len(), 2);
        assert_eq!(
            pool.watch_target_id().await.as_deref(),
            Some(page.target_id())
        );
    }

    #[test(tokio::test)]
    async fn test_release_guarded_by_activity() {
        let (pool, connector, activity) = new_pool(Default::default());
        pool.attach(2).await.unwrap();

        assert!(activity.try_begin_fetch());
        assert!(!pool.release().await);
        assert!(connector.state().is_attached());

        activity.end_fetch();
        activity.begin_watch();
        assert!(!pool.release().await);
        assert!(connector.state().is_attached());

        activity.end_watch();
        assert!(pool.release().await);
        assert!(!connector.state().is_attached());
        assert!(!pool.is_attached().await);

        // already released
        assert!(!pool.release().await);
    }
}
