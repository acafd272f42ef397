use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::*;

/// Shared state behind a fake browser.
#[derive(Default)]
pub(crate) struct BrowserState {
    pub(crate) pages: Mutex<Vec<Arc<PageStub>>>,
    pub(crate) connects: AtomicUsize,
    pub(crate) attached: AtomicUsize,
    pub(crate) unreachable: AtomicBool,
    pub(crate) evaluations: Mutex<HashMap<String, serde_json::Value>>,
    pub(crate) delays: Mutex<HashMap<String, Duration>>,
    next_id: AtomicUsize,
}

impl BrowserState {
    pub(crate) fn add_page(self: &Arc<Self>, url: &str) -> Arc<PageStub> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let page = Arc::new(PageStub {
            target_id: format!("T{}", id),
            state: Arc::downgrade(self),
            visits: Mutex::new(vec![url.to_string()]),
            scripts: Default::default(),
            user_agent: Default::default(),
        });
        self.pages.lock().unwrap().push(page.clone());
        page
    }

    pub(crate) fn page_ids(&self) -> Vec<String> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .map(|page| page.target_id.clone())
            .collect()
    }

    pub(crate) fn set_evaluation(&self, expression: &str, value: serde_json::Value) {
        self.evaluations
            .lock()
            .unwrap()
            .insert(expression.to_string(), value);
    }

    pub(crate) fn set_delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub(crate) struct BrowserConnectorStub(pub(crate) Arc<BrowserState>);

impl BrowserConnectorStub {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn state(&self) -> &Arc<BrowserState> {
        &self.0
    }
}

#[async_trait]
impl BrowserConnector for BrowserConnectorStub {
    async fn connect(&self) -> Result<Box<dyn Browser>, Error> {
        if self.0.unreachable.load(Ordering::SeqCst) {
            return Err(Error::BrowserUnavailable);
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        self.0.attached.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BrowserStub(self.0.clone())))
    }
}

pub(crate) struct BrowserStub(Arc<BrowserState>);

impl Drop for BrowserStub {
    fn drop(&mut self) {
        self.0.attached.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Browser for BrowserStub {
    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>, Error> {
        Ok(self
            .0
            .pages
            .lock()
            .unwrap()
            .iter()
            .map(|page| page.clone() as Arc<dyn Page>)
            .collect())
    }

    async fn new_page(&self) -> Result<Arc<dyn Page>, Error> {
        let page: Arc<dyn Page> = self.0.add_page("about:blank");
        Ok(page)
    }
}

pub(crate) struct PageStub {
    target_id: String,
    state: std::sync::Weak<BrowserState>,
    pub(crate) visits: Mutex<Vec<String>>,
    pub(crate) scripts: Mutex<Vec<String>>,
    pub(crate) user_agent: Mutex<Option<String>>,
}

impl PageStub {
    pub(crate) fn current_url(&self) -> String {
        self.visits.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub(crate) fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub(crate) fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Page for PageStub {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), Error> {
        let delay = self
            .state
            .upgrade()
            .and_then(|state| state.delays.lock().unwrap().get(url).cloned());
        if let Some(delay) = delay {
            tokio::time::timeout(timeout, tokio::time::sleep(delay)).await?;
        }
        self.visits.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn evaluate(
        &self,
        expression: &str,
        _timeout: Duration,
    ) -> Result<serde_json::Value, Error> {
        self.scripts.lock().unwrap().push(expression.to_string());
        let value = self.state.upgrade().and_then(|state| {
            state
                .evaluations
                .lock()
                .unwrap()
                .get(expression)
                .cloned()
        });
        Ok(value.unwrap_or(serde_json::Value::Null))
    }

    async fn bring_to_front(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), Error> {
        *self.user_agent.lock().unwrap() = Some(user_agent.to_string());
        Ok(())
    }

    async fn set_geolocation(&self, _geolocation: &GeolocationConfig) -> Result<(), Error> {
        Err(Error::BrowserProtocol("Permission denied".to_string()))
    }

    async fn clear_viewport_override(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(state) = self.state.upgrade() {
            state
                .pages
                .lock()
                .unwrap()
                .retain(|page| page.target_id != self.target_id);
        }
        Ok(())
    }
}
