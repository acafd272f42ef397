use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use super::*;

pub(crate) struct SourceStub {
    id: String,
    channel: String,
    programs: Mutex<Result<Vec<Program>, String>>,
    fetch_delay: Mutex<Duration>,
    watch_delay: Mutex<Duration>,
    supported: Mutex<bool>,
    fetches: AtomicUsize,
    pub(crate) watches: Mutex<Vec<String>>,
    pub(crate) stops: Mutex<Vec<Option<String>>>,
}

impl SourceStub {
    pub(crate) fn new(id: &str, channel: &str) -> Self {
        SourceStub {
            id: id.to_string(),
            channel: channel.to_string(),
            programs: Mutex::new(Ok(vec![])),
            fetch_delay: Mutex::new(Duration::ZERO),
            watch_delay: Mutex::new(Duration::ZERO),
            supported: Mutex::new(true),
            fetches: AtomicUsize::new(0),
            watches: Default::default(),
            stops: Default::default(),
        }
    }

    pub(crate) fn program(&self, title: &str) -> Program {
        Program::new(
            self.id.as_str(),
            self.channel.as_str(),
            title,
            Some(format!("https://{}/watch/{}", self.id, title)),
        )
    }

    pub(crate) fn with_programs(self, titles: &[&str]) -> Self {
        self.set_programs(titles);
        self
    }

    pub(crate) fn set_programs(&self, titles: &[&str]) {
        let programs = titles.iter().map(|title| self.program(title)).collect();
        *self.programs.lock().unwrap() = Ok(programs);
    }

    pub(crate) fn set_failure(&self, message: &str) {
        *self.programs.lock().unwrap() = Err(message.to_string());
    }

    pub(crate) fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn with_watch_delay(self, delay: Duration) -> Self {
        *self.watch_delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn unsupported(self) -> Self {
        *self.supported.lock().unwrap() = false;
        self
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn watches(&self) -> Vec<String> {
        self.watches.lock().unwrap().clone()
    }

    pub(crate) fn stops(&self) -> Vec<Option<String>> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for SourceStub {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    async fn fetch_programs(&self, page: &dyn Page) -> Result<Vec<Program>, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let url = format!("https://{}/listing", self.id);
        page.goto(&url, Duration::from_secs(1)).await?;
        let delay = *self.fetch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.programs
            .lock()
            .unwrap()
            .clone()
            .map_err(|message| Error::AnyhowError(anyhow::anyhow!(message)))
    }

    async fn watch(&self, page: &dyn Page, url: &str) -> Result<WatchOutcome, Error> {
        self.watches.lock().unwrap().push(url.to_string());
        let delay = *self.watch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if !self.login(page).await? {
            return Ok(WatchOutcome::Unsupported);
        }
        page.goto(url, Duration::from_secs(1)).await?;
        Ok(WatchOutcome::Playing)
    }

    async fn stop(&self, page: &dyn Page, message: Option<&str>) -> Result<(), Error> {
        self.stops
            .lock()
            .unwrap()
            .push(message.map(str::to_string));
        page.goto("about:blank", Duration::from_secs(1)).await
    }

    async fn login(&self, _page: &dyn Page) -> Result<bool, Error> {
        Ok(*self.supported.lock().unwrap())
    }

    fn provider(&self) -> Option<ProviderCredential> {
        None
    }
}
