use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use super::ProviderLogin;
use super::SourceAdapter;
use crate::browser::Page;
use crate::config::Config;
use crate::config::ScriptedSourceConfig;
use crate::context::Credentials;
use crate::context::ProviderCredential;
use crate::error::Error;
use crate::models::LoginState;
use crate::models::Program;
use crate::models::WatchOutcome;
use crate::timewindow::TimeWindow;

/// A source whose listing and playback are described by page scripts.
pub struct ScriptedSource {
    id: String,
    source: ScriptedSourceConfig,
    config: Arc<Config>,
    login: ProviderLogin,
}

impl ScriptedSource {
    pub fn new(
        id: &str,
        source: ScriptedSourceConfig,
        config: Arc<Config>,
        credentials: Arc<Credentials>,
    ) -> Self {
        ScriptedSource {
            id: id.to_string(),
            source,
            login: ProviderLogin::new(config.clone(), credentials),
            config,
        }
    }

    fn make_programs(&self, entries: Vec<RawEntry>, date: NaiveDate) -> Vec<Program> {
        entries
            .into_iter()
            .filter_map(|entry| {
                let offset = entry
                    .zone
                    .as_ref()
                    .and_then(|zone| self.source.time_offsets.get(zone))
                    .copied()
                    .unwrap_or(0);
                let window = match TimeWindow::parse(date, &entry.time, offset) {
                    Ok(window) => window,
                    Err(err) => {
                        tracing::warn!(%err, source.id = self.id, entry.title, "Skip entry");
                        return None;
                    }
                };
                let channel = entry.channel.unwrap_or_else(|| self.source.channel.clone());
                let link = entry.link.unwrap_or_else(|| self.source.url.clone());
                let mut program = Program::new(self.id.as_str(), channel, entry.title, Some(link))
                    .with_time_window(&window);
                program.description = entry.description;
                program.season = entry.season;
                program.episode = entry.episode;
                program.episode_title = entry.episode_title;
                program.thumbnail_url = entry.thumbnail;
                Some(program)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> &str {
        &self.source.channel
    }

    async fn fetch_programs(&self, page: &dyn Page) -> Result<Vec<Program>, Error> {
        page.goto(&self.source.url, self.config.watch.navigation_timeout)
            .await?;
        let value = page
            .evaluate(&self.source.programs_script, self.config.browser.command_timeout)
            .await?;
        let entries: Vec<RawEntry> = match value {
            Value::Null => vec![],
            value => serde_json::from_value(value)?,
        };
        tracing::debug!(source.id = self.id, entries.len = entries.len());
        Ok(self.make_programs(entries, Local::now().date_naive()))
    }

    async fn watch(&self, page: &dyn Page, url: &str) -> Result<WatchOutcome, Error> {
        page.goto(url, self.config.watch.navigation_timeout).await?;
        page.bring_to_front().await?;

        let selector = self.source.login_required_selector.as_deref();
        match self.login.check_login_state(page, selector).await {
            LoginState::LoggedOut => {
                if !self.login(page).await? {
                    return Ok(WatchOutcome::Unsupported);
                }
            }
            state => tracing::debug!(source.id = self.id, ?state),
        }

        if let Some(ref script) = self.source.watch_script {
            page.evaluate(script, self.config.browser.command_timeout)
                .await?;
        }
        Ok(WatchOutcome::Playing)
    }

    async fn stop(&self, page: &dyn Page, message: Option<&str>) -> Result<(), Error> {
        page.goto(
            self.config.browser.stop_url(),
            self.config.watch.navigation_timeout,
        )
        .await?;
        if let Some(message) = message {
            let script = format!(
                r#"(() => {{
  const h = document.createElement("h1");
  h.textContent = {};
  document.body.replaceChildren(h);
}})()"#,
                serde_json::to_string(message)?
            );
            page.evaluate(&script, self.config.browser.command_timeout)
                .await?;
        }
        Ok(())
    }

    async fn login(&self, page: &dyn Page) -> Result<bool, Error> {
        let provider = match self.login.credential() {
            Some(credential) => credential.name,
            None => return Ok(false),
        };
        if !self.source.supports(&provider) {
            tracing::info!(source.id = self.id, provider, "Unsupported provider");
            return Ok(false);
        }
        self.login.login(page).await
    }

    fn provider(&self) -> Option<ProviderCredential> {
        self.login.credential()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    title: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    time: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    season: Option<u32>,
    #[serde(default)]
    episode: Option<u32>,
    #[serde(default)]
    episode_title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    zone: Option<String>,
}
