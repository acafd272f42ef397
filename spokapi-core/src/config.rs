use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use url::Url;

pub fn load<P: AsRef<Path>>(config_path: P) -> Arc<Config> {
    let config_path = config_path.as_ref();
    let reader = File::open(config_path).unwrap_or_else(|err| {
        panic!("Failed to open {}: {}", config_path.display(), err);
    });
    let mut config: Config = serde_yaml::from_reader(reader).unwrap_or_else(|err| {
        panic!("Failed to parse {}: {}", config_path.display(), err);
    });

    config
        .provider
        .override_with(|name| std::env::var(name).ok());
    config.validate();

    tracing::debug!(config.path = %config_path.display(), sources.len = config.sources.len());
    Arc::new(config)
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderFormConfig>,
    #[serde(default)]
    pub unsupported_channels: Vec<String>,
    // keeps the insertion order
    #[serde(default)]
    pub sources: IndexMap<String, ScriptedSourceConfig>,
}

impl Config {
    pub fn validate(&self) {
        self.browser.validate();
        self.scheduler.validate();
        self.watch.validate();
        self.providers
            .iter()
            .for_each(|(name, config)| config.validate(name));
        self.unsupported_channels.iter().for_each(|id| {
            assert!(
                !id.is_empty(),
                "config.unsupported-channels: must not contain an empty id"
            );
        });
        self.sources
            .iter()
            .for_each(|(id, config)| config.validate(id));
        assert_eq!(
            self.sources.len(),
            self.sources.keys().map(|id| id.to_lowercase()).unique().count(),
            "config.sources: ids must be unique regardless of case"
        );
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BrowserConfig {
    #[serde(default = "BrowserConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "BrowserConfig::default_neutral_url")]
    pub neutral_url: String,
    #[serde(default)]
    pub stop_url: Option<String>,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub geolocation: Option<GeolocationConfig>,
    #[serde(default = "BrowserConfig::default_clear_viewport_override")]
    pub clear_viewport_override: bool,
    #[serde(default = "BrowserConfig::default_command_timeout")]
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl BrowserConfig {
    fn default_endpoint() -> String {
        "http://127.0.0.1:9222".to_string()
    }

    fn default_neutral_url() -> String {
        "about:blank".to_string()
    }

    fn default_clear_viewport_override() -> bool {
        true
    }

    fn default_command_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn stop_url(&self) -> &str {
        self.stop_url.as_deref().unwrap_or(&self.neutral_url)
    }

    fn validate(&self) {
        assert!(
            Url::parse(&self.endpoint).is_ok(),
            "config.browser: `endpoint` must be a valid URL"
        );
        assert!(
            Url::parse(&self.neutral_url).is_ok(),
            "config.browser: `neutral-url` must be a valid URL"
        );
        if let Some(ref url) = self.stop_url {
            assert!(
                Url::parse(url).is_ok(),
                "config.browser: `stop-url` must be a valid URL"
            );
        }
        if let Some(ref url) = self.status_url {
            assert!(
                Url::parse(url).is_ok(),
                "config.browser: `status-url` must be a valid URL"
            );
        }
        if let Some(ref geolocation) = self.geolocation {
            geolocation.validate();
        }
        assert_ne!(
            self.command_timeout,
            Duration::ZERO,
            "config.browser: `command-timeout` must be a non-zero duration"
        );
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            endpoint: Self::default_endpoint(),
            neutral_url: Self::default_neutral_url(),
            stop_url: None,
            status_url: None,
            user_agent: None,
            geolocation: None,
            clear_viewport_override: Self::default_clear_viewport_override(),
            command_timeout: Self::default_command_timeout(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GeolocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "GeolocationConfig::default_accuracy")]
    pub accuracy: f64,
}

impl GeolocationConfig {
    fn default_accuracy() -> f64 {
        100.0
    }

    fn validate(&self) {
        assert!(
            (-90.0..=90.0).contains(&self.latitude),
            "config.browser.geolocation: `latitude` must be in -90..=90"
        );
        assert!(
            (-180.0..=180.0).contains(&self.longitude),
            "config.browser.geolocation: `longitude` must be in -180..=180"
        );
        assert!(
            self.accuracy >= 0.0,
            "config.browser.geolocation: `accuracy` must not be negative"
        );
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "SchedulerConfig::default_fetch_timeout")]
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    #[serde(default = "SchedulerConfig::default_refresh_interval")]
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(default = "SchedulerConfig::default_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub staleness: StalenessPolicy,
}

impl SchedulerConfig {
    fn default_max_concurrent_fetches() -> usize {
        3
    }

    fn default_fetch_timeout() -> Duration {
        Duration::from_secs(60)
    }

    fn default_refresh_interval() -> Duration {
        Duration::from_secs(120)
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn validate(&self) {
        assert!(
            self.max_concurrent_fetches >= 1,
            "config.scheduler: `max-concurrent-fetches` must be larger than 0"
        );
        assert_ne!(
            self.fetch_timeout,
            Duration::ZERO,
            "config.scheduler: `fetch-timeout` must be a non-zero duration"
        );
        assert_ne!(
            self.refresh_interval,
            Duration::ZERO,
            "config.scheduler: `refresh-interval` must be a non-zero duration"
        );
        assert_ne!(
            self.poll_interval,
            Duration::ZERO,
            "config.scheduler: `poll-interval` must be a non-zero duration"
        );
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_concurrent_fetches: Self::default_max_concurrent_fetches(),
            fetch_timeout: Self::default_fetch_timeout(),
            refresh_interval: Self::default_refresh_interval(),
            poll_interval: Self::default_poll_interval(),
            staleness: Default::default(),
        }
    }
}

/// What happens to entries of sources which a cycle didn't visit.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StalenessPolicy {
    #[default]
    Keep,
    MaxAge(#[serde(with = "humantime_serde")] Duration),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "WatchConfig::default_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "WatchConfig::default_navigation_timeout")]
    #[serde(with = "humantime_serde")]
    pub navigation_timeout: Duration,
}

impl WatchConfig {
    fn default_timeout() -> Duration {
        Duration::from_secs(300)
    }

    fn default_navigation_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn validate(&self) {
        assert_ne!(
            self.timeout,
            Duration::ZERO,
            "config.watch: `timeout` must be a non-zero duration"
        );
        assert_ne!(
            self.navigation_timeout,
            Duration::ZERO,
            "config.watch: `navigation-timeout` must be a non-zero duration"
        );
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            timeout: Self::default_timeout(),
            navigation_timeout: Self::default_navigation_timeout(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProviderConfig {
    const ENV_NAME: &'static str = "SPOKAPI_PROVIDER";
    const ENV_USERNAME: &'static str = "SPOKAPI_USERNAME";
    const ENV_PASSWORD: &'static str = "SPOKAPI_PASSWORD";

    fn override_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(Self::ENV_NAME) {
            self.name = Some(name);
        }
        if let Some(username) = lookup(Self::ENV_USERNAME) {
            self.username = Some(username);
        }
        if let Some(password) = lookup(Self::ENV_PASSWORD) {
            self.password = Some(password);
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ProviderFormConfig {
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    #[serde(default)]
    pub logged_in_selector: Option<String>,
}

impl ProviderFormConfig {
    fn validate(&self, name: &str) {
        assert!(
            !name.is_empty(),
            "config.providers: provider name must not be empty"
        );
        assert!(
            !self.username_selector.is_empty(),
            "config.providers[{}]: `username-selector` must be a non-empty string",
            name
        );
        assert!(
            !self.password_selector.is_empty(),
            "config.providers[{}]: `password-selector` must be a non-empty string",
            name
        );
        assert!(
            !self.submit_selector.is_empty(),
            "config.providers[{}]: `submit-selector` must be a non-empty string",
            name
        );
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ScriptedSourceConfig {
    pub url: String,
    pub channel: String,
    pub programs_script: String,
    #[serde(default)]
    pub time_offsets: HashMap<String, i64>,
    #[serde(default)]
    pub watch_script: Option<String>,
    #[serde(default)]
    pub login_required_selector: Option<String>,
    #[serde(default)]
    pub supported_providers: Vec<String>,
}

impl ScriptedSourceConfig {
    pub fn supports(&self, provider: &str) -> bool {
        self.supported_providers.is_empty()
            || self
                .supported_providers
                .iter()
                .any(|name| name.eq_ignore_ascii_case(provider))
    }

    fn validate(&self, id: &str) {
        assert!(!id.is_empty(), "config.sources: id must not be empty");
        assert!(
            Url::parse(&self.url).is_ok(),
            "config.sources[{}]: `url` must be a valid URL",
            id
        );
        assert!(
            !self.channel.is_empty(),
            "config.sources[{}]: `channel` must be a non-empty string",
            id
        );
        assert!(
            !self.programs_script.is_empty(),
            "config.sources[{}]: `programs-script` must be a non-empty string",
            id
        );
    }
}
