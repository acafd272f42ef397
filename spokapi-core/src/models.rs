use std::fmt;

use chrono::DateTime;
use chrono::Duration;
use chrono::Local;
use serde::Deserialize;
use serde::Serialize;

use crate::timewindow::TimeWindow;

/// One schedulable unit of content offered by a source.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub title: String,
    /// Opaque, resolved by the source adapter.
    pub link: String,
    pub start_time: DateTime<Local>,
    #[serde(with = "duration_milliseconds_option")]
    pub runtime: Option<Duration>,
    pub source_id: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub watching: bool,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Local>>,
}

impl Program {
    pub fn new<S, C, T>(source_id: S, channel: C, title: T, link: Option<String>) -> Self
    where
        S: Into<String>,
        C: Into<String>,
        T: Into<String>,
    {
        Program {
            title: title.into(),
            link: link.unwrap_or_default(),
            start_time: Local::now(),
            runtime: None,
            source_id: source_id.into(),
            channel: channel.into(),
            description: None,
            season: None,
            episode: None,
            episode_title: None,
            thumbnail_url: None,
            watching: false,
            stopped: false,
            fetched_at: None,
        }
    }

    pub fn with_time_window(mut self, window: &TimeWindow) -> Self {
        self.start_time = window.start_local();
        self.runtime = window.runtime;
        self
    }

    pub fn key(&self) -> ProgramKey {
        ProgramKey::new(&self.source_id, &self.link)
    }

    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.runtime.map(|runtime| self.start_time + runtime)
    }
}

/// Identifies the program played by a watch request.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProgramKey {
    pub source_id: String,
    pub link: String,
}

impl ProgramKey {
    pub fn new(source_id: &str, link: &str) -> Self {
        ProgramKey {
            source_id: source_id.to_string(),
            link: link.to_string(),
        }
    }
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.link)
    }
}

/// Live playback state overlaid onto cached programs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WatchStatus {
    pub watching: Option<ProgramKey>,
    pub stopped: Option<ProgramKey>,
}

impl WatchStatus {
    pub fn apply(&self, program: &mut Program) {
        let key = program.key();
        program.watching = self.watching.as_ref() == Some(&key);
        program.stopped = self.stopped.as_ref() == Some(&key);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoginState {
    LoggedIn,
    LoggedOut,
    Unknown,
}

/// How a watch request ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchOutcome {
    Playing,
    /// The source doesn't support the configured provider.
    Unsupported,
    /// A later watch or stop request took over the watch tab.
    Superseded,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRule {
    Allow,
    Block,
}

pub(crate) mod duration_milliseconds_option {
    use chrono::Duration;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serialize;
    use serde::Serializer;

    pub fn serialize<S>(opt: &Option<Duration>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        opt.map(|duration| duration.num_milliseconds()).serialize(s)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<i64>::deserialize(d)?.map(Duration::milliseconds))
    }
}
