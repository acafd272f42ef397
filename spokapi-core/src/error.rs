#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Browser unavailable")]
    BrowserUnavailable,
    #[error("Browser protocol error: {0}")]
    BrowserProtocol(String),
    #[error("Timed out")]
    Timeout,
    #[error("Source not found")]
    SourceNotFound,
    #[error("Source disabled")]
    SourceDisabled,
    #[error("Provider unsupported")]
    ProviderUnsupported,
    #[error("Invalid time: {0}")]
    InvalidTime(String),
    #[error("std::io error: {0}")]
    IoError(std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(serde_json::Error),
    #[error("YAML error: {0}")]
    YamlError(serde_yaml::Error),
    #[error("URL error: {0}")]
    UrlError(url::ParseError),
    #[error("reqwest error: {0}")]
    ReqwestError(reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocketError(tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::UrlError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::BrowserUnavailable
        } else if err.is_timeout() {
            Self::Timeout
        } else {
            Self::ReqwestError(err)
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocketError(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
