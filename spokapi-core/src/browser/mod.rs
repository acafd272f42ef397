mod devtools;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::GeolocationConfig;
use crate::error::Error;

pub use devtools::DevToolsConnector;

#[cfg(test)]
pub(crate) mod stub;

/// One browser page used as a leasable execution context.
///
/// Implementations must be cheap to clone through `Arc` and tolerate their
/// futures being dropped at any await point.
#[async_trait]
pub trait Page: Send + Sync {
    /// Opaque identifier which stays the same while the page lives.
    fn target_id(&self) -> &str;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), Error>;

    async fn evaluate(
        &self,
        expression: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, Error>;

    async fn bring_to_front(&self) -> Result<(), Error>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), Error>;

    async fn set_geolocation(&self, geolocation: &GeolocationConfig) -> Result<(), Error>;

    async fn clear_viewport_override(&self) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// A live connection to the shared browser.
///
/// Dropping it detaches from the browser without closing the browser.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>, Error>;

    async fn new_page(&self) -> Result<Arc<dyn Page>, Error>;
}

#[async_trait]
pub trait BrowserConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Browser>, Error>;
}
