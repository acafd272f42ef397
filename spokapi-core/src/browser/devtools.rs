use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use super::Browser;
use super::BrowserConnector;
use super::Page;
use crate::config::BrowserConfig;
use crate::config::GeolocationConfig;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Attaches to an externally-owned Chromium through its DevTools endpoint.
pub struct DevToolsConnector(Arc<Endpoint>);

impl DevToolsConnector {
    pub fn new(config: &BrowserConfig) -> Result<Self, Error> {
        let base = Url::parse(&config.endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(config.command_timeout)
            .build()?;
        Ok(DevToolsConnector(Arc::new(Endpoint {
            base,
            client,
            command_timeout: config.command_timeout,
        })))
    }
}

#[async_trait]
impl BrowserConnector for DevToolsConnector {
    async fn connect(&self) -> Result<Box<dyn Browser>, Error> {
        let version: VersionInfo = self.0.get("json/version").await?;
        tracing::debug!(browser.version = version.browser, "Connected");
        Ok(Box::new(DevToolsBrowser {
            endpoint: self.0.clone(),
            pages: Default::default(),
        }))
    }
}

struct Endpoint {
    base: Url,
    client: reqwest::Client,
    command_timeout: Duration,
}

impl Endpoint {
    async fn get<T>(&self, path: &str) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.base.join(path)?;
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn put<T>(&self, path: &str, query: &str) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut url = self.base.join(path)?;
        url.set_query(Some(query));
        Ok(self
            .client
            .put(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    // Some endpoints reply with a plain text body.
    async fn touch(&self, path: &str) -> Result<(), Error> {
        let url = self.base.join(path)?;
        self.client.get(url).send().await?.error_for_status()?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionInfo {
    browser: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
}

struct DevToolsBrowser {
    endpoint: Arc<Endpoint>,
    // Pages already handed out keep their WebSocket sessions.
    pages: Mutex<HashMap<String, Arc<DevToolsPage>>>,
}

impl DevToolsBrowser {
    fn make_page(&self, target: TargetInfo) -> Option<Arc<DevToolsPage>> {
        let ws_url = target.web_socket_debugger_url?;
        Some(Arc::new(DevToolsPage {
            target_id: target.id,
            endpoint: self.endpoint.clone(),
            session: Mutex::new(Session::new(ws_url)),
        }))
    }
}

#[async_trait]
impl Browser for DevToolsBrowser {
    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>, Error> {
        let targets: Vec<TargetInfo> = self.endpoint.get("json/list").await?;
        let mut cache = self.pages.lock().await;
        let mut pages: Vec<Arc<dyn Page>> = vec![];
        let mut alive = vec![];
        for target in targets.into_iter().filter(|target| target.kind == "page") {
            alive.push(target.id.clone());
            if let Some(page) = cache.get(&target.id) {
                pages.push(page.clone());
                continue;
            }
            tracing::debug!(page.id = %target.id, page.url = %target.url, "Found page");
            if let Some(page) = self.make_page(target) {
                cache.insert(page.target_id.clone(), page.clone());
                pages.push(page);
            }
        }
        cache.retain(|id, _| alive.contains(id));
        Ok(pages)
    }

    async fn new_page(&self) -> Result<Arc<dyn Page>, Error> {
        let target: TargetInfo = self.endpoint.put("json/new", "about:blank").await?;
        tracing::debug!(page.id = %target.id, "Created page");
        let page = self
            .make_page(target)
            .ok_or_else(|| Error::BrowserProtocol("No WebSocket URL for a new page".to_string()))?;
        self.pages
            .lock()
            .await
            .insert(page.target_id.clone(), page.clone());
        Ok(page)
    }
}

struct DevToolsPage {
    target_id: String,
    endpoint: Arc<Endpoint>,
    session: Mutex<Session>,
}

impl DevToolsPage {
    async fn command(&self, method: &str, params: Value) -> Result<Value, Error> {
        tokio::time::timeout(self.endpoint.command_timeout, async {
            self.session.lock().await.call(method, params).await
        })
        .await?
    }

    async fn navigate(&self, url: &str) -> Result<(), Error> {
        let mut session = self.session.lock().await;
        session.call("Page.enable", json!({})).await?;
        let id = session.send("Page.navigate", json!({ "url": url })).await?;
        let mut navigated = false;
        loop {
            let msg = session.recv().await?;
            if msg.id == Some(id) {
                let result = msg.into_result()?;
                if let Some(text) = result.get("errorText").and_then(Value::as_str) {
                    return Err(Error::BrowserProtocol(format!("{}: {}", url, text)));
                }
                if result.get("loaderId").is_none() {
                    // same-document navigation
                    return Ok(());
                }
                navigated = true;
            } else if navigated && msg.method.as_deref() == Some("Page.loadEventFired") {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Page for DevToolsPage {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), Error> {
        tokio::time::timeout(timeout, self.navigate(url)).await?
    }

    async fn evaluate(&self, expression: &str, timeout: Duration) -> Result<Value, Error> {
        let params = json!({
            "expression": expression,
            "returnByValue": true,
            "awaitPromise": true,
        });
        let result = tokio::time::timeout(timeout, async {
            self.session
                .lock()
                .await
                .call("Runtime.evaluate", params)
                .await
        })
        .await??;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("exception thrown");
            return Err(Error::BrowserProtocol(text.to_string()));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    async fn bring_to_front(&self) -> Result<(), Error> {
        let path = format!("json/activate/{}", self.target_id);
        self.endpoint.touch(&path).await
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), Error> {
        self.command(
            "Emulation.setUserAgentOverride",
            json!({ "userAgent": user_agent }),
        )
        .await?;
        Ok(())
    }

    async fn set_geolocation(&self, geolocation: &GeolocationConfig) -> Result<(), Error> {
        self.command(
            "Emulation.setGeolocationOverride",
            json!({
                "latitude": geolocation.latitude,
                "longitude": geolocation.longitude,
                "accuracy": geolocation.accuracy,
            }),
        )
        .await?;
        Ok(())
    }

    async fn clear_viewport_override(&self) -> Result<(), Error> {
        self.command("Emulation.clearDeviceMetricsOverride", json!({}))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let path = format!("json/close/{}", self.target_id);
        self.endpoint.touch(&path).await
    }
}

// A WebSocket session is opened lazily and reopened after an error.
struct Session {
    ws_url: String,
    stream: Option<WsStream>,
    next_id: u64,
}

impl Session {
    fn new(ws_url: String) -> Self {
        Session {
            ws_url,
            stream: None,
            next_id: 0,
        }
    }

    async fn stream(&mut self) -> Result<&mut WsStream, Error> {
        if self.stream.is_none() {
            let (stream, _) = connect_async(self.ws_url.as_str()).await?;
            tracing::debug!(ws.url = self.ws_url, "Opened session");
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(Error::BrowserUnavailable)
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.send(method, params).await?;
        loop {
            let msg = self.recv().await?;
            if msg.id == Some(id) {
                return msg.into_result();
            }
        }
    }

    async fn send(&mut self, method: &str, params: Value) -> Result<u64, Error> {
        self.next_id += 1;
        let id = self.next_id;
        let text = json!({ "id": id, "method": method, "params": params }).to_string();
        let result = self.stream().await?.send(Message::Text(text)).await;
        if let Err(err) = result {
            self.stream = None;
            return Err(err.into());
        }
        Ok(id)
    }

    async fn recv(&mut self) -> Result<CdpMessage, Error> {
        loop {
            let next = self.stream().await?.next().await;
            match next {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(_))) | None => {
                    self.stream = None;
                    return Err(Error::BrowserUnavailable);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    self.stream = None;
                    return Err(err.into());
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CdpMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<CdpError>,
}

impl CdpMessage {
    fn into_result(self) -> Result<Value, Error> {
        match self.error {
            Some(err) => Err(Error::BrowserProtocol(format!(
                "{} ({})",
                err.message, err.code
            ))),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CdpError {
    code: i64,
    message: String,
}
