use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::browser::Page;
use crate::config::Config;
use crate::config::ProviderFormConfig;
use crate::context::Credentials;
use crate::context::ProviderCredential;
use crate::error::Error;
use crate::models::LoginState;

const LOGIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Provider login behavior shared by adapters.
///
/// Login forms are described per provider in the configuration.
pub struct ProviderLogin {
    config: Arc<Config>,
    credentials: Arc<Credentials>,
}

impl ProviderLogin {
    pub fn new(config: Arc<Config>, credentials: Arc<Credentials>) -> Self {
        ProviderLogin {
            config,
            credentials,
        }
    }

    pub fn credential(&self) -> Option<ProviderCredential> {
        self.credentials.get()
    }

    fn form(&self, provider: &str) -> Option<&ProviderFormConfig> {
        self.config
            .providers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(provider))
            .map(|(_, form)| form)
    }

    pub async fn check_login_state(
        &self,
        page: &dyn Page,
        login_required_selector: Option<&str>,
    ) -> LoginState {
        let form = self
            .credential()
            .and_then(|credential| self.form(&credential.name).cloned());
        let script = probe_script(
            form.as_ref().and_then(|form| form.logged_in_selector.as_deref()),
            login_required_selector,
            form.as_ref().map(|form| form.username_selector.as_str()),
        );
        match page.evaluate(&script, self.config.browser.command_timeout).await {
            Ok(Value::String(state)) => match state.as_str() {
                "logged-in" => LoginState::LoggedIn,
                "logged-out" => LoginState::LoggedOut,
                _ => LoginState::Unknown,
            },
            Ok(_) => LoginState::Unknown,
            Err(err) => {
                tracing::debug!(%err, "Failed to probe login state");
                LoginState::Unknown
            }
        }
    }

    /// Fills the provider's login form in the page and submits it.
    ///
    /// Returns `false` when no provider is configured or its form is unknown.
    pub async fn login(&self, page: &dyn Page) -> Result<bool, Error> {
        let credential = match self.credential() {
            Some(credential) => credential,
            None => {
                tracing::debug!("No provider configured");
                return Ok(false);
            }
        };
        let form = match self.form(&credential.name) {
            Some(form) => form,
            None => {
                tracing::warn!(provider = credential.name, "No login form for the provider");
                return Ok(false);
            }
        };

        let script = fill_script(form, &credential)?;
        let timeout = self.config.browser.command_timeout;
        match page.evaluate(&script, timeout).await? {
            Value::Bool(true) => (),
            _ => {
                return Err(Error::BrowserProtocol(format!(
                    "Login form of {} not found",
                    credential.name
                )));
            }
        }
        tracing::info!(provider = credential.name, "Submitted login form");

        if form.logged_in_selector.is_none() {
            return Ok(true);
        }
        tokio::time::timeout(self.config.watch.navigation_timeout, async {
            loop {
                tokio::time::sleep(LOGIN_POLL_INTERVAL).await;
                if self.check_login_state(page, None).await == LoginState::LoggedIn {
                    return;
                }
            }
        })
        .await?;
        Ok(true)
    }
}

pub(super) fn probe_script(
    logged_in_selector: Option<&str>,
    login_required_selector: Option<&str>,
    username_selector: Option<&str>,
) -> String {
    format!(
        r#"(() => {{
  const q = (s) => s !== null && document.querySelector(s) !== null;
  if (q({})) return "logged-in";
  if (q({}) || q({})) return "logged-out";
  return "unknown";
}})()"#,
        js_string(logged_in_selector),
        js_string(login_required_selector),
        js_string(username_selector),
    )
}

fn fill_script(form: &ProviderFormConfig, credential: &ProviderCredential) -> Result<String, Error> {
    Ok(format!(
        r#"(() => {{
  const fill = (selector, value) => {{
    const input = document.querySelector(selector);
    if (input === null) return false;
    input.focus();
    input.value = value;
    input.dispatchEvent(new Event("input", {{ bubbles: true }}));
    input.dispatchEvent(new Event("change", {{ bubbles: true }}));
    return true;
  }};
  if (!fill({}, {})) return false;
  if (!fill({}, {})) return false;
  const submit = document.querySelector({});
  if (submit === null) return false;
  submit.click();
  return true;
}})()"#,
        serde_json::to_string(&form.username_selector)?,
        serde_json::to_string(&credential.username)?,
        serde_json::to_string(&form.password_selector)?,
        serde_json::to_string(&credential.password)?,
        serde_json::to_string(&form.submit_selector)?,
    ))
}

// "null" or a quoted JavaScript string literal.
fn js_string(value: Option<&str>) -> String {
    match value {
        Some(value) => Value::from(value).to_string(),
        None => "null".to_string(),
    }
}
