//! ---
//! flx_section: "05-networking-external-interfaces"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Network connectivity and edge adapters."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::Result;

const REALTIME_SAMPLE: &str = "realtime-sample";
const CURRENT_ORDER: &str = "current-order";
const CURRENT_ORDER_CLEAR: &str = "current-order/clear";
const MACHINE_SECTIONS: &str = "machine-sections";

/// Errors raised while talking to the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The configured base URL or an endpoint path could not be parsed.
    #[error("invalid relay url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Transport-level failure, including timeouts and body decoding.
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The relay answered with a non-success status.
    #[error("relay endpoint {endpoint} answered {status}")]
    Status {
        /// Endpoint path that was called.
        endpoint: &'static str,
        /// HTTP status code returned.
        status: u16,
    },
}

/// Order assignment pushed to the relay when a job starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOrder {
    /// Order identifier.
    pub order_id: String,
    /// Order number.
    pub order_no: String,
    /// Box style code.
    pub box_no: String,
    /// Target quantity.
    pub target_qty: u64,
}

/// Display metadata for a section of the press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSection {
    /// Section identifier.
    pub id: String,
    /// Section name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Sort order on the overview screen.
    #[serde(default)]
    pub display_order: i32,
    /// Whether the section is shown at all.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Input signal that reports the section running.
    #[serde(default)]
    pub run_signal: Option<String>,
    /// Value of `run_signal` meaning running.
    #[serde(default)]
    pub run_value: Option<String>,
    /// Input signal that reports a fault.
    #[serde(default)]
    pub error_signal: Option<String>,
    /// Value of `error_signal` meaning fault.
    #[serde(default)]
    pub error_value: Option<String>,
}

fn default_active() -> bool {
    true
}

/// Operations the console needs from the telemetry relay.
#[async_trait]
pub trait TelemetryRelay: Send + Sync {
    /// Latest raw sample payload, `None` when the relay has nothing yet.
    async fn fetch_sample(&self) -> Result<Option<Value>>;
    /// Tell the relay which order is running.
    async fn set_current_order(&self, order: &CurrentOrder) -> Result<()>;
    /// Tell the relay nothing is running.
    async fn clear_current_order(&self) -> Result<()>;
    /// Section metadata for overview displays.
    async fn machine_sections(&self) -> Result<Vec<MachineSection>>;
}

/// [`TelemetryRelay`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRelayClient {
    client: Client,
    base: Url,
}

impl HttpRelayClient {
    /// Build a client rooted at `base_url`; every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// Base URL every endpoint is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &'static str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await?;
        check_status(path, response.status())?;
        debug!(endpoint = path, "relay post accepted");
        Ok(())
    }
}

fn check_status(endpoint: &'static str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(RelayError::Status {
            endpoint,
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl TelemetryRelay for HttpRelayClient {
    async fn fetch_sample(&self) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.endpoint(REALTIME_SAMPLE)?)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        check_status(REALTIME_SAMPLE, status)?;
        let value = response.json::<Value>().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn set_current_order(&self, order: &CurrentOrder) -> Result<()> {
        self.post_json(CURRENT_ORDER, order).await
    }

    async fn clear_current_order(&self) -> Result<()> {
        self.post_json(CURRENT_ORDER_CLEAR, &serde_json::json!({}))
            .await
    }

    async fn machine_sections(&self) -> Result<Vec<MachineSection>> {
        let response = self
            .client
            .get(self.endpoint(MACHINE_SECTIONS)?)
            .send()
            .await?;
        check_status(MACHINE_SECTIONS, response.status())?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let client = HttpRelayClient::new("http://relay.local/api", Duration::from_secs(1))
            .expect("client");
        assert_eq!(client.base_url().as_str(), "http://relay.local/api/");
        assert_eq!(
            client.endpoint(CURRENT_ORDER_CLEAR).unwrap().as_str(),
            "http://relay.local/api/current-order/clear"
        );
    }

    #[test]
    fn rejects_unparseable_base() {
        assert!(matches!(
            HttpRelayClient::new("not a url", Duration::from_secs(1)),
            Err(RelayError::InvalidUrl(_))
        ));
    }

    #[test]
    fn machine_section_defaults_missing_fields() {
        let section: MachineSection =
            serde_json::from_str(r#"{"id":"s1","name":"Printer 1"}"#).unwrap();
        assert!(section.is_active);
        assert_eq!(section.run_signal, None);
    }
}
