//! Device telemetry JSON API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;

/// One JSON object from an API payload.
pub type Record = Map<String, Value>;

/// Response wrapper shared by all API endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    /// `"success"` on success.
    #[serde(default)]
    pub status: Option<String>,
    /// Device address, on per-device endpoints.
    #[serde(default)]
    pub address: Option<String>,
    /// Data rows, on per-device endpoints.
    #[serde(default)]
    pub data: Option<Vec<Record>>,
    /// Device list, on the devices endpoint.
    #[serde(default)]
    pub devices: Option<Vec<Record>>,
}

impl ApiEnvelope {
    /// Returns true if the status is `success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    /// The address, or an empty string.
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or("")
    }

    /// Data rows of a successful response; empty otherwise.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        if self.is_success() {
            self.data.as_deref().unwrap_or(&[])
        } else {
            &[]
        }
    }

    /// Wraps rows in a successful envelope.
    #[must_use]
    pub fn success(address: impl Into<String>, data: Vec<Record>) -> Self {
        Self {
            status: Some("success".to_string()),
            address: Some(address.into()),
            data: Some(data),
            devices: None,
        }
    }
}

/// Renders a JSON scalar as a table cell.
#[must_use]
pub fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Reads the `id` of a device record as text.
#[must_use]
pub fn device_id(record: &Record) -> Option<String> {
    let id = value_text(record.get("id"));
    (!id.is_empty()).then_some(id)
}

/// A `ds`/`de` range as the API expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRange {
    /// Start, formatted.
    pub start: String,
    /// End, formatted.
    pub end: String,
}

impl ApiRange {
    /// Creates a range from preformatted bounds.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Read access to the device API.
///
/// The device list is mandatory for every consumer, so its failure is an
/// error. Per-device calls are best effort and yield `None` on any failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceApiSource: Send + Sync + std::fmt::Debug {
    /// Lists all devices.
    async fn devices(&self) -> Result<Vec<Record>>;
    /// TDS samples.
    async fn water_quality(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope>;
    /// Filter throughput samples.
    async fn filter_speed(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope>;
    /// Latest sensor states.
    async fn sensors(&self, device_id: &str) -> Option<ApiEnvelope>;
    /// Dispensing statistics.
    async fn water_stats(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope>;
    /// Cash collections.
    async fn device_inkas(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope>;
}

pub use client::ApiClient;

mod client {
    use super::{ApiEnvelope, ApiRange, DeviceApiSource, Record};
    use crate::config::ApiConfig;
    use crate::errors::{Result, VodaflowError};
    use crate::pipeline::send_with_retry;
    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, USER_AGENT};
    use serde_json::{json, Value};
    use tracing::debug;

    const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

    /// HTTP implementation of [`DeviceApiSource`].
    #[derive(Debug, Clone)]
    pub struct ApiClient {
        client: reqwest::Client,
        config: ApiConfig,
    }

    fn id_value(device_id: &str) -> Value {
        device_id
            .parse::<i64>()
            .map_or_else(|_| Value::String(device_id.to_string()), Value::from)
    }

    impl ApiClient {
        /// Builds a client with browser-like default headers.
        pub fn new(config: ApiConfig) -> Result<Self> {
            let mut headers = HeaderMap::new();
            headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));
            headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
            let origin = HeaderValue::from_str(&config.origin)
                .map_err(|e| VodaflowError::Config(format!("invalid api origin: {e}")))?;
            headers.insert(ORIGIN, origin);
            let client = reqwest::Client::builder()
                .default_headers(headers)
                .timeout(config.timeout())
                .build()?;
            Ok(Self { client, config })
        }

        fn url(&self, endpoint: &str) -> String {
            format!("{}{endpoint}", self.config.base_url)
        }

        async fn post(&self, endpoint: &str, body: Value) -> Option<ApiEnvelope> {
            let request = self.client.post(self.url(endpoint)).json(&body);
            let response = match send_with_retry(&self.config.retry, request).await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    debug!(endpoint, status = %r.status(), "API call rejected");
                    return None;
                }
                Err(e) => {
                    debug!(endpoint, error = %e, "API call failed");
                    return None;
                }
            };
            response.json::<ApiEnvelope>().await.ok()
        }

        async fn post_ranged(
            &self,
            endpoint: &str,
            device_id: &str,
            range: &ApiRange,
        ) -> Option<ApiEnvelope> {
            let body = json!({
                "device_id": id_value(device_id),
                "ds": range.start,
                "de": range.end,
            });
            self.post(endpoint, body).await
        }
    }

    #[async_trait]
    impl DeviceApiSource for ApiClient {
        async fn devices(&self) -> Result<Vec<Record>> {
            let request = self.client.get(self.url("devices"));
            let response = send_with_retry(&self.config.retry, request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(VodaflowError::Api(format!("device list: HTTP {status}")));
            }
            let envelope: ApiEnvelope = response.json().await?;
            if !envelope.is_success() {
                return Err(VodaflowError::Api(format!(
                    "device list: status {}",
                    envelope.status.as_deref().unwrap_or("missing")
                )));
            }
            Ok(envelope.devices.unwrap_or_default())
        }

        async fn water_quality(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
            self.post_ranged("water_quality.php", device_id, range).await
        }

        async fn filter_speed(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
            self.post_ranged("water_filter_speed.php", device_id, range).await
        }

        async fn sensors(&self, device_id: &str) -> Option<ApiEnvelope> {
            self.post("device_sensors.php", json!({ "device_id": id_value(device_id) }))
                .await
        }

        async fn water_stats(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
            self.post_ranged("water/index.php", device_id, range).await
        }

        async fn device_inkas(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
            self.post_ranged("device_inkas.php", device_id, range).await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_numeric_ids_sent_as_numbers() {
            assert_eq!(id_value("42"), json!(42));
            assert_eq!(id_value("A-1"), json!("A-1"));
        }

        #[test]
        fn test_url_join() {
            let client = ApiClient::new(ApiConfig::default()).unwrap();
            assert_eq!(
                client.url("devices"),
                "https://soliton.net.ua/water/api/devices"
            );
        }
    }
}
