//! HTTP client for panel device pairing endpoints.
//!
//! Three endpoints, one required behavior each: `/api/info` (identity, with
//! orphan-panel recovery), `/api/unpair` (unauthenticated reset), and
//! `/pair` (secret delivery). Timeouts, connection failures, and disallowed
//! statuses all map uniformly into [`ClientError`].

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{info, warn};

use super::errors::ClientError;

const INFO_TIMEOUT: Duration = Duration::from_secs(5);
const UNPAIR_TIMEOUT: Duration = Duration::from_secs(10);
const PAIR_TIMEOUT: Duration = Duration::from_secs(20);
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client wrapper for one panel device.
pub struct HttpClient {
    client: reqwest::Client,
    host: String,
    port: u16,
    secret: Option<String>,
}

impl HttpClient {
    pub fn new(host: impl Into<String>, port: u16, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
            port,
            secret,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    fn bearer(&self, request: reqwest::RequestBuilder, secret: Option<&str>) -> reqwest::RequestBuilder {
        match secret {
            Some(token) if !token.is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }

    /// Fetch the device-provided unique id from `/api/info`.
    ///
    /// After pairing the endpoint requires bearer authentication; before
    /// pairing it must allow unauthenticated access. A `401` while holding a
    /// stored secret is the orphan-panel scenario: the device kept a secret
    /// the coordinator has lost. Recovery is to unpair (unauthenticated)
    /// and retry once without a bearer. A second `401` is terminal.
    pub async fn fetch_device_id(&self) -> Result<Option<String>, ClientError> {
        self.fetch_device_id_inner(self.secret.as_deref(), true).await
    }

    async fn fetch_device_id_inner(
        &self,
        secret: Option<&str>,
        retry_without_auth: bool,
    ) -> Result<Option<String>, ClientError> {
        let request = self
            .bearer(self.client.get(self.url("/api/info")), secret)
            .timeout(INFO_TIMEOUT);

        let response = request
            .send()
            .await
            .map_err(|err| map_http_error(err, "device info request"))?;

        if response.status().as_u16() == 401 && self.secret.is_some() && retry_without_auth {
            // Orphan panel: force the device back to the unpaired state,
            // then retry exactly once without credentials.
            warn!(host = %self.host, "device rejected stored secret, attempting unpair recovery");
            self.unpair_device().await?;
            return Box::pin(self.fetch_device_id_inner(None, false)).await;
        }

        if !response.status().is_success() {
            return Ok(None);
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| map_http_error(err, "device info response"))?;
        Ok(extract_device_id(&data))
    }

    /// Send the pairing secret to `/pair`. Any non-200 status is an error.
    pub async fn send_pairing_secret(&self, secret: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/pair"))
            .json(&json!({ "secret": secret }))
            .timeout(PAIR_TIMEOUT)
            .send()
            .await
            .map_err(|err| map_http_error(err, "pairing request"))?;

        if response.status().as_u16() != 200 {
            return Err(ClientError::Response {
                status: response.status().as_u16(),
                message: "pairing failed with non-200 response".to_string(),
            });
        }
        info!(host = %self.host, "pairing secret delivered");
        Ok(())
    }

    /// Unpair the device via the unauthenticated `/api/unpair` endpoint.
    ///
    /// The device must accept unauthenticated POSTs, clear its stored
    /// secret, return 200, and stay idempotent when already unpaired.
    pub async fn unpair_device(&self) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/api/unpair"))
            .timeout(UNPAIR_TIMEOUT)
            .send()
            .await
            .map_err(|err| map_http_error(err, "unpair request"))?;

        if response.status().as_u16() != 200 {
            return Err(ClientError::Response {
                status: response.status().as_u16(),
                message: "unpair failed, device must return 200".to_string(),
            });
        }
        Ok(())
    }

    /// Fetch a device screenshot. Non-200 yields `None`.
    pub async fn fetch_screenshot(
        &self,
        secret: Option<&str>,
    ) -> Result<Option<(Vec<u8>, String)>, ClientError> {
        let request = self
            .bearer(self.client.get(self.url("/api/screenshot")), secret)
            .timeout(SCREENSHOT_TIMEOUT);

        let response = request
            .send()
            .await
            .map_err(|err| map_http_error(err, "screenshot request"))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| map_http_error(err, "screenshot response"))?;
        Ok(Some((bytes.to_vec(), content_type)))
    }
}

/// The `/api/info` response may use any of three id field names.
fn extract_device_id(data: &Value) -> Option<String> {
    ["id", "unique_id", "device_id"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn map_http_error(err: reqwest::Error, operation: &str) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(format!("{operation} timed out"))
    } else if err.is_connect() {
        ClientError::Connection(format!("{operation} failed: {err}"))
    } else {
        ClientError::Client(format!("{operation} failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_extraction_prefers_id_then_aliases() {
        assert_eq!(
            extract_device_id(&json!({"id": "a", "unique_id": "b"})).as_deref(),
            Some("a")
        );
        assert_eq!(
            extract_device_id(&json!({"unique_id": "b"})).as_deref(),
            Some("b")
        );
        assert_eq!(
            extract_device_id(&json!({"device_id": "c"})).as_deref(),
            Some("c")
        );
        assert_eq!(extract_device_id(&json!({"name": "panel"})), None);
    }

    #[tokio::test]
    async fn connection_failure_maps_to_connection_error() {
        // Nothing listens on this port.
        let client = HttpClient::new("127.0.0.1", 1, None);
        match client.unpair_device().await {
            Err(ClientError::Connection(_)) => {}
            other => panic!("expected connection error, got {other:?}"),
        }
    }
}
