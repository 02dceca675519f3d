use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::request::AlertRequest;
use crate::{Error, Result};

/// Operations the operator needs from the alerting backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlertingClient: Send + Sync {
    /// Create the alert, or update it in place when `existing_id` is set.
    /// Returns the backend id of the alert.
    async fn create_or_update_alert(
        &self,
        request: &AlertRequest,
        existing_id: Option<String>,
    ) -> Result<String>;

    /// Delete an alert. Deleting an alert the backend no longer knows is not
    /// an error.
    async fn delete_alert(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct AlertResponse {
    id: String,
}

/// JSON over HTTP client for the alerting backend.
pub struct HttpAlertingClient {
    base_url: String,
    client: Client,
}

impl HttpAlertingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn alert_url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/alert/{}", self.base_url, id),
            None => format!("{}/alert", self.base_url),
        }
    }
}

#[async_trait]
impl AlertingClient for HttpAlertingClient {
    async fn create_or_update_alert(
        &self,
        request: &AlertRequest,
        existing_id: Option<String>,
    ) -> Result<String> {
        let builder = match existing_id.as_deref() {
            Some(id) => {
                debug!(alert = %request.name, id, "updating alert");
                self.client.put(self.alert_url(Some(id)))
            }
            None => {
                debug!(alert = %request.name, "creating alert");
                self.client.post(self.alert_url(None))
            }
        };

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("request for alert {} failed: {}", request.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "backend returned {} for alert {}: {}",
                status, request.name, body
            )));
        }

        let body: AlertResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("invalid backend response for alert {}: {}", request.name, e)))?;

        info!(alert = %request.name, id = %body.id, "alert synchronized with backend");
        Ok(body.id)
    }

    async fn delete_alert(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.alert_url(Some(id)))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("delete of alert {} failed: {}", id, e)))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(id, "alert already absent from backend");
                Ok(())
            }
            status => Err(Error::Backend(format!("backend returned {} deleting alert {}", status, id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_urls_trim_trailing_slash() {
        let client = HttpAlertingClient::new("http://backend:9090/api/v2/");
        assert_eq!(client.alert_url(None), "http://backend:9090/api/v2/alert");
        assert_eq!(client.alert_url(Some("42")), "http://backend:9090/api/v2/alert/42");
    }
}
