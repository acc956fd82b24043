use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use slidewatch_common::config::ProgressConfig;
use tracing::debug;

use crate::ports::{ProgressError, ProgressResetter};

/// Resets a session's remote playback progress with one HTTP `PUT`.
pub struct HttpProgressResetter {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpProgressResetter {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, ProgressError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProgressError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &ProgressConfig) -> Result<Option<Self>, ProgressError> {
        match &config.endpoint {
            Some(endpoint) => Self::new(
                endpoint.clone(),
                config.token.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    fn body(id: &str) -> serde_json::Value {
        json!({ "session_id": id, "seconds": 0 })
    }
}

#[async_trait]
impl ProgressResetter for HttpProgressResetter {
    async fn reset_remote_progress(&self, id: &str) -> Result<(), ProgressError> {
        let mut request = self.client.put(&self.endpoint).json(&Self::body(id));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProgressError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProgressError::Status(response.status().as_u16()));
        }
        debug!(id, "remote progress reset");
        Ok(())
    }
}
