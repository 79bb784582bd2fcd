use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::SourceError;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Thin wrapper over a shared `reqwest::Client` with the configured timeout.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub async fn get_text(&self, source_id: &str, url: &str) -> Result<String, SourceError> {
        let secs = self.timeout.as_secs();
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::from_reqwest(source_id, secs, e))?;
        resp.text()
            .await
            .map_err(|e| SourceError::from_reqwest(source_id, secs, e))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, source_id: &str, url: &str) -> Result<T, SourceError> {
        let body = self.get_text(source_id, url).await?;
        serde_json::from_str(&body).map_err(|e| SourceError::malformed(source_id, format!("invalid JSON: {e}")))
    }
}
