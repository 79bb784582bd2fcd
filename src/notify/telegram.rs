use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::Notifier;
use crate::error::NotifyError;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage` transport.
#[derive(Clone)]
pub struct TelegramNotifier {
    token: String,
    base_url: String,
    client: Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ReplyParameters>,
}

#[derive(Debug, Deserialize)]
struct ReplyParameters {
    retry_after: Option<u64>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: API_BASE.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Point at a different Bot API host (local bot server, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

/// Map an HTTP status plus the Bot API body onto the transport error model.
fn classify(status: StatusCode, body: &str) -> Result<(), NotifyError> {
    let reply: Option<ApiReply> = serde_json::from_str(body).ok();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let wait = reply
            .as_ref()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after)
            .unwrap_or(1);
        return Err(NotifyError::RetryAfter(Duration::from_secs(wait)));
    }

    match reply {
        Some(r) if status.is_success() && r.ok => Ok(()),
        Some(r) => Err(NotifyError::Fatal(format!(
            "telegram HTTP {}: {}",
            status.as_u16(),
            r.description.unwrap_or_else(|| "no description".into())
        ))),
        None => Err(NotifyError::Fatal(format!("telegram HTTP {}: unreadable reply", status.as_u16()))),
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        let payload = SendMessage {
            chat_id: destination,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let rsp = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Fatal(format!("telegram request failed: {}", e.without_url())))?;

        let status = rsp.status();
        let body = rsp
            .text()
            .await
            .map_err(|e| NotifyError::Fatal(format!("telegram body read failed: {}", e.without_url())))?;
        classify(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_reply_carries_wait() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#;
        match classify(StatusCode::TOO_MANY_REQUESTS, body) {
            Err(NotifyError::RetryAfter(d)) => assert_eq!(d, Duration::from_secs(7)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_request_is_fatal() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        match classify(StatusCode::BAD_REQUEST, body) {
            Err(NotifyError::Fatal(msg)) => assert!(msg.contains("chat not found")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ok_reply() {
        assert!(classify(StatusCode::OK, r#"{"ok":true,"result":{"message_id":1}}"#).is_ok());
        assert!(classify(StatusCode::BAD_GATEWAY, "<html>").is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let n = TelegramNotifier::new("123:abc").with_base_url("http://localhost:8081/");
        assert_eq!(n.endpoint(), "http://localhost:8081/bot123:abc/sendMessage");
    }
}
