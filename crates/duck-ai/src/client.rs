//! HTTP client for the Duck.ai chat backend

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, DNT, HeaderMap, HeaderName, HeaderValue, REFERER,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::framing;
use crate::types::ConversationLog;

/// Default endpoint root; `/status` and `/chat` are appended
pub const DEFAULT_BASE_URL: &str = "https://duckduckgo.com/duckchat/v1";

/// Default browser user agent sent with every request
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Header carrying the session token in both directions
pub const TOKEN_HEADER: &str = "x-vqd-4";

/// Header requesting a fresh token from `/status`
pub const TOKEN_ACCEPT_HEADER: &str = "x-vqd-accept";

/// Connection settings for [`ChatApi`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Whole-request timeout, including reading a streamed body
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: None,
        }
    }
}

/// A buffered reply from `/chat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Refreshed token, if the backend sent one
    pub token: Option<String>,
}

/// Thin wrapper over `reqwest::Client` speaking the backend's wire contract
pub struct ChatApi {
    client: reqwest::Client,
    base_url: String,
}

impl ChatApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(default_headers());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Request a fresh session token from `/status`
    pub async fn fetch_token(&self) -> Result<String> {
        let url = format!("{}/status", self.base_url);
        debug!(%url, "Requesting session token");

        let response = self
            .client
            .get(&url)
            .header(TOKEN_ACCEPT_HEADER, "1")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await?;
            return Err(Error::RateLimited(error_type_or_body(&body)));
        }

        token_header(response.headers()).ok_or_else(|| {
            Error::Protocol(format!("No {TOKEN_HEADER} header in status response ({status})"))
        })
    }

    /// POST the log to `/chat`. Returns the response with its body unread;
    /// any non-success status is turned into an error here.
    pub async fn chat(&self, log: &ConversationLog, token: &str) -> Result<reqwest::Response> {
        let url = format!("{}/chat", self.base_url);
        debug!(model = %log.model, messages = log.len(), "Sending chat request");

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(TOKEN_HEADER, token)
            .json(log)
            .send()
            .await?;

        let status = response.status();
        debug!(%status, "Chat response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await?;
        Err(classify_failure(status, &body))
    }

    /// Send the log and read the whole framed reply
    pub async fn complete(&self, log: &ConversationLog, token: &str) -> Result<Reply> {
        let response = self.chat(log, token).await?;
        let token = token_header(response.headers());
        let body = response.bytes().await?;
        let text = framing::decode_full(&body)?.concat();
        debug!(chars = text.len(), "Decoded buffered reply");
        Ok(Reply { text, token })
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(REFERER, HeaderValue::from_static("https://duckduckgo.com/"));
    headers.insert(DNT, HeaderValue::from_static("1"));
    for (name, value) in [
        ("sec-gpc", "1"),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-origin"),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    headers
}

/// Read the rotating token from a response's headers
pub fn token_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// The `type` field of a JSON error body, or the raw body
fn error_type_or_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| body.to_string())
}

/// Map a non-success `/chat` reply to an error. In-band throttling frames
/// take precedence over the bare HTTP status.
fn classify_failure(status: StatusCode, body: &[u8]) -> Error {
    match framing::decode_full(body) {
        Err(e @ (Error::RateLimited(_) | Error::ConversationLimit(_))) => e,
        _ if status == StatusCode::TOO_MANY_REQUESTS => {
            Error::RateLimited(String::from_utf8_lossy(body).into_owned())
        }
        _ => Error::Protocol(format!(
            "Unexpected status {status}: {}",
            String::from_utf8_lossy(body)
        )),
    }
}
