//! Rotating session tokens ("vqd")

use crate::client::ChatApi;
use crate::error::Result;

/// Ordered sequence of session tokens; the last one authorizes the next request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStore {
    tokens: Vec<String>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a fresh token from the backend and append it
    pub async fn acquire(&mut self, api: &ChatApi) -> Result<&str> {
        let token = api.fetch_token().await?;
        self.tokens.push(token);
        Ok(self.tokens.last().map(String::as_str).unwrap_or_default())
    }

    /// The token to send with the next request
    pub fn current(&self) -> Option<&str> {
        self.tokens.last().map(String::as_str)
    }

    pub fn push(&mut self, token: impl Into<String>) {
        self.tokens.push(token.into());
    }

    /// Keep tokens `[0, n)`, with `n` clamped to `[0, len)`
    pub fn truncate(&mut self, n: usize) {
        let n = n.min(self.tokens.len().saturating_sub(1));
        self.tokens.truncate(n);
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tokens
    }
}
