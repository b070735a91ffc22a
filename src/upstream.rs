//! External collaborators consulted by the report compiler.
//!
//! Both are opaque: the health tally is three integers, the narrative is a
//! string. HTTP-backed implementations are used when a URL is configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::HealthTally;

// ---

#[async_trait]
pub trait HealthTallySource: Send + Sync {
    async fn counts(&self) -> Result<HealthTally>;
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Fails with [`Error::Generation`] when no text could be produced.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Health tally fetched with `GET {url}` returning `{healthy, unhealthy, total}`.
pub struct HttpHealthTally {
    client: Client,
    url: String,
}

impl HttpHealthTally {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HealthTallySource for HttpHealthTally {
    async fn counts(&self) -> Result<HealthTally> {
        // ---
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::upstream("health tally", e))?;

        if !response.status().is_success() {
            return Err(Error::upstream(
                "health tally",
                format!("status {}", response.status()),
            ));
        }

        let tally: HealthTally = response
            .json()
            .await
            .map_err(|e| Error::upstream("health tally", e))?;
        debug!(
            "Health tally: {} healthy, {} unhealthy, {} total",
            tally.healthy, tally.unhealthy, tally.total
        );
        Ok(tally)
    }
}

/// Used when no tally endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticHealthTally(pub HealthTally);

#[async_trait]
impl HealthTallySource for StaticHealthTally {
    async fn counts(&self) -> Result<HealthTally> {
        Ok(self.0)
    }
}

#[derive(Serialize)]
struct NarrativeRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct NarrativeResponse {
    text: String,
}

/// Text generation via `POST {url}` with `{prompt}`, answered by `{text}`.
pub struct HttpNarrativeGenerator {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpNarrativeGenerator {
    pub fn new(client: Client, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl NarrativeGenerator for HttpNarrativeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        // ---
        let mut request = self.client.post(&self.url).json(&NarrativeRequest { prompt });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(Error::Generation(format!("status {status}: {snippet}")));
        }

        let body: NarrativeResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("invalid response: {e}")))?;

        let text = body.text.trim();
        if text.is_empty() {
            return Err(Error::Generation("empty narrative".to_string()));
        }
        Ok(text.to_string())
    }
}

/// Always fails, so reports fall back to the fixed narrative.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredNarrative;

#[async_trait]
impl NarrativeGenerator for UnconfiguredNarrative {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(Error::Generation("no narrative endpoint configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_static_tally() {
        // ---
        let source = StaticHealthTally(HealthTally {
            healthy: 3,
            unhealthy: 1,
            total: 4,
        });
        let tally = source.counts().await.unwrap();
        assert_eq!(tally.total, 4);
        assert_eq!(StaticHealthTally::default().counts().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_unconfigured_narrative_fails() {
        // ---
        let err = UnconfiguredNarrative.generate("hello").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn test_unreachable_tally_is_upstream_error() {
        // ---
        let client = build_http_client(Duration::from_millis(200)).unwrap();
        let source = HttpHealthTally::new(client, "http://127.0.0.1:9/tally");
        let err = source.counts().await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_narrative_is_generation_error() {
        // ---
        let client = build_http_client(Duration::from_millis(200)).unwrap();
        let generator =
            HttpNarrativeGenerator::new(client, "http://127.0.0.1:9/generate", Some("k".into()));
        let err = generator.generate("prompt").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }
}
