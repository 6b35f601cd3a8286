// src/translate/mod.rs

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::TranslatorSettings;

pub const DEFAULT_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

/// Something that can translate a piece of text into one fixed target language.
#[allow(async_fn_in_trait)]
pub trait Translate {
    fn target_language(&self) -> &str;

    async fn translate(&self, text: &str) -> Result<String>;
}

/// Client for the public `translate_a/single` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: Client,
    endpoint: Url,
    source_language: String,
    target_language: String,
    max_attempts: usize,
    retry_delay: Duration,
}

impl HttpTranslator {
    pub fn from_settings(settings: &TranslatorSettings) -> Result<Self> {
        let endpoint = Url::parse(&settings.endpoint)
            .with_context(|| format!("parsing translator endpoint {}", settings.endpoint))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            source_language: settings.source_language.clone(),
            target_language: settings.target_language.clone(),
            max_attempts: settings.max_retries.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        })
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exp = (attempt.saturating_sub(1)).min(10) as u32;
        self.retry_delay.saturating_mul(1 << exp)
    }
}

impl Translate for HttpTranslator {
    fn target_language(&self) -> &str {
        &self.target_language
    }

    async fn translate(&self, text: &str) -> Result<String> {
        let params = [
            ("client", "gtx"),
            ("sl", self.source_language.as_str()),
            ("tl", self.target_language.as_str()),
            ("dt", "t"),
            ("q", text),
        ];
        let mut attempt = 0;

        // retry loop
        loop {
            attempt += 1;
            debug!(attempt, chars = text.chars().count(), "translating");

            let resp = self
                .client
                .get(self.endpoint.clone())
                .query(&params)
                .send()
                .await;
            match resp {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp
                        .json()
                        .await
                        .context("decoding translation response")?;
                    return parse_translation(&body);
                }
                Ok(resp) if is_retryable(resp.status()) && attempt < self.max_attempts => {
                    warn!(status = %resp.status(), attempt, "translation request failed; retrying");
                    sleep(self.backoff(attempt)).await;
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(error = %err, attempt, "translation request failed; retrying");
                    sleep(self.backoff(attempt)).await;
                }
                Ok(resp) => bail!("translation request failed: HTTP {}", resp.status()),
                Err(err) => return Err(err).context("sending translation request"),
            }
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Pull the translated text out of `[[["translated", "source", ...], ...], ...]`.
///
/// The first segment must be present; later segments are appended.
pub fn parse_translation(body: &Value) -> Result<String> {
    let segments = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("unexpected translation response: {}", body))?;

    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        match segment.get(0).and_then(Value::as_str) {
            Some(text) => out.push_str(text),
            None if i == 0 => bail!("translation response has no translated segment"),
            None => {}
        }
    }
    if segments.is_empty() {
        bail!("translation response has no translated segment");
    }
    Ok(out)
}
