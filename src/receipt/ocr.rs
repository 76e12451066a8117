//! OCR collaborators
//!
//! Text extraction is a black box. Failures are recovered by the classifier.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> anyhow::Result<String>;
}

/// Used when no OCR service is configured
pub struct NoopOcr;

#[async_trait]
impl OcrEngine for NoopOcr {
    async fn extract_text(&self, _image: &[u8]) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
}

/// Posts raw image bytes to an HTTP OCR service answering `{"text": "..."}`
pub struct HttpOcr {
    client: reqwest::Client,
    url: String,
}

impl HttpOcr {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OCR HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn extract_text(&self, image: &[u8]) -> anyhow::Result<String> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .context("OCR request failed")?
            .error_for_status()
            .context("OCR service returned an error status")?;

        let body: OcrResponse = response
            .json()
            .await
            .context("OCR response was not valid JSON")?;
        Ok(body.text)
    }
}
