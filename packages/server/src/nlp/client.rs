//! HTTP client for the NLP service.

use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::time::Duration;

use super::{BaseNlpService, Difficulty, Generation, NlpError, PdfExtraction};

/// Upper bound on any single NLP service call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpNlpClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    text: &'a str,
    count: u32,
    difficulty: Difficulty,
}

impl HttpNlpClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, NlpError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, NlpError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(NlpError::Status { status, body })
    }
}

#[async_trait::async_trait]
impl BaseNlpService for HttpNlpClient {
    async fn extract(&self, file_path: &str, filename: &str) -> Result<PdfExtraction, NlpError> {
        let bytes = tokio::fs::read(file_path).await?;

        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new()
            .part("file", part)
            .text("filterHeadersFooters", "true")
            .text("includeMetadata", "true");

        let response = self
            .client
            .post(self.url("/api/v1/pdf/extract"))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let extraction: PdfExtraction = response.json().await?;
        if !extraction.success {
            let message = extraction
                .error_message
                .unwrap_or_else(|| "extraction failed".to_string());
            return Err(NlpError::Service(message));
        }

        Ok(extraction)
    }

    async fn generate(
        &self,
        text: &str,
        count: u32,
        difficulty: Difficulty,
    ) -> Result<Generation, NlpError> {
        let response = self
            .client
            .post(self.url("/api/v1/questions/generate"))
            .json(&GenerateRequest {
                text,
                count,
                difficulty,
            })
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        Ok(response.json().await?)
    }
}
