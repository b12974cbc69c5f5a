// Firecrawl reference client.
//
// API contract:
//
//   POST /v1/scrape
//     Auth: Bearer <api key>
//     Body: { url, formats: ["markdown"] }
//     Response: { success, data: { markdown } }

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{KnowledgeSource, ReferenceQuery};
use crate::config::constants::REFERENCE_SNIPPET_CHARS;
use crate::signature::SignatureKind;

const DATA_STRUCTURES_DOCS: &str = "https://docs.python.org/3/tutorial/datastructures.html";
const MODULES_DOCS: &str = "https://docs.python.org/3/tutorial/modules.html";
const ERRORS_DOCS: &str = "https://docs.python.org/3/tutorial/errors.html";
const TUTORIAL_DOCS: &str = "https://docs.python.org/3/tutorial/index.html";

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
}

pub struct FirecrawlKnowledge {
    base_url: String,
    api_key: String,
    http: Client,
}

impl FirecrawlKnowledge {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    /// Documentation page most likely to explain this failure kind
    pub fn docs_url(kind: SignatureKind) -> &'static str {
        match kind {
            SignatureKind::NoneDereference
            | SignatureKind::IndexOutOfBounds
            | SignatureKind::MissingKey
            | SignatureKind::OffByOne => DATA_STRUCTURES_DOCS,
            SignatureKind::ImportMissing => MODULES_DOCS,
            SignatureKind::NameUndefined | SignatureKind::TypeMismatch => ERRORS_DOCS,
            _ => TUTORIAL_DOCS,
        }
    }

    /// Scrape `url` and return its markdown
    pub async fn scrape(&self, url: &str) -> Result<String> {
        let endpoint = format!("{}/v1/scrape", self.base_url);
        let resp = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&ScrapeRequest {
                url,
                formats: ["markdown"],
            })
            .send()
            .await
            .context("Failed to reach Firecrawl")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Firecrawl API error {}: {}", status, body);
        }

        let parsed: ScrapeResponse = resp
            .json()
            .await
            .context("Failed to parse Firecrawl scrape response")?;
        parsed
            .data
            .and_then(|d| d.markdown)
            .filter(|md| !md.trim().is_empty())
            .context("Firecrawl response had no markdown")
    }
}

#[async_trait]
impl KnowledgeSource for FirecrawlKnowledge {
    fn name(&self) -> &str {
        "firecrawl"
    }

    async fn fetch_reference(&self, query: &ReferenceQuery) -> Option<String> {
        let url = Self::docs_url(query.kind);
        match self.scrape(url).await {
            Ok(markdown) => {
                let clipped: String = markdown.chars().take(REFERENCE_SNIPPET_CHARS).collect();
                debug!(url, chars = clipped.len(), query = %query.text, "reference fetched");
                Some(format!("Source: {}\n\n{}", url, clipped))
            }
            Err(e) => {
                warn!(url, error = %e, "reference lookup failed");
                None
            }
        }
    }
}
