use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_SOURCE_URL: &str = "https://cineverse.fr/export.php";

/// One article record exactly as the legacy export ships it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawArticle {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "articleTitle", default)]
    pub title: String,
    #[serde(rename = "movieTitle", default)]
    pub movie_title: Option<String>,
    #[serde(rename = "articleContent", default)]
    pub content: String,
    #[serde(rename = "seoTitle", default)]
    pub seo_title: Option<String>,
    #[serde(rename = "seoDescription", default)]
    pub seo_description: Option<String>,
    #[serde(rename = "authorId", default)]
    pub author_id: Option<i64>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(rename = "modifiedAt", default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub metas: HashMap<String, serde_json::Value>,
}

impl RawArticle {
    /// View counter from the meta bag. WordPress stores meta values as arrays
    /// of strings, so both `["123"]` and `[123]` show up in the wild.
    pub fn view_count(&self) -> i64 {
        self.metas
            .get("views")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0)
    }
}

/// Discovery payload: how many items the source holds and its page size.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Discovery {
    pub total: u64,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
pub struct BatchPayload {
    pub total: u64,
    pub limit: u64,
    #[serde(default)]
    pub data: Vec<RawArticle>,
}

/// Client for the legacy export endpoint.
pub struct SourceClient {
    base_url: String,
    http: reqwest::Client,
}

impl SourceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch `{ total, limit }` from the bare export endpoint.
    pub async fn discover(&self) -> Result<Discovery> {
        info!("Fetching export discovery: {}", self.base_url);
        let discovery = self
            .http
            .get(&self.base_url)
            .send()
            .await?
            .error_for_status()?
            .json::<Discovery>()
            .await
            .context("Failed to fetch export discovery payload")?;
        Ok(discovery)
    }

    /// Fetch one page of raw articles.
    pub async fn fetch_batch(&self, page: i64) -> Result<BatchPayload> {
        let url = format!("{}?page={}", self.base_url, page);
        let payload = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<BatchPayload>()
            .await
            .with_context(|| format!("Failed to fetch batch page {page}"))?;
        Ok(payload)
    }

    /// Fetch a single article by its remote identifier.
    pub async fn fetch_single(&self, post_id: i64) -> Result<RawArticle> {
        let url = format!("{}?postId={}", self.base_url, post_id);
        let article = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<RawArticle>()
            .await
            .with_context(|| format!("Failed to fetch article {post_id}"))?;
        Ok(article)
    }
}
