use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::storage_utils::NewsConfig;

const MAX_ARTICLES: usize = 5;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Article {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: String,
}

#[derive(Deserialize, Debug)]
struct NewsResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

pub struct NewsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NewsClient {
    pub fn new(config: &NewsConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Up to five articles mentioning `query`.
    ///
    /// `None` means "no news available": missing key, non-200 status, transport or
    /// decode failure. Nothing is retried.
    pub async fn headlines(&self, query: &str) -> Option<Vec<Article>> {
        let Some(key) = self.api_key.as_deref() else {
            debug!("No news API key configured");
            return None;
        };

        // the endpoint returns newest first by default
        let url = format!("{}/v2/everything", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[("q", query), ("apiKey", key)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "News request failed");
                return None;
            }
        };

        // 401 (bad key) and 429 (quota) land here too
        if response.status() != reqwest::StatusCode::OK {
            warn!(status = response.status().as_u16(), "News provider refused request");
            return None;
        }

        match response.json::<NewsResponse>().await {
            Ok(body) => Some(body.articles.into_iter().take(MAX_ARTICLES).collect()),
            Err(e) => {
                warn!(error = %e, "Could not decode news response");
                None
            }
        }
    }
}
