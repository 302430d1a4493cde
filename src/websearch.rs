use crate::http::build_client;
use crate::retry::RetryPolicy;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Image search boundary: a free-text keyword query answered with
/// candidate URLs. Source trust is derived downstream from the hosting
/// domain; this client only fetches.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub engine_id: Option<String>,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("SEARCH_API_ENDPOINT")
                .unwrap_or_else(|_| "https://www.googleapis.com/customsearch/v1".into()),
            api_key: std::env::var("SEARCH_API_KEY").ok(),
            engine_id: std::env::var("SEARCH_ENGINE_ID").ok(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("missing search credentials")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub link: String,
    pub display_link: String,
    pub title: String,
}

pub struct SearchClient {
    http: Client,
    config: SearchConfig,
    retry: RetryPolicy,
}

impl SearchClient {
    pub fn new(config: SearchConfig, retry: RetryPolicy) -> Self {
        Self {
            http: build_client(),
            config,
            retry,
        }
    }

    pub fn from_env() -> Self {
        Self::new(SearchConfig::from_env(), RetryPolicy::from_env())
    }

    pub async fn image_search(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let (Some(api_key), Some(engine_id)) = (
            self.config.api_key.as_deref(),
            self.config.engine_id.as_deref(),
        ) else {
            return Err(SearchError::MissingCredentials);
        };

        let limit = limit.clamp(1, 10).to_string();
        let response = self
            .retry
            .run("websearch.image", || {
                self.http
                    .get(&self.config.endpoint)
                    .query(&[
                        ("key", api_key),
                        ("cx", engine_id),
                        ("q", query),
                        ("searchType", "image"),
                        ("num", limit.as_str()),
                    ])
                    .send()
            })
            .await
            .map_err(|err| SearchError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::Request(format!("HTTP {}", response.status())));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Request(err.to_string()))?;

        Ok(payload
            .items
            .unwrap_or_default()
            .into_iter()
            .filter(|item| !item.link.trim().is_empty())
            .map(|item| SearchHit {
                link: item.link,
                display_link: item.display_link.unwrap_or_default(),
                title: item.title.unwrap_or_default(),
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Option<Vec<SearchItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    #[serde(default)]
    link: String,
    #[serde(default)]
    display_link: Option<String>,
    #[serde(default)]
    title: Option<String>,
}
