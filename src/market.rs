use crate::http::build_client;
use crate::retry::RetryPolicy;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Price-comparison boundary: keyword search over completed/sold or
/// currently active fixed-price listings. Only the shapes below are
/// contractual; the provider is otherwise opaque.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub endpoint: String,
    pub oauth_token: Option<String>,
    pub marketplace_id: String,
}

impl MarketConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("MARKET_API_ENDPOINT")
                .unwrap_or_else(|_| "https://api.ebay.com/buy/browse/v1".into()),
            oauth_token: std::env::var("MARKET_OAUTH_TOKEN").ok(),
            marketplace_id: std::env::var("MARKET_MARKETPLACE_ID")
                .unwrap_or_else(|_| "EBAY_US".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("missing oauth token")]
    MissingToken,
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone)]
pub struct CompsQuery {
    pub keywords: String,
    pub sold_only: bool,
    pub limit: u32,
}

/// One comparable listing. Items without a parseable numeric price are
/// skipped by the client, never surfaced.
#[derive(Debug, Clone)]
pub struct CompItem {
    pub title: Option<String>,
    pub price: f64,
    pub url: Option<String>,
}

pub struct MarketClient {
    http: Client,
    config: MarketConfig,
    retry: RetryPolicy,
}

impl MarketClient {
    pub fn new(config: MarketConfig, retry: RetryPolicy) -> Self {
        Self {
            http: build_client(),
            config,
            retry,
        }
    }

    pub fn from_env() -> Self {
        Self::new(MarketConfig::from_env(), RetryPolicy::from_env())
    }

    pub async fn search(&self, query: &CompsQuery) -> Result<Vec<CompItem>, MarketError> {
        let Some(token) = self.config.oauth_token.as_deref() else {
            return Err(MarketError::MissingToken);
        };

        let url = format!(
            "{}/item_summary/search",
            self.config.endpoint.trim_end_matches('/')
        );
        let filter = if query.sold_only {
            "buyingOptions:{FIXED_PRICE},soldItemsOnly:true"
        } else {
            "buyingOptions:{FIXED_PRICE}"
        };
        let limit = query.limit.to_string();

        let response = self
            .retry
            .run("market.search", || {
                self.http
                    .get(&url)
                    .bearer_auth(token)
                    .header("X-EBAY-C-MARKETPLACE-ID", &self.config.marketplace_id)
                    .query(&[
                        ("q", query.keywords.as_str()),
                        ("filter", filter),
                        ("sort", "-price"),
                        ("limit", limit.as_str()),
                    ])
                    .send()
            })
            .await
            .map_err(|err| MarketError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(MarketError::Request(format!("HTTP {}", response.status())));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|err| MarketError::Request(err.to_string()))?;

        Ok(items_with_prices(payload))
    }
}

fn items_with_prices(payload: SearchResponse) -> Vec<CompItem> {
    payload
        .item_summaries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let price = item.price.and_then(|p| p.value)?.parse::<f64>().ok()?;
            if !price.is_finite() || price < 0.0 {
                return None;
            }
            Some(CompItem {
                title: item.title,
                price,
                url: item.item_web_url,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    item_summaries: Option<Vec<ItemSummary>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    price: Option<WirePrice>,
    #[serde(default)]
    item_web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePrice {
    #[serde(default)]
    value: Option<String>,
}
