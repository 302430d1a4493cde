use crate::market::{CompsQuery, MarketClient, MarketError};
use crate::models::{PricePoint, PriceStats, PricingSnapshot};
use std::collections::HashSet;
use tracing::warn;

const COMPS_PAGE_SIZE: u32 = 25;

#[derive(Debug, Clone)]
pub struct PricingInput {
    pub brand: String,
    pub title: String,
    pub category: Option<String>,
    pub ai_estimated_price: Option<f64>,
}

/// Derive price statistics and recommendations from comparable listings.
/// The sold and active queries run concurrently and independently; either
/// failing is treated as an empty sample so the other still contributes.
/// A zero sold sample yields an explicit insufficient-data snapshot.
pub async fn analyze(market: &MarketClient, input: &PricingInput) -> PricingSnapshot {
    let keywords = build_comps_query(input);

    let sold_query = CompsQuery {
        keywords: keywords.clone(),
        sold_only: true,
        limit: COMPS_PAGE_SIZE,
    };
    let active_query = CompsQuery {
        keywords,
        sold_only: false,
        limit: COMPS_PAGE_SIZE,
    };

    let (sold, active) = tokio::join!(market.search(&sold_query), market.search(&active_query));

    let sold_prices: Vec<f64> = prices_or_empty(sold, "sold_comps");
    let active_prices: Vec<f64> = prices_or_empty(active, "active_comps");

    snapshot_from_samples(&sold_prices, &active_prices, input.ai_estimated_price)
}

fn prices_or_empty(result: Result<Vec<crate::market::CompItem>, MarketError>, which: &str) -> Vec<f64> {
    match result {
        Ok(items) => items.into_iter().map(|item| item.price).collect(),
        Err(err) => {
            warn!(
                target = "snaplist.pricing",
                query = which,
                error = %err,
                "comparable query failed, treating as empty sample"
            );
            Vec::new()
        }
    }
}

/// Keyword query for both comp searches: brand, title and category with
/// duplicate tokens removed, so "Nike Nike Dunk Low" collapses cleanly.
pub(crate) fn build_comps_query(input: &PricingInput) -> String {
    let category = input.category.as_deref().unwrap_or_default();
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for token in input
        .brand
        .split_whitespace()
        .chain(input.title.split_whitespace())
        .chain(category.split_whitespace())
    {
        let key = token.to_lowercase();
        if seen.insert(key) {
            tokens.push(token);
        }
    }
    tokens.join(" ")
}

/// Pure snapshot assembly; exercised directly by tests.
pub(crate) fn snapshot_from_samples(
    sold: &[f64],
    active: &[f64],
    ai_estimated_price: Option<f64>,
) -> PricingSnapshot {
    let competitor_count = active.len() as u32;
    let competitor_average = (!active.is_empty()).then(|| mean(active));

    if sold.is_empty() {
        return insufficient_data_snapshot(competitor_count, ai_estimated_price);
    }

    let mut sorted = sold.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let stats = PriceStats {
        average: round2(mean(&sorted)),
        median: round2(median(&sorted)),
        min: round2(sorted[0]),
        max: round2(sorted[sorted.len() - 1]),
    };
    let p75 = round2(percentile_75(&sorted));

    let mut recommendations = vec![
        format!(
            "Price at {:.2} (median of {} sold) for a fast sale.",
            stats.median,
            sorted.len()
        ),
        format!("Price at {p75:.2} (75th percentile) to maximize profit."),
    ];
    if let Some(avg) = competitor_average {
        let avg = round2(avg);
        if stats.median < avg {
            recommendations.push(format!(
                "Active competitors average {avg:.2}; the sold median undercuts them, so you can list slightly higher and still be competitive."
            ));
        } else {
            recommendations.push(format!(
                "Active competitors average {avg:.2}; list at or below that to stay competitive."
            ));
        }
    }

    let price_points = vec![
        PricePoint {
            price: stats.median,
            label: "Fast sale".into(),
            sell_probability: "high".into(),
        },
        PricePoint {
            price: p75,
            label: "Maximize profit".into(),
            sell_probability: "medium".into(),
        },
    ];

    PricingSnapshot {
        sold_count: sorted.len() as u32,
        competitor_count,
        sold_prices: Some(stats),
        recommendations,
        price_points,
    }
}

fn insufficient_data_snapshot(
    competitor_count: u32,
    ai_estimated_price: Option<f64>,
) -> PricingSnapshot {
    let mut recommendations = vec![
        "No sold comparables found; fall back to the AI-estimated price.".to_string(),
    ];
    let mut price_points = Vec::new();
    if let Some(estimate) = ai_estimated_price.filter(|p| p.is_finite() && *p > 0.0) {
        recommendations.push(format!("Suggested starting point: {:.2}.", round2(estimate)));
        price_points.push(PricePoint {
            price: round2(estimate),
            label: "AI estimate".into(),
            sell_probability: "unknown".into(),
        });
    }
    PricingSnapshot {
        sold_count: 0,
        competitor_count,
        sold_prices: None,
        recommendations,
        price_points,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of an ascending sample; for even n this takes the lower of the
/// two middle values, keeping the result deterministic and an actually
/// observed price.
fn median(sorted: &[f64]) -> f64 {
    sorted[(sorted.len() - 1) / 2]
}

/// 75th-percentile price: index floor(0.75 * n) of the ascending sample,
/// clamped to the last element.
fn percentile_75(sorted: &[f64]) -> f64 {
    let idx = ((sorted.len() as f64 * 0.75).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_sample_is_deterministic() {
        // [10, 20, 30, 40]: median is the lower middle (20), the 75th
        // percentile sits at index floor(0.75 * 4) = 3, i.e. 40.
        let snapshot = snapshot_from_samples(&[10.0, 20.0, 30.0, 40.0], &[], None);
        let stats = snapshot.sold_prices.unwrap();
        assert_eq!(stats.median, 20.0);
        assert_eq!(stats.average, 25.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 40.0);
        assert_eq!(snapshot.price_points[1].price, 40.0);
        // identical input, identical output
        let again = snapshot_from_samples(&[10.0, 20.0, 30.0, 40.0], &[], None);
        assert_eq!(again.sold_prices.unwrap().median, 20.0);
    }

    #[test]
    fn odd_sample_median_is_middle_value() {
        let snapshot = snapshot_from_samples(&[30.0, 10.0, 20.0], &[], None);
        assert_eq!(snapshot.sold_prices.unwrap().median, 20.0);
    }

    #[test]
    fn single_sale_sample_is_safe() {
        let snapshot = snapshot_from_samples(&[15.5], &[], None);
        let stats = snapshot.sold_prices.unwrap();
        assert_eq!(stats.median, 15.5);
        assert_eq!(stats.min, 15.5);
        assert_eq!(stats.max, 15.5);
        assert_eq!(snapshot.price_points[0].price, 15.5);
    }

    #[test]
    fn zero_sample_returns_insufficient_data() {
        let snapshot = snapshot_from_samples(&[], &[22.0, 28.0], Some(25.0));
        assert_eq!(snapshot.sold_count, 0);
        assert_eq!(snapshot.competitor_count, 2);
        assert!(snapshot.sold_prices.is_none());
        assert!(
            snapshot
                .recommendations
                .iter()
                .any(|r| r.contains("AI-estimated"))
        );
        assert_eq!(snapshot.price_points.len(), 1);
        assert_eq!(snapshot.price_points[0].label, "AI estimate");
    }

    #[test]
    fn zero_sample_without_estimate_has_no_nan() {
        let snapshot = snapshot_from_samples(&[], &[], None);
        assert_eq!(snapshot.sold_count, 0);
        assert!(snapshot.sold_prices.is_none());
        assert!(snapshot.price_points.is_empty());
        assert!(!snapshot.recommendations.is_empty());
        let serialized = serde_json::to_string(&snapshot).unwrap();
        assert!(!serialized.contains("NaN"));
        assert!(!serialized.contains("null"));
    }

    #[test]
    fn competitor_average_shapes_positioning_advice() {
        let snapshot = snapshot_from_samples(&[10.0, 20.0, 30.0], &[40.0, 60.0], None);
        assert!(
            snapshot
                .recommendations
                .iter()
                .any(|r| r.contains("50.00"))
        );
    }

    #[test]
    fn unsorted_input_is_sorted_before_stats() {
        let snapshot = snapshot_from_samples(&[40.0, 10.0, 30.0, 20.0], &[], None);
        let stats = snapshot.sold_prices.unwrap();
        assert_eq!(stats.median, 20.0);
        assert_eq!(stats.min, 10.0);
    }

    #[test]
    fn comps_query_deduplicates_brand_tokens() {
        let input = PricingInput {
            brand: "Nike".into(),
            title: "Nike Dunk Low Panda".into(),
            category: Some("Trainers".into()),
            ai_estimated_price: None,
        };
        assert_eq!(build_comps_query(&input), "Nike Dunk Low Panda Trainers");
    }

    #[tokio::test]
    async fn tokenless_market_degrades_to_insufficient_data() {
        use crate::market::MarketConfig;
        use crate::retry::RetryPolicy;
        let market = MarketClient::new(
            MarketConfig {
                endpoint: "http://localhost:0".into(),
                oauth_token: None,
                marketplace_id: "EBAY_US".into(),
            },
            RetryPolicy::default(),
        );
        let snapshot = analyze(
            &market,
            &PricingInput {
                brand: "Nike".into(),
                title: "Dunk Low".into(),
                category: None,
                ai_estimated_price: Some(80.0),
            },
        )
        .await;
        assert_eq!(snapshot.sold_count, 0);
        assert!(snapshot.sold_prices.is_none());
        assert!(!snapshot.recommendations.is_empty());
    }
}
