use crate::extract::recover_object;
use crate::genai::{GenerationParams, ModelClient, Part};
use crate::models::{Confidence, StockImageResult};
use crate::websearch::{SearchClient, SearchHit};
use serde_json::Value;
use tracing::warn;

/// Only URLs whose path ends in one of these may become the primary image.
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".avif"];

/// Authorized retailers rank between a manufacturer's own domain and a
/// generic search hit.
const RETAILER_DOMAINS: &[&str] = &[
    "amazon",
    "asos",
    "endclothing",
    "farfetch",
    "footlocker",
    "jdsports",
    "nordstrom",
    "ssense",
    "zalando",
    "zappos",
];

const SEARCH_LIMIT: u32 = 8;
const MAX_ALTERNATIVES: usize = 2;

#[derive(Debug, Clone)]
pub struct StockImageInput {
    pub brand: String,
    pub title: String,
    pub model_code: Option<String>,
}

#[derive(Debug, Clone)]
struct RankedHit {
    hit: SearchHit,
    trust: Confidence,
    direct_image: bool,
}

/// Find an authoritative product image for an identified candidate.
/// Trust ranking: manufacturer domain > authorized retailer > generic
/// hit, and the returned confidence tier mirrors that ranking. A page
/// URL is only ever a fallback, never the primary image. No match or
/// failure returns the empty LOW result; this stage never errors.
pub async fn resolve(
    model: &ModelClient,
    search: &SearchClient,
    input: &StockImageInput,
) -> StockImageResult {
    let query = build_image_query(input);
    let hits = match search.image_search(&query, SEARCH_LIMIT).await {
        Ok(hits) => hits,
        Err(err) => {
            warn!(
                target = "snaplist.stockimage",
                error = %err,
                "image search failed, returning empty result"
            );
            return StockImageResult::default();
        }
    };
    if hits.is_empty() {
        return StockImageResult::default();
    }

    let ranked = rank_hits(hits, &input.brand);
    let model_choice = model_pick(model, &ranked, input).await;
    assemble_result(ranked, model_choice)
}

pub(crate) fn build_image_query(input: &StockImageInput) -> String {
    let detail = input
        .model_code
        .as_deref()
        .unwrap_or(input.title.as_str());
    format!("{} {} official product image", input.brand, detail)
        .trim()
        .to_string()
}

/// Order hits by source trust, direct-image links first within a tier.
fn rank_hits(hits: Vec<SearchHit>, brand: &str) -> Vec<RankedHit> {
    let mut ranked: Vec<RankedHit> = hits
        .into_iter()
        .map(|hit| {
            let host = hit_host(&hit);
            RankedHit {
                trust: trust_tier(&host, brand),
                direct_image: is_direct_image_url(&hit.link),
                hit,
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.trust
            .cmp(&a.trust)
            .then(b.direct_image.cmp(&a.direct_image))
    });
    ranked
}

fn hit_host(hit: &SearchHit) -> String {
    if !hit.display_link.trim().is_empty() {
        return hit.display_link.trim().to_lowercase();
    }
    reqwest::Url::parse(&hit.link)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

/// Manufacturer's own domain outranks an authorized retailer, which
/// outranks a generic hit.
pub(crate) fn trust_tier(host: &str, brand: &str) -> Confidence {
    let brand_token: String = brand
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if !brand_token.is_empty() && host.replace(['-', '.'], "").contains(&brand_token) {
        return Confidence::High;
    }
    if RETAILER_DOMAINS
        .iter()
        .any(|retailer| host.contains(retailer))
    {
        return Confidence::Medium;
    }
    Confidence::Low
}

/// Syntactically direct image link: the URL path (query string excluded)
/// ends in a recognized image extension.
pub(crate) fn is_direct_image_url(url: &str) -> bool {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => return false,
    };
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Ask the model which hit best matches the product; used only to refine
/// the deterministic ranking, and ignored unless it names a direct image.
async fn model_pick(
    model: &ModelClient,
    ranked: &[RankedHit],
    input: &StockImageInput,
) -> Option<usize> {
    let listing: String = ranked
        .iter()
        .enumerate()
        .map(|(idx, r)| format!("{idx}: {} ({})\n", r.hit.link, r.hit.title))
        .collect();
    let prompt = format!(
        "Which of these image search results is the authoritative product image \
         for \"{} {}\"? Prefer the manufacturer's own site over retailers, and \
         retailers over anything else. Respond with JSON only: {{\"bestIndex\": <number>}}\n\n{listing}",
        input.brand, input.title,
    );
    let text = model
        .generate(&[Part::Text(prompt)], &GenerationParams::precise())
        .await
        .ok()?;
    let index = parse_pick(&text)?;
    (index < ranked.len() && ranked[index].direct_image).then_some(index)
}

pub(crate) fn parse_pick(text: &str) -> Option<usize> {
    recover_object(text)?
        .get("bestIndex")
        .and_then(Value::as_u64)
        .map(|idx| idx as usize)
}

fn assemble_result(ranked: Vec<RankedHit>, model_choice: Option<usize>) -> StockImageResult {
    let primary_idx = model_choice.or_else(|| ranked.iter().position(|r| r.direct_image));

    let Some(primary_idx) = primary_idx else {
        // Nothing links straight to an image; keep the best page as a
        // fallback only.
        return StockImageResult {
            page_url: ranked.first().map(|r| r.hit.link.clone()),
            ..StockImageResult::default()
        };
    };

    let primary = &ranked[primary_idx];
    let alternatives: Vec<String> = ranked
        .iter()
        .enumerate()
        .filter(|(idx, r)| *idx != primary_idx && r.direct_image)
        .take(MAX_ALTERNATIVES)
        .map(|(_, r)| r.hit.link.clone())
        .collect();
    let page_url = ranked
        .iter()
        .find(|r| !r.direct_image)
        .map(|r| r.hit.link.clone());

    StockImageResult {
        stock_image_url: Some(primary.hit.link.clone()),
        source: Some(hit_host(&primary.hit)),
        confidence: primary.trust,
        alternatives,
        page_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(link: &str, display: &str) -> SearchHit {
        SearchHit {
            link: link.into(),
            display_link: display.into(),
            title: "hit".into(),
        }
    }

    #[test]
    fn manufacturer_outranks_retailer_outranks_generic() {
        assert_eq!(trust_tier("www.nike.com", "Nike"), Confidence::High);
        assert_eq!(trust_tier("zalando.co.uk", "Nike"), Confidence::Medium);
        assert_eq!(trust_tier("sneakerblog.net", "Nike"), Confidence::Low);
    }

    #[test]
    fn brand_match_tolerates_punctuation() {
        assert_eq!(trust_tier("levi.com", "Levi's"), Confidence::Low);
        assert_eq!(trust_tier("levis.com", "Levi's"), Confidence::High);
        assert_eq!(trust_tier("the-north-face.co.uk", "The North Face"), Confidence::High);
    }

    #[test]
    fn direct_image_urls_require_an_image_extension() {
        assert!(is_direct_image_url("https://nike.com/shots/dunk.jpg"));
        assert!(is_direct_image_url("https://nike.com/a.PNG?width=800"));
        assert!(is_direct_image_url("https://cdn.x.com/img.webp"));
        assert!(!is_direct_image_url("https://nike.com/t/dunk-low-shoes"));
        assert!(!is_direct_image_url("https://nike.com/fake.jpg.html"));
        assert!(!is_direct_image_url("not a url"));
    }

    #[test]
    fn primary_is_highest_trust_direct_image() {
        let ranked = rank_hits(
            vec![
                hit("https://blog.example/shot.jpg", "blog.example"),
                hit("https://www.zalando.de/p/dunk.jpg", "zalando.de"),
                hit("https://www.nike.com/launch/dunk.png", "nike.com"),
            ],
            "Nike",
        );
        let result = assemble_result(ranked, None);
        assert_eq!(
            result.stock_image_url.as_deref(),
            Some("https://www.nike.com/launch/dunk.png")
        );
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.alternatives.len(), 2);
    }

    #[test]
    fn page_urls_are_never_promoted_to_primary() {
        let ranked = rank_hits(
            vec![
                hit("https://www.nike.com/t/dunk-low", "nike.com"),
                hit("https://blog.example/review", "blog.example"),
            ],
            "Nike",
        );
        let result = assemble_result(ranked, None);
        assert!(result.stock_image_url.is_none());
        assert_eq!(
            result.page_url.as_deref(),
            Some("https://www.nike.com/t/dunk-low")
        );
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn retailer_image_gets_medium_confidence() {
        let ranked = rank_hits(
            vec![
                hit("https://www.asos.com/p/123.jpg", "asos.com"),
                hit("https://random.example/p.jpg", "random.example"),
            ],
            "Nike",
        );
        let result = assemble_result(ranked, None);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn model_choice_must_name_a_direct_image() {
        let ranked = rank_hits(
            vec![
                hit("https://www.nike.com/t/dunk-low", "nike.com"),
                hit("https://cdn.shop.example/dunk.jpg", "shop.example"),
            ],
            "Nike",
        );
        // index 0 after ranking is the nike.com page; a model pick of the
        // page is ignored in favour of the deterministic direct image.
        let result = assemble_result(ranked, None);
        assert_eq!(
            result.stock_image_url.as_deref(),
            Some("https://cdn.shop.example/dunk.jpg")
        );
    }

    #[test]
    fn pick_parsing_reads_best_index() {
        assert_eq!(parse_pick(r#"{"bestIndex": 2}"#), Some(2));
        assert_eq!(parse_pick("```json\n{\"bestIndex\": 0}\n```"), Some(0));
        assert_eq!(parse_pick("the first one"), None);
        assert_eq!(parse_pick(r#"{"bestIndex": -1}"#), None);
    }

    #[test]
    fn alternatives_are_capped_at_two() {
        let ranked = rank_hits(
            vec![
                hit("https://a.example/1.jpg", "a.example"),
                hit("https://b.example/2.jpg", "b.example"),
                hit("https://c.example/3.jpg", "c.example"),
                hit("https://d.example/4.jpg", "d.example"),
            ],
            "Nike",
        );
        let result = assemble_result(ranked, None);
        assert!(result.stock_image_url.is_some());
        assert_eq!(result.alternatives.len(), 2);
    }

    #[test]
    fn query_prefers_model_code_over_title() {
        let query = build_image_query(&StockImageInput {
            brand: "Nike".into(),
            title: "Dunk Low Retro".into(),
            model_code: Some("DD1391-100".into()),
        });
        assert!(query.contains("DD1391-100"));
        assert!(!query.contains("Retro"));
    }

    #[tokio::test]
    async fn credentialless_search_returns_empty_result() {
        use crate::genai::{ModelClient, ModelConfig};
        use crate::retry::RetryPolicy;
        use crate::websearch::SearchConfig;
        let model = ModelClient::new(
            ModelConfig {
                endpoint: "http://localhost:0".into(),
                api_key: None,
                model: "test".into(),
            },
            RetryPolicy::default(),
        );
        let search = SearchClient::new(
            SearchConfig {
                endpoint: "http://localhost:0".into(),
                api_key: None,
                engine_id: None,
            },
            RetryPolicy::default(),
        );
        let result = resolve(
            &model,
            &search,
            &StockImageInput {
                brand: "Nike".into(),
                title: "Dunk Low".into(),
                model_code: None,
            },
        )
        .await;
        assert!(result.stock_image_url.is_none());
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.alternatives.is_empty());
    }
}
