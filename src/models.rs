use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

/// Confidence tier used to gate auto-accept vs manual disambiguation.
/// Ordered so that `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_label(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "HIGH" => Some(Confidence::High),
            "MEDIUM" | "MED" => Some(Confidence::Medium),
            "LOW" => Some(Confidence::Low),
            _ => None,
        }
    }
}

/// Everything legible on the product's tags, transcribed and categorized.
/// Produced once per request; immutable afterwards. All-empty on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagEvidence {
    pub brand: Option<String>,
    pub model_codes: Vec<String>,
    pub style_codes: Vec<String>,
    pub sku_numbers: Vec<String>,
    pub size: Option<String>,
    pub all_text: Vec<String>,
}

impl TagEvidence {
    pub fn is_empty(&self) -> bool {
        self.brand.is_none()
            && self.model_codes.is_empty()
            && self.style_codes.is_empty()
            && self.sku_numbers.is_empty()
            && self.size.is_none()
            && self.all_text.is_empty()
    }
}

/// Brand/product-line identification from visual features alone,
/// independent of whatever text is legible on tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualEvidence {
    pub visual_brand: Option<String>,
    pub product_line: Option<String>,
    pub model_name: Option<String>,
    pub visual_features: Vec<String>,
    pub logo_matches: Vec<String>,
    pub design_elements: Vec<String>,
    pub confidence: Confidence,
}

impl VisualEvidence {
    pub fn is_empty(&self) -> bool {
        self.visual_brand.is_none() && self.product_line.is_none() && self.model_name.is_none()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
}

/// One ranked listing candidate. A request always yields at least one;
/// index 0 is the best match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingCandidate {
    pub title: String,
    pub brand: String,
    pub category: String,
    pub description: String,
    pub condition: String,
    pub price: String,
    pub rrp: String,
    pub keywords: Vec<String>,
    pub item_specifics: BTreeMap<String, String>,
    pub sources: Vec<SourceRef>,
    pub match_reason: Option<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceStats {
    pub average: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricePoint {
    pub price: f64,
    pub label: String,
    pub sell_probability: String,
}

/// Price statistics and recommendations derived fresh per request from
/// comparable listings. `sold_prices` is present only when sold
/// comparables exist; zero-sample requests get an explicit
/// insufficient-data snapshot instead of NaN.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricingSnapshot {
    pub sold_count: u32,
    pub competitor_count: u32,
    pub sold_prices: Option<PriceStats>,
    pub recommendations: Vec<String>,
    pub price_points: Vec<PricePoint>,
}

/// An authoritative product image, ranked by source trust. `page_url` is
/// a fallback only and is never surfaced as the primary image.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StockImageResult {
    pub stock_image_url: Option<String>,
    pub source: Option<String>,
    pub confidence: Confidence,
    pub alternatives: Vec<String>,
    pub page_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTier {
    New,
    LikeNew,
    #[default]
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WearLevel {
    #[default]
    None,
    Light,
    Moderate,
    Heavy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionAssessment {
    pub overall: ConditionTier,
    pub has_damage: bool,
    pub wear_level: WearLevel,
    pub defects: Vec<String>,
}

/// Per-photo quality scoring. Sub-scores are 0-10; `overall_score` is
/// 0-100, derived as mean(sub-scores) x 10 when the model does not supply
/// one directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityReport {
    pub sharpness: u8,
    pub lighting: u8,
    pub background: u8,
    pub composition: u8,
    pub angle: u8,
    pub overall_score: u8,
    pub critical_issues: Vec<String>,
    pub condition: ConditionAssessment,
}

impl Default for QualityReport {
    fn default() -> Self {
        Self::passing_default()
    }
}

impl QualityReport {
    /// Fail-open default: the gate informs, it does not block uploads.
    pub fn passing_default() -> Self {
        Self {
            sharpness: 7,
            lighting: 7,
            background: 7,
            composition: 7,
            angle: 7,
            overall_score: 70,
            critical_issues: Vec::new(),
            condition: ConditionAssessment::default(),
        }
    }
}

/// Advisory per-photo verdict; callers that only want to proceed may
/// ignore both fields.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAssessment {
    pub index: usize,
    pub is_blurry: bool,
    pub laplacian_variance: Option<f64>,
    pub report: QualityReport,
}

// ---- API request/response shapes ------------------------------------------

/// One uploaded photograph: mime type plus base64-encoded bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoPayload {
    pub mime_type: String,
    pub data: String,
}

/// A decoded photograph as it flows through the pipeline.
#[derive(Debug, Clone)]
pub struct Photo {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    #[default]
    Ebay,
    Vinted,
    Depop,
}

impl Marketplace {
    pub fn display_name(&self) -> &'static str {
        match self {
            Marketplace::Ebay => "eBay",
            Marketplace::Vinted => "Vinted",
            Marketplace::Depop => "Depop",
        }
    }
}

/// Tone selector for generated listing copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Neutral,
    Casual,
    Professional,
    Playful,
}

impl Tone {
    pub fn style_instruction(&self) -> &'static str {
        match self {
            Tone::Neutral => "plain, factual wording",
            Tone::Casual => "friendly, conversational wording",
            Tone::Professional => "precise, retail-grade wording",
            Tone::Playful => "light, upbeat wording",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub photos: Vec<PhotoPayload>,
    #[serde(default)]
    pub condition_hint: Option<String>,
    #[serde(default)]
    pub marketplace: Marketplace,
    #[serde(default)]
    pub tone: Tone,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub request_id: String,
    pub state: crate::fusion::ResolutionState,
    pub candidates: Vec<ListingCandidate>,
    pub quality: Vec<PhotoAssessment>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichRequest {
    pub brand: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub model_code: Option<String>,
    #[serde(default)]
    pub ai_estimated_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichResponse {
    pub request_id: String,
    pub pricing: PricingSnapshot,
    pub stock_image: StockImageResult,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityRequest {
    pub photos: Vec<PhotoPayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityResponse {
    pub assessments: Vec<PhotoAssessment>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
