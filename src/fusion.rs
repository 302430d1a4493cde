use crate::config::{AUTO_ACCEPT_TIER, bucket_confidence};
use crate::extract::recover_object;
use crate::genai::{GenerationParams, ModelClient, ModelError, Part};
use crate::models::{
    Confidence, ListingCandidate, Marketplace, Photo, TagEvidence, Tone, VisualEvidence,
};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Upper bound on candidates surfaced for disambiguation.
pub const MAX_CANDIDATES: usize = 5;

/// Where the pipeline goes after fusion: straight to enrichment, or back
/// to the caller for a manual pick among the ranked candidates.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    AutoAccept,
    NeedsDisambiguation,
}

#[derive(Debug, Clone, Default)]
pub struct FusionHints {
    pub condition_hint: Option<String>,
    pub marketplace: Marketplace,
    pub tone: Tone,
}

#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub candidates: Vec<ListingCandidate>,
    pub state: ResolutionState,
}

/// Fuse photos plus both evidence records into ranked listing candidates.
/// No single evidence source is authoritative; with both records empty
/// the model still sees the photos, and with the model down the stage
/// degrades to one evidence-assembled fallback candidate. The returned
/// list is never empty.
pub async fn fuse(
    model: &ModelClient,
    photos: &[Photo],
    tags: &TagEvidence,
    visual: &VisualEvidence,
    hints: &FusionHints,
) -> FusionOutcome {
    match try_fuse(model, photos, tags, visual, hints).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                target = "snaplist.fusion",
                error = %err,
                "fusion model call failed, using evidence fallback"
            );
            fallback_outcome(tags, visual, hints)
        }
    }
}

async fn try_fuse(
    model: &ModelClient,
    photos: &[Photo],
    tags: &TagEvidence,
    visual: &VisualEvidence,
    hints: &FusionHints,
) -> Result<FusionOutcome, ModelError> {
    let mut parts = vec![Part::Text(build_fusion_prompt(tags, visual, hints))];
    parts.extend(photos.iter().map(Part::from_photo));

    let text = model.generate(&parts, &GenerationParams::creative()).await?;
    let candidates = parse_candidates(&text);
    if candidates.is_empty() {
        warn!(
            target = "snaplist.fusion",
            "model returned no usable candidates, using evidence fallback"
        );
        return Ok(fallback_outcome(tags, visual, hints));
    }
    Ok(outcome_from(candidates))
}

pub(crate) fn outcome_from(mut candidates: Vec<ListingCandidate>) -> FusionOutcome {
    // Best match first; stable so the model's ordering survives within a
    // tier.
    candidates.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    candidates.truncate(MAX_CANDIDATES);
    let state = resolve_state(&candidates);
    FusionOutcome { candidates, state }
}

/// Auto-accept only when the top candidate reaches the configured tier.
pub fn resolve_state(candidates: &[ListingCandidate]) -> ResolutionState {
    match candidates.first() {
        Some(top) if top.confidence >= AUTO_ACCEPT_TIER => ResolutionState::AutoAccept,
        _ => ResolutionState::NeedsDisambiguation,
    }
}

fn build_fusion_prompt(tags: &TagEvidence, visual: &VisualEvidence, hints: &FusionHints) -> String {
    let tag_json = serde_json::to_string(tags).unwrap_or_else(|_| "{}".into());
    let visual_json = serde_json::to_string(visual).unwrap_or_else(|_| "{}".into());
    let condition_hint = hints
        .condition_hint
        .as_deref()
        .unwrap_or("none provided")
        .to_string();

    format!(
        r#"You are preparing a {marketplace} listing for the product in these photos.

Two independent extraction passes already ran:
- Tag/label transcription: {tag_json}
- Visual identification: {visual_json}
Seller's condition note: {condition_hint}

Weigh the photos against both extraction passes; neither pass is
authoritative and either may be empty or wrong. If the item could be more
than one product, return up to {max} candidates ranked best match first.
Write the title and description with {tone}.

Respond with JSON only:
{{
  "candidates": [
    {{
      "title": "listing title, max 80 chars",
      "brand": "",
      "category": "",
      "description": "2-4 sentences",
      "condition": "new | like new | good | fair | poor",
      "price": "suggested asking price, number as string",
      "rrp": "original retail price if known, else empty",
      "keywords": [""],
      "itemSpecifics": {{"Size": "", "Colour": ""}},
      "sources": [{{"url": "", "title": ""}}],
      "matchReason": "why you believe this identification",
      "confidence": 0.0-1.0
    }}
  ]
}}"#,
        marketplace = hints.marketplace.display_name(),
        tone = hints.tone.style_instruction(),
        max = MAX_CANDIDATES,
    )
}

/// Pull candidates out of raw model text. Accepts either a top-level
/// `candidates` array or a single bare candidate object; entries that do
/// not deserialize are skipped.
pub(crate) fn parse_candidates(text: &str) -> Vec<ListingCandidate> {
    let Some(value) = recover_object(text) else {
        return Vec::new();
    };

    let entries: Vec<Value> = match value.get("candidates").and_then(Value::as_array) {
        Some(array) => array.clone(),
        None => vec![value],
    };

    entries
        .into_iter()
        .filter_map(candidate_from_value)
        .filter(|candidate| !candidate.title.trim().is_empty())
        .collect()
}

fn candidate_from_value(mut value: Value) -> Option<ListingCandidate> {
    let obj = value.as_object_mut()?;
    // Bucket the model's confidence (numeric or labelled) into a tier
    // before deserializing; nothing numeric leaks past this point.
    let tier = match obj.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().map(bucket_confidence),
        Some(Value::String(s)) => Confidence::from_label(s),
        _ => None,
    };
    let label = match tier.unwrap_or_default() {
        Confidence::High => "HIGH",
        Confidence::Medium => "MEDIUM",
        Confidence::Low => "LOW",
    };
    obj.insert("confidence".into(), Value::String(label.into()));
    serde_json::from_value(value).ok()
}

pub(crate) fn fallback_outcome(
    tags: &TagEvidence,
    visual: &VisualEvidence,
    hints: &FusionHints,
) -> FusionOutcome {
    FusionOutcome {
        candidates: vec![fallback_candidate(tags, visual, hints)],
        state: ResolutionState::NeedsDisambiguation,
    }
}

/// Assemble one LOW-confidence candidate from whatever evidence survived.
fn fallback_candidate(
    tags: &TagEvidence,
    visual: &VisualEvidence,
    hints: &FusionHints,
) -> ListingCandidate {
    let brand = tags
        .brand
        .clone()
        .or_else(|| visual.visual_brand.clone())
        .unwrap_or_default();
    let line = visual
        .model_name
        .clone()
        .or_else(|| visual.product_line.clone());

    let mut title_parts: Vec<&str> = Vec::new();
    if !brand.is_empty() {
        title_parts.push(&brand);
    }
    if let Some(line) = line.as_deref() {
        title_parts.push(line);
    }
    let title = if title_parts.is_empty() {
        "Unidentified item".to_string()
    } else {
        title_parts.join(" ")
    };

    let mut item_specifics = std::collections::BTreeMap::new();
    if let Some(size) = &tags.size {
        item_specifics.insert("Size".to_string(), size.clone());
    }
    if let Some(code) = tags.model_codes.first() {
        item_specifics.insert("Model Code".to_string(), code.clone());
    }

    let mut keywords: Vec<String> = Vec::new();
    if !brand.is_empty() {
        keywords.push(brand.to_lowercase());
    }
    keywords.extend(visual.visual_features.iter().take(3).cloned());

    ListingCandidate {
        title,
        brand,
        description: format!(
            "Pre-owned item, see photos for details. Condition: {}.",
            hints
                .condition_hint
                .as_deref()
                .unwrap_or("used, as pictured")
        ),
        condition: hints
            .condition_hint
            .clone()
            .unwrap_or_else(|| "used".to_string()),
        keywords,
        item_specifics,
        match_reason: Some("assembled from partial evidence; identification unavailable".into()),
        confidence: Confidence::Low,
        ..ListingCandidate::default()
    }
}
