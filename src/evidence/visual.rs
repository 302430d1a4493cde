use crate::config::bucket_confidence;
use crate::extract::recover_object;
use crate::genai::{GenerationParams, ModelClient, ModelError, Part};
use crate::models::{Confidence, Photo, VisualEvidence};
use serde_json::Value;
use tracing::warn;

/// Recognition accuracy saturates after the first couple of angles;
/// later photos add cost without benefit.
const VISUAL_PHOTO_LIMIT: usize = 2;

const VISUAL_RECOGNIZER_PROMPT: &str = r#"
Identify this product from visual features ONLY: logos, fabric or material
texture, silhouette, stitching and construction details, colourway,
hardware. Ignore any text printed on tags or labels, even if legible --
that is handled separately.

Respond with JSON only, in this exact shape:
{
  "visualBrand": "brand suggested by logos/design, or null",
  "productLine": "product line, e.g. Air Max, or null",
  "modelName": "specific model if recognizable, or null",
  "visualFeatures": ["notable visual features"],
  "logoMatches": ["logos or emblems you can see"],
  "designElements": ["distinctive design elements"],
  "confidence": "HIGH, MEDIUM or LOW"
}
"#;

/// Identify brand/product-line from visual features alone, independent of
/// tag text, so the two evidence sources can corroborate each other.
/// Advisory: any failure yields an all-empty record.
pub async fn recognize_visual(model: &ModelClient, photos: &[Photo]) -> VisualEvidence {
    match try_recognize(model, photos).await {
        Ok(evidence) => evidence,
        Err(err) => {
            warn!(
                target = "snaplist.evidence",
                error = %err,
                "visual recognizer failed, returning empty evidence"
            );
            VisualEvidence::default()
        }
    }
}

async fn try_recognize(model: &ModelClient, photos: &[Photo]) -> Result<VisualEvidence, ModelError> {
    let mut parts = vec![Part::Text(VISUAL_RECOGNIZER_PROMPT.trim().to_string())];
    parts.extend(photos.iter().take(VISUAL_PHOTO_LIMIT).map(Part::from_photo));

    let text = model.generate(&parts, &GenerationParams::precise()).await?;
    Ok(parse_visual_response(&text))
}

pub(crate) fn parse_visual_response(text: &str) -> VisualEvidence {
    let Some(mut value) = recover_object(text) else {
        return VisualEvidence::default();
    };
    if let Some(obj) = value.as_object_mut() {
        // Bucket whatever the model put in `confidence` into a named tier
        // before deserializing, so a numeric or misspelled value degrades
        // to LOW instead of discarding the whole record.
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
    }
    serde_json::from_value::<VisualEvidence>(value)
        .ok()
        .map(normalize)
        .unwrap_or_default()
}

fn normalize(mut evidence: VisualEvidence) -> VisualEvidence {
    for field in [
        &mut evidence.visual_brand,
        &mut evidence.product_line,
        &mut evidence.model_name,
    ] {
        *field = field
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }
    evidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidence;

    #[test]
    fn parses_visual_response_with_prose() {
        let text = "Looking at the swoosh and panel layout:\n{\"visualBrand\": \"Nike\", \"productLine\": \"Dunk\", \"modelName\": \"Dunk Low Panda\", \"logoMatches\": [\"swoosh\"], \"confidence\": \"HIGH\"}";
        let evidence = parse_visual_response(text);
        assert_eq!(evidence.visual_brand.as_deref(), Some("Nike"));
        assert_eq!(evidence.product_line.as_deref(), Some("Dunk"));
        assert_eq!(evidence.confidence, Confidence::High);
    }

    #[test]
    fn unknown_confidence_label_degrades_to_low() {
        let text = r#"{"visualBrand": "Adidas", "confidence": "VERY_SURE"}"#;
        let evidence = parse_visual_response(text);
        assert_eq!(evidence.visual_brand.as_deref(), Some("Adidas"));
        assert_eq!(evidence.confidence, Confidence::Low);
    }

    #[test]
    fn numeric_confidence_is_bucketed() {
        let text = r#"{"visualBrand": "Nike", "confidence": 0.9}"#;
        let evidence = parse_visual_response(text);
        assert_eq!(evidence.confidence, Confidence::High);
        let text = r#"{"visualBrand": "Nike", "confidence": 0.6}"#;
        assert_eq!(parse_visual_response(text).confidence, Confidence::Medium);
    }

    #[test]
    fn prose_only_response_is_empty() {
        let evidence = parse_visual_response("Hard to say from these angles.");
        assert!(evidence.is_empty());
        assert_eq!(evidence.confidence, Confidence::Low);
    }

    #[test]
    fn photo_limit_is_two() {
        assert_eq!(VISUAL_PHOTO_LIMIT, 2);
    }
}
