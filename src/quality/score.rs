use crate::extract::recover_object;
use crate::genai::{GenerationParams, ModelClient, ModelError, Part};
use crate::models::{ConditionAssessment, Photo, QualityReport};
use serde::Deserialize;
use tracing::warn;

const SCORE_PROMPT: &str = r#"
Score this product photo for a second-hand marketplace listing and assess
the item's condition. Respond with JSON only, in this exact shape:
{
  "sharpness": 0-10,
  "lighting": 0-10,
  "background": 0-10,
  "composition": 0-10,
  "angle": 0-10,
  "overallScore": 0-100,
  "criticalIssues": ["only problems that make the photo unusable"],
  "condition": {
    "overall": "new | like_new | good | fair | poor",
    "hasDamage": true/false,
    "wearLevel": "none | light | moderate | heavy",
    "defects": ["visible defects, if any"]
  }
}
"#;

/// Score one photo with the model. The gate informs, it does not block:
/// any failure returns the passing default instead of rejecting the photo.
pub async fn assess_photo(model: &ModelClient, photo: &Photo) -> QualityReport {
    match try_assess(model, photo).await {
        Ok(report) => report,
        Err(err) => {
            warn!(
                target = "snaplist.quality",
                error = %err,
                "quality scoring failed, returning passing default"
            );
            QualityReport::passing_default()
        }
    }
}

async fn try_assess(model: &ModelClient, photo: &Photo) -> Result<QualityReport, ModelError> {
    let parts = [
        Part::Text(SCORE_PROMPT.trim().to_string()),
        Part::from_photo(photo),
    ];
    let text = model.generate(&parts, &GenerationParams::precise()).await?;
    Ok(parse_score_response(&text).unwrap_or_else(QualityReport::passing_default))
}

/// Raw model shape, tolerated field by field so one out-of-range score
/// does not discard the rest of the report.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawScore {
    sharpness: Option<f64>,
    lighting: Option<f64>,
    background: Option<f64>,
    composition: Option<f64>,
    angle: Option<f64>,
    overall_score: Option<f64>,
    critical_issues: Vec<String>,
    condition: Option<serde_json::Value>,
}

pub(crate) fn parse_score_response(text: &str) -> Option<QualityReport> {
    let value = recover_object(text)?;
    let raw: RawScore = serde_json::from_value(value).ok()?;

    let sharpness = clamp_sub(raw.sharpness);
    let lighting = clamp_sub(raw.lighting);
    let background = clamp_sub(raw.background);
    let composition = clamp_sub(raw.composition);
    let angle = clamp_sub(raw.angle);

    let overall_score = match raw.overall_score {
        Some(score) if score.is_finite() => score.clamp(0.0, 100.0).round() as u8,
        _ => {
            let mean = f64::from(
                u16::from(sharpness)
                    + u16::from(lighting)
                    + u16::from(background)
                    + u16::from(composition)
                    + u16::from(angle),
            ) / 5.0;
            (mean * 10.0).round() as u8
        }
    };

    let condition = raw
        .condition
        .and_then(|value| serde_json::from_value::<ConditionAssessment>(value).ok())
        .unwrap_or_default();

    Some(QualityReport {
        sharpness,
        lighting,
        background,
        composition,
        angle,
        overall_score,
        critical_issues: raw.critical_issues,
        condition,
    })
}

/// Missing sub-scores default to a passing 7; out-of-range values clamp.
fn clamp_sub(value: Option<f64>) -> u8 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 10.0).round() as u8,
        _ => 7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConditionTier, WearLevel};

    #[test]
    fn derives_overall_from_sub_scores() {
        let text = r#"{"sharpness": 8, "lighting": 6, "background": 7, "composition": 9, "angle": 5}"#;
        let report = parse_score_response(text).unwrap();
        assert_eq!(report.overall_score, 70);
        assert!(report.critical_issues.is_empty());
    }

    #[test]
    fn keeps_model_supplied_overall() {
        let text = r#"{"sharpness": 2, "lighting": 2, "background": 2, "composition": 2, "angle": 2, "overallScore": 35}"#;
        let report = parse_score_response(text).unwrap();
        assert_eq!(report.overall_score, 35);
    }

    #[test]
    fn parses_condition_assessment() {
        let text = r#"```json
{"sharpness": 9, "lighting": 8, "background": 8, "composition": 8, "angle": 8,
 "condition": {"overall": "fair", "hasDamage": true, "wearLevel": "moderate",
 "defects": ["scuffed toe", "worn heel"]}}
```"#;
        let report = parse_score_response(text).unwrap();
        assert_eq!(report.condition.overall, ConditionTier::Fair);
        assert!(report.condition.has_damage);
        assert_eq!(report.condition.wear_level, WearLevel::Moderate);
        assert_eq!(report.condition.defects.len(), 2);
    }

    #[test]
    fn out_of_range_scores_clamp() {
        let text = r#"{"sharpness": 14, "lighting": -3, "background": 7, "composition": 7, "angle": 7}"#;
        let report = parse_score_response(text).unwrap();
        assert_eq!(report.sharpness, 10);
        assert_eq!(report.lighting, 0);
    }

    #[test]
    fn missing_sub_scores_default_passing() {
        let report = parse_score_response(r#"{"criticalIssues": ["too dark"]}"#).unwrap();
        assert_eq!(report.overall_score, 70);
        assert_eq!(report.critical_issues, vec!["too dark"]);
    }

    #[test]
    fn prose_response_is_not_a_report() {
        assert!(parse_score_response("Looks fine to me!").is_none());
    }

    #[tokio::test]
    async fn model_failure_returns_passing_default() {
        use crate::genai::{ModelClient, ModelConfig};
        use crate::retry::RetryPolicy;
        let model = ModelClient::new(
            ModelConfig {
                endpoint: "http://localhost:0".into(),
                api_key: None,
                model: "test".into(),
            },
            RetryPolicy::default(),
        );
        let photo = Photo {
            mime_type: "image/jpeg".into(),
            bytes: vec![0xFF],
        };
        let report = assess_photo(&model, &photo).await;
        assert!(report.overall_score >= 60);
        assert!(!report.condition.has_damage);
    }
}
