use crate::extract::recover_object;
use crate::genai::{GenerationParams, ModelClient, ModelError, Part};
use crate::models::{Photo, TagEvidence};
use tracing::warn;

const TAG_READER_PROMPT: &str = r#"
You are reading the tags, labels and printed codes on a second-hand product.
Work line by line: transcribe every piece of visible text on every tag,
care label, box sticker and printed marking, exactly as written. Then
categorize what you transcribed.

Respond with JSON only, in this exact shape:
{
  "brand": "brand name printed on a tag, or null",
  "modelCodes": ["product/model numbers, e.g. DD1391-100"],
  "styleCodes": ["style or article codes"],
  "skuNumbers": ["SKU / barcode numbers"],
  "size": "size marking, or null",
  "allText": ["every transcribed line, in reading order"]
}
Do not guess text you cannot read; omit it instead.
"#;

/// Read and categorize all visible tag text across the photos. Advisory:
/// any failure yields an all-empty record, never an error.
pub async fn read_tags(model: &ModelClient, photos: &[Photo]) -> TagEvidence {
    match try_read(model, photos).await {
        Ok(evidence) => evidence,
        Err(err) => {
            warn!(
                target = "snaplist.evidence",
                error = %err,
                "tag reader failed, returning empty evidence"
            );
            TagEvidence::default()
        }
    }
}

async fn try_read(model: &ModelClient, photos: &[Photo]) -> Result<TagEvidence, ModelError> {
    let mut parts = vec![Part::Text(TAG_READER_PROMPT.trim().to_string())];
    parts.extend(photos.iter().map(Part::from_photo));

    let text = model.generate(&parts, &GenerationParams::precise()).await?;
    Ok(parse_tag_response(&text))
}

/// Recover a TagEvidence from raw model text; anything unusable becomes
/// the empty record.
pub(crate) fn parse_tag_response(text: &str) -> TagEvidence {
    recover_object(text)
        .and_then(|value| serde_json::from_value::<TagEvidence>(value).ok())
        .map(normalize)
        .unwrap_or_default()
}

fn normalize(mut evidence: TagEvidence) -> TagEvidence {
    evidence.brand = evidence
        .brand
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());
    evidence.size = evidence
        .size
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    for list in [
        &mut evidence.model_codes,
        &mut evidence.style_codes,
        &mut evidence.sku_numbers,
        &mut evidence.all_text,
    ] {
        list.retain(|entry| !entry.trim().is_empty());
    }
    evidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genai::{ModelConfig, ModelClient};
    use crate::retry::RetryPolicy;

    #[test]
    fn parses_fenced_response() {
        let text = "Sure, here is the transcription:\n```json\n{\"brand\": \"Nike\", \"modelCodes\": [\"DD1391-100\"], \"size\": \"UK 9\", \"allText\": [\"NIKE\", \"DD1391-100\", \"UK 9\"]}\n```";
        let evidence = parse_tag_response(text);
        assert_eq!(evidence.brand.as_deref(), Some("Nike"));
        assert_eq!(evidence.model_codes, vec!["DD1391-100"]);
        assert_eq!(evidence.size.as_deref(), Some("UK 9"));
        assert_eq!(evidence.all_text.len(), 3);
    }

    #[test]
    fn stray_backslash_in_tag_text_is_recovered() {
        let text = r#"{"brand": "Gap", "allText": ["Home \ Men", "M"]}"#;
        let evidence = parse_tag_response(text);
        assert_eq!(evidence.brand.as_deref(), Some("Gap"));
        assert_eq!(evidence.all_text[0], "Home \\ Men");
    }

    #[test]
    fn unusable_response_becomes_empty_record() {
        let evidence = parse_tag_response("I could not read any tags in these photos.");
        assert!(evidence.is_empty());
    }

    #[test]
    fn blank_entries_are_dropped() {
        let text = r#"{"brand": "  ", "modelCodes": ["", "AB-1"], "allText": [" "]}"#;
        let evidence = parse_tag_response(text);
        assert!(evidence.brand.is_none());
        assert_eq!(evidence.model_codes, vec!["AB-1"]);
        assert!(evidence.all_text.is_empty());
    }

    #[tokio::test]
    async fn model_failure_yields_empty_evidence() {
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
            bytes: vec![1, 2, 3],
        };
        let evidence = read_tags(&model, &[photo]).await;
        assert!(evidence.is_empty());
    }
}
