use crate::http::build_client;
use crate::models::Photo;
use crate::retry::RetryPolicy;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generative model boundary: an ordered list of parts (instruction text
/// or inline image bytes) plus generation parameters, answered with
/// free-form text that may or may not contain one structured object.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl ModelConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("GENAI_ENDPOINT")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            api_key: std::env::var("GENAI_API_KEY").ok(),
            model: std::env::var("GENAI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub enum Part {
    Text(String),
    InlineImage { mime_type: String, data: Vec<u8> },
}

impl Part {
    pub fn from_photo(photo: &Photo) -> Self {
        Part::InlineImage {
            mime_type: photo.mime_type.clone(),
            data: photo.bytes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl GenerationParams {
    /// Low-randomness settings for extraction calls: reproducible, not
    /// creative.
    pub fn precise() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.8,
            top_k: 10,
            max_output_tokens: 2048,
        }
    }

    /// Settings for listing copy, where varied wording is desirable.
    pub fn creative() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 4096,
        }
    }
}

pub struct ModelClient {
    http: Client,
    config: ModelConfig,
    retry: RetryPolicy,
}

impl ModelClient {
    pub fn new(config: ModelConfig, retry: RetryPolicy) -> Self {
        Self {
            http: build_client(),
            config,
            retry,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ModelConfig::from_env(), RetryPolicy::from_env())
    }

    /// Send parts to the model and return the raw response text. Transport
    /// failures are retried per the shared policy; a missing key fails
    /// immediately without touching the network.
    pub async fn generate(
        &self,
        parts: &[Part],
        params: &GenerationParams,
    ) -> Result<String, ModelError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(ModelError::MissingApiKey);
        };

        let body = GenerateRequest {
            contents: vec![Content {
                parts: parts.iter().map(WirePart::from).collect(),
            }],
            generation_config: params.clone(),
        };
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .retry
            .run("genai.generate", || {
                self.http
                    .post(&url)
                    .query(&[("key", api_key)])
                    .json(&body)
                    .send()
            })
            .await
            .map_err(|err| ModelError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ModelError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;

        let text = payload
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ModelError::InvalidResponse("no text candidate".into()))?;

        Ok(text)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl From<&Part> for WirePart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => WirePart {
                text: Some(text.clone()),
                inline_data: None,
            },
            Part::InlineImage { mime_type, data } => WirePart {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: mime_type.clone(),
                    data: STANDARD.encode(data),
                }),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyless_client() -> ModelClient {
        ModelClient::new(
            ModelConfig {
                endpoint: "http://localhost:0".into(),
                api_key: None,
                model: "test-model".into(),
            },
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn missing_key_fails_fast_without_network() {
        let client = keyless_client();
        let err = client
            .generate(&[Part::Text("hello".into())], &GenerationParams::precise())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingApiKey));
    }

    #[test]
    fn inline_image_parts_are_base64_encoded() {
        let part = Part::InlineImage {
            mime_type: "image/jpeg".into(),
            data: vec![0xFF, 0xD8, 0xFF],
        };
        let wire = WirePart::from(&part);
        let inline = wire.inline_data.unwrap();
        assert_eq!(inline.mime_type, "image/jpeg");
        assert_eq!(inline.data, STANDARD.encode([0xFF, 0xD8, 0xFF]));
    }

    #[test]
    fn precise_params_are_low_randomness() {
        let params = GenerationParams::precise();
        assert!(params.temperature <= 0.2);
        assert!(params.top_k <= 16);
    }

    #[test]
    fn response_text_joins_parts() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}
            }]
        });
        let parsed: GenerateResponse = serde_json::from_value(raw).unwrap();
        let text: String = parsed.candidates[0]
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect();
        assert_eq!(text, "{\"a\":1}");
    }
}
