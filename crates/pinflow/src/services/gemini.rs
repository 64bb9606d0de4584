//! Gemini-style generative client: style description, image synthesis and
//! SEO metadata over the `generateContent` endpoint.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ImageModel, PinMetadata, ServiceError, VisionModel};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_VISION_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

const STYLE_INSTRUCTION: &str = "Analyze this Pinterest-style fashion photo and describe ONLY its \
     aesthetic style: mood, color palette, textures, fashion style, lighting, framing, \
     background. Return 4-6 sentences. Do NOT mention brands or list objects.";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    vision_model: String,
    image_model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self, ServiceError> {
        if api_key.trim().is_empty() {
            return Err(ServiceError::Auth("gemini_api_key".to_string()));
        }
        Ok(Self {
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn generate_content(
        &self,
        model: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<Part>, ServiceError> {
        let url = format!("{}/{}:generateContent", self.base_url, model);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(payload)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let body: GenerateResponse = resp.json()?;
        let parts = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();
        if parts.is_empty() {
            return Err(ServiceError::EmptyResponse(format!(
                "model '{model}' returned no parts"
            )));
        }
        Ok(parts)
    }

    fn joined_text(parts: &[Part]) -> String {
        parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }
}

impl VisionModel for GeminiClient {
    fn describe_style(&self, image: &Path) -> Result<String, ServiceError> {
        let bytes = std::fs::read(image).map_err(|source| ServiceError::Io {
            path: image.to_path_buf(),
            source,
        })?;
        let mime = if image
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        {
            "image/png"
        } else {
            "image/jpeg"
        };
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);

        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inlineData": { "mimeType": mime, "data": b64 } },
                    { "text": STYLE_INSTRUCTION }
                ]
            }]
        });

        let parts = self.generate_content(&self.vision_model, &payload)?;
        let text = Self::joined_text(&parts);
        if text.is_empty() {
            return Err(ServiceError::EmptyResponse(
                "style description had no text parts".to_string(),
            ));
        }
        debug!("Style described from {}", image.display());
        Ok(text)
    }
}

impl ImageModel for GeminiClient {
    fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ServiceError> {
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": "1:1" }
            }
        });

        let parts = self.generate_content(&self.image_model, &payload)?;
        let inline = parts
            .into_iter()
            .find_map(|p| p.inline_data)
            .ok_or_else(|| {
                ServiceError::EmptyResponse("no image data in response parts".to_string())
            })?;

        base64::engine::general_purpose::STANDARD
            .decode(inline.data)
            .map_err(|e| ServiceError::Decode(format!("image payload is not valid base64: {e}")))
    }

    fn generate_metadata(
        &self,
        board_name: &str,
        style: &str,
    ) -> Result<PinMetadata, ServiceError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{
                    "text": format!(
                        "Board: {board_name}\n\nStyle:\n{style}\n\n\
                         Return valid JSON with:\ntitle, description, hashtags (list), alt"
                    )
                }]
            }]
        });

        let parts = self.generate_content(&self.vision_model, &payload)?;
        let raw = Self::joined_text(&parts);
        parse_embedded_json(&raw)
    }
}

/// Extracts the first JSON object embedded in model output. The model wraps
/// its JSON in prose or code fences often enough that plain parsing fails.
pub(crate) fn parse_embedded_json(raw: &str) -> Result<PinMetadata, ServiceError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(ServiceError::Decode(format!(
            "no JSON object in model output: {raw}"
        )));
    };
    if end < start {
        return Err(ServiceError::Decode(format!(
            "malformed JSON object in model output: {raw}"
        )));
    }
    serde_json::from_str(&raw[start..=end])
        .map_err(|e| ServiceError::Decode(format!("metadata JSON did not parse: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_is_rejected() {
        assert!(matches!(
            GeminiClient::new("  ".to_string()),
            Err(ServiceError::Auth(_))
        ));
        assert!(GeminiClient::new("key".to_string()).is_ok());
    }

    #[test]
    fn test_parse_embedded_json_strips_prose_and_fences() {
        let raw = "Sure! Here you go:\n```json\n{\"title\": \"T\", \"description\": \"D\", \
                   \"hashtags\": [\"a\"], \"alt\": \"A\"}\n```";
        let meta = parse_embedded_json(raw).unwrap();
        assert_eq!(meta.title, "T");
        assert_eq!(meta.hashtags, vec!["a"]);
    }

    #[test]
    fn test_parse_embedded_json_without_object_fails() {
        assert!(matches!(
            parse_embedded_json("no json here"),
            Err(ServiceError::Decode(_))
        ));
    }

    #[test]
    fn test_joined_text_skips_non_text_parts() {
        let parts = vec![
            Part {
                text: Some("first".to_string()),
                inline_data: None,
            },
            Part {
                text: None,
                inline_data: Some(InlineData {
                    data: "aGk=".to_string(),
                }),
            },
            Part {
                text: Some("second".to_string()),
                inline_data: None,
            },
        ];
        assert_eq!(GeminiClient::joined_text(&parts), "first second");
    }
}
