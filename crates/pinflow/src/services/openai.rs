//! OpenAI-style generative client: chat-completions vision and metadata,
//! plus image synthesis over `images/generations`.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use super::gemini::parse_embedded_json;
use super::{ImageModel, PinMetadata, ServiceError, VisionModel};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CHAT_MODEL: &str = "gpt-4.1";
const IMAGE_MODEL: &str = "gpt-image-1";

const STYLE_INSTRUCTION: &str = "Describe this image in 3-4 sentences. Focus strictly on: mood, \
     colors, outfit, fashion style, background, lighting, composition. Describe it as an \
     aesthetic Pinterest photo.";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Result<Self, ServiceError> {
        if api_key.trim().is_empty() {
            return Err(ServiceError::Auth("openai_api_key".to_string()));
        }
        Ok(Self {
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(90))
                .build()?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<T, ServiceError> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        Ok(resp.json()?)
    }

    fn chat(&self, payload: &serde_json::Value) -> Result<String, ServiceError> {
        let body: ChatResponse = self.post_json("chat/completions", payload)?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ServiceError::EmptyResponse("chat completion had no content".to_string()))
    }
}

impl VisionModel for OpenAiClient {
    fn describe_style(&self, image: &Path) -> Result<String, ServiceError> {
        let bytes = std::fs::read(image).map_err(|source| ServiceError::Io {
            path: image.to_path_buf(),
            source,
        })?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);

        let payload = json!({
            "model": CHAT_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{b64}") }
                    },
                    { "type": "text", "text": STYLE_INSTRUCTION }
                ]
            }]
        });

        self.chat(&payload)
    }
}

impl ImageModel for OpenAiClient {
    fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ServiceError> {
        let payload = json!({
            "model": IMAGE_MODEL,
            "prompt": prompt,
            "size": "1024x1024"
        });

        let body: ImagesResponse = self.post_json("images/generations", &payload)?;
        let datum = body.data.into_iter().next().ok_or_else(|| {
            ServiceError::EmptyResponse("image generation returned no data".to_string())
        })?;

        base64::engine::general_purpose::STANDARD
            .decode(datum.b64_json)
            .map_err(|e| ServiceError::Decode(format!("image payload is not valid base64: {e}")))
    }

    fn generate_metadata(
        &self,
        board_name: &str,
        style: &str,
    ) -> Result<PinMetadata, ServiceError> {
        let payload = json!({
            "model": CHAT_MODEL,
            "messages": [{
                "role": "user",
                "content": format!(
                    "Board: {board_name}\n\nImage style description: {style}\n\n\
                     Generate Pinterest metadata:\n\
                     - short SEO title (max 60 chars)\n\
                     - Pinterest pin description (1-2 sentences)\n\
                     - 10 aesthetic hashtags\n\
                     - alt-text (1 sentence)\n\
                     Return JSON keys: title, description, hashtags, alt"
                )
            }]
        });

        let raw = self.chat(&payload)?;
        parse_embedded_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_is_rejected() {
        assert!(matches!(
            OpenAiClient::new(String::new()),
            Err(ServiceError::Auth(_))
        ));
        assert!(OpenAiClient::new("key".to_string()).is_ok());
    }

    #[test]
    fn test_chat_response_shape_decodes() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }]
        }))
        .unwrap();
        assert_eq!(body.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_images_response_shape_decodes() {
        let body: ImagesResponse = serde_json::from_value(json!({
            "created": 1,
            "data": [{ "b64_json": "aGk=" }]
        }))
        .unwrap();
        assert_eq!(body.data[0].b64_json, "aGk=");
    }
}
