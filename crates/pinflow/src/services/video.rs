//! Image-to-video render client: create a task, poll until it settles,
//! download the result.

use std::path::Path;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{ServiceError, VideoModel};

const DEFAULT_BASE_URL: &str = "https://api.freepik.com/v1/ai/image-to-video/kling-v2-5-pro";
const API_KEY_HEADER: &str = "x-freepik-api-key";

const DEFAULT_PROMPT: &str =
    "subtle motion, slow camera zoom, gentle parallax, soft cinematic lighting; no text, no logos";
const DEFAULT_NEGATIVE_PROMPT: &str = "text, logos, distorted text, heavy motion";

#[derive(Debug, Clone)]
pub struct RenderClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    prompt: String,
    negative_prompt: String,
    duration_secs: String,
    cfg_scale: f64,
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    #[serde(default)]
    data: serde_json::Value,
}

impl RenderClient {
    pub fn new(api_key: String) -> Result<Self, ServiceError> {
        if api_key.trim().is_empty() {
            return Err(ServiceError::Auth("render_api_key".to_string()));
        }
        Ok(Self {
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            duration_secs: "5".to_string(),
            cfg_scale: 0.5,
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(900),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    fn create_task(&self, image_b64: &str) -> Result<String, ServiceError> {
        let payload = json!({
            "duration": self.duration_secs,
            "image": image_b64,
            "prompt": self.prompt,
            "negative_prompt": self.negative_prompt,
            "cfg_scale": self.cfg_scale,
        });

        let resp = self
            .http
            .post(&self.base_url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let body: TaskEnvelope = resp.json()?;
        body.data
            .get("task_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Decode("task creation response had no task_id".to_string())
            })
    }

    fn task_status(&self, task_id: &str) -> Result<serde_json::Value, ServiceError> {
        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, task_id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        let body: TaskEnvelope = resp.json()?;
        Ok(body.data)
    }

    /// Polls until the task reaches a terminal status or the timeout expires.
    /// A timeout is its own failure kind so callers can tell it apart from an
    /// upstream rejection.
    fn wait_for_completion(&self, task_id: &str) -> Result<serde_json::Value, ServiceError> {
        let started = Instant::now();
        loop {
            let data = self.task_status(task_id)?;
            let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("");
            match status {
                "COMPLETED" => return Ok(data),
                "FAILED" => {
                    return Err(ServiceError::Upstream(format!(
                        "render task '{task_id}' failed: {data}"
                    )))
                }
                other => debug!("Render task {} status: {}", task_id, other),
            }
            if started.elapsed() >= self.poll_timeout {
                return Err(ServiceError::RenderTimeout {
                    task_id: task_id.to_string(),
                    timeout: self.poll_timeout,
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let resp = self.http.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        Ok(resp.bytes()?.to_vec())
    }
}

impl VideoModel for RenderClient {
    fn render(&self, reference: &Path) -> Result<Vec<u8>, ServiceError> {
        let bytes = std::fs::read(reference).map_err(|source| ServiceError::Io {
            path: reference.to_path_buf(),
            source,
        })?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);

        let task_id = self.create_task(&b64)?;
        info!("Render task created: {}", task_id);

        let data = self.wait_for_completion(&task_id)?;
        let url = extract_video_url(&data).ok_or_else(|| {
            ServiceError::Decode(format!("completed task '{task_id}' had no video URL"))
        })?;
        self.download(&url)
    }
}

/// The render API has shipped the result URL under several shapes; try the
/// known ones in order.
fn extract_video_url(data: &serde_json::Value) -> Option<String> {
    for key in ["video_url", "url"] {
        if let Some(url) = data.get(key).and_then(|v| v.as_str()) {
            return Some(url.to_string());
        }
    }
    if let Some(url) = data
        .get("video")
        .and_then(|v| v.get("url"))
        .and_then(|v| v.as_str())
    {
        return Some(url.to_string());
    }
    if let Some(url) = data
        .get("output")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.get("url"))
        .and_then(|v| v.as_str())
    {
        return Some(url.to_string());
    }
    data.get("generated")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
