//! Photo-classification verification
//!
//! Classification is lenient: when the service is unreachable, unconfigured,
//! slow, answers with a non-200 status or with something unparsable, the
//! photo is accepted.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tether_api::{SceneCategory, VerificationOutcome};
use tether_config::ClassifierPolicy;
use tether_host_api::{ClassifierError, ClassifierResult, SceneClassifier, SceneVerdict};
use tracing::{debug, info, warn};

/// Message used whenever classification falls back to acceptance
pub const FALLBACK_MESSAGE: &str = "Nice work! Photo accepted.";

/// Question asked about an image
pub fn prompt_for(scene: SceneCategory) -> String {
    format!(
        "does this image show {}? Reply only with JSON of the form \
         {{\"verified\": true|false, \"message\": \"<short encouraging sentence>\"}}",
        scene.description()
    )
}

/// HTTP scene classifier.
///
/// Request body is `{prompt, image}` with a base64 JPEG; the bearer
/// credential comes from the environment.
pub struct RemoteClassifier {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> ClassifierResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout,
        })
    }

    pub fn from_policy(policy: &ClassifierPolicy) -> ClassifierResult<Self> {
        Self::new(policy.endpoint.clone(), policy.api_key(), policy.timeout)
    }

    async fn request(
        &self,
        endpoint: &str,
        api_key: &str,
        image_jpeg: &[u8],
        scene: SceneCategory,
    ) -> ClassifierResult<SceneVerdict> {
        let body = serde_json::json!({
            "prompt": prompt_for(scene),
            "image": general_purpose::STANDARD.encode(image_jpeg),
        });

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout
                } else {
                    ClassifierError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClassifierError::Status(status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;
        debug!(len = text.len(), "Classifier response received");

        parse_verdict(&text).map_err(ClassifierError::Parse)
    }
}

#[async_trait]
impl SceneClassifier for RemoteClassifier {
    async fn classify(
        &self,
        image_jpeg: &[u8],
        scene: SceneCategory,
    ) -> ClassifierResult<SceneVerdict> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ClassifierError::NotConfigured("no endpoint".into()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ClassifierError::NotConfigured("no credential".into()))?;

        tokio::time::timeout(self.timeout, self.request(endpoint, api_key, image_jpeg, scene))
            .await
            .map_err(|_| ClassifierError::Timeout)?
    }
}

/// Remove markdown code fences around a payload
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse a verdict from a raw response body.
///
/// Accepts the bare `{verified, message}` object, or an envelope carrying
/// the verdict text at `choices[0].message.content`, `content[0].text`,
/// `output_text`, `message` or `text`.
pub fn parse_verdict(body: &str) -> Result<SceneVerdict, String> {
    let body = strip_fences(body);
    if let Some(verdict) = verdict_from_text(body) {
        return Ok(verdict);
    }

    let value: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let inner = envelope_text(&value).ok_or_else(|| "no verdict in response".to_string())?;
    verdict_from_text(strip_fences(inner)).ok_or_else(|| format!("unparsable verdict: {}", inner))
}

fn verdict_from_text(text: &str) -> Option<SceneVerdict> {
    if let Ok(verdict) = serde_json::from_str::<SceneVerdict>(text) {
        return Some(verdict);
    }
    // Models sometimes wrap the object in prose
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn envelope_text(value: &Value) -> Option<&str> {
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .or_else(|| value.pointer("/content/0/text").and_then(Value::as_str))
        .or_else(|| value.get("output_text").and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))
        .or_else(|| value.get("text").and_then(Value::as_str))
}

/// Decode an image sent as base64 (standard or URL-safe, padded or not)
pub fn decode_image(data: &str) -> Result<Vec<u8>, String> {
    let data = data.trim();
    general_purpose::STANDARD
        .decode(data)
        .or_else(|_| general_purpose::URL_SAFE.decode(data))
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(data))
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(data))
        .map_err(|_| "Invalid base64 encoding".to_string())
}

/// Classify a photo with the lenient fallback applied.
///
/// The whole exchange is bounded by `timeout` regardless of the classifier.
pub async fn verify_photo(
    classifier: &dyn SceneClassifier,
    image_jpeg: &[u8],
    scene: SceneCategory,
    reward_xp: u32,
    timeout: Duration,
) -> VerificationOutcome {
    let result = tokio::time::timeout(timeout, classifier.classify(image_jpeg, scene))
        .await
        .unwrap_or(Err(ClassifierError::Timeout));

    match result {
        Ok(SceneVerdict {
            verified: true,
            message,
        }) => {
            info!(%scene, "Photo verified by classifier");
            let message = if message.trim().is_empty() {
                FALLBACK_MESSAGE.to_string()
            } else {
                message
            };
            VerificationOutcome::verified(reward_xp, message)
        }
        Ok(SceneVerdict {
            verified: false,
            message,
        }) => {
            info!(%scene, "Photo rejected by classifier");
            VerificationOutcome::failed(message)
        }
        Err(e) => {
            warn!(%scene, error = %e, "Scene classification unavailable, accepting photo");
            VerificationOutcome::verified(reward_xp, FALLBACK_MESSAGE)
        }
    }
}
