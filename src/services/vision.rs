use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::models::photo::{Item, PhotoAnalysis};

/// Room labels the detector may answer with.
pub const ROOM_TYPES: &[&str] = &[
    "living_room",
    "bedroom",
    "kitchen",
    "dining_room",
    "bathroom",
    "office",
    "hallway",
    "laundry",
    "garage",
    "basement",
    "attic",
    "storage",
    "outdoor",
];

/// Vision settings shared by every photo job.
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub provider: String,
    pub model: String,
    pub timeout: Duration,
    pub room_detect_timeout: Duration,
    pub detect_rooms: bool,
}

/// Per-call options for the analysis step.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest<'a> {
    pub provider: &'a str,
    pub room_type: Option<&'a str>,
    pub user_id: Uuid,
    pub timeout: Duration,
}

/// The external vision collaborator.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Model identifier recorded with metrics.
    fn model(&self) -> &str;

    async fn detect_room(&self, image: &[u8], timeout: Duration) -> Result<String, VisionError>;

    async fn analyze_photo(
        &self,
        image: &[u8],
        request: &AnalyzeRequest<'_>,
    ) -> Result<PhotoAnalysis, VisionError>;
}

/// Client for a Cloudflare Workers AI vision model.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct WorkersAiResponse {
    #[serde(default)]
    success: bool,
    result: Option<WorkersAiResult>,
    #[serde(default)]
    errors: Vec<WorkersAiMessage>,
}

#[derive(Deserialize)]
struct WorkersAiResult {
    response: String,
}

#[derive(Deserialize)]
struct WorkersAiMessage {
    message: String,
}

#[derive(Deserialize)]
struct DetectedItems {
    #[serde(default)]
    items: Vec<Item>,
}

impl WorkersAiClient {
    pub fn new(account_id: String, api_token: String, model: String) -> Self {
        Self {
            http: Client::new(),
            account_id,
            api_token,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        )
    }

    /// Send one image + prompt and return the model's text answer.
    async fn run(&self, image: &[u8], prompt: String, timeout: Duration) -> Result<String, VisionError> {
        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image),
            "prompt": prompt,
            "max_tokens": 1024
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .timeout(timeout)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| VisionError::from_transport(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: WorkersAiResponse = response
            .json()
            .await
            .map_err(|e| VisionError::from_transport(e, timeout))?;

        match parsed.result {
            Some(result) if parsed.success => Ok(result.response),
            _ => Err(VisionError::Provider(
                parsed
                    .errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }
}

#[async_trait]
impl VisionProvider for WorkersAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn detect_room(&self, image: &[u8], timeout: Duration) -> Result<String, VisionError> {
        let prompt = format!(
            "Which room of a home is shown in this photo? Answer with exactly one of: {}.",
            ROOM_TYPES.join(", ")
        );
        let answer = self.run(image, prompt, timeout).await?;
        normalize_room(&answer).ok_or(VisionError::UnrecognizedRoom(answer))
    }

    async fn analyze_photo(
        &self,
        image: &[u8],
        request: &AnalyzeRequest<'_>,
    ) -> Result<PhotoAnalysis, VisionError> {
        let room_hint = request
            .room_type
            .map(|room| format!(" The photo shows a {}.", room.replace('_', " ")))
            .unwrap_or_default();
        let prompt = format!(
            concat!(
                "List every movable household item in this photo for a moving inventory.{}",
                " Return ONLY JSON of the form {{\"items\": [{{\"name\": string, \"category\": string,",
                " \"quantity\": integer, \"dimensions_cm\": {{\"length\": number, \"width\": number,",
                " \"height\": number}}, \"volume_m3\": number}}]}}."
            ),
            room_hint
        );

        let answer = self.run(image, prompt, request.timeout).await?;
        parse_analysis(&answer)
    }
}

/// Map a free-text answer onto a known room label.
pub fn normalize_room(answer: &str) -> Option<String> {
    let cleaned: String = answer
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    ROOM_TYPES
        .iter()
        .find(|room| cleaned.contains(*room))
        .map(|room| room.to_string())
}

/// Extract the JSON object from a model answer and total it up.
pub fn parse_analysis(answer: &str) -> Result<PhotoAnalysis, VisionError> {
    let start = answer.find('{');
    let end = answer.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &answer[s..=e],
        _ => return Err(VisionError::Unparseable("no JSON object in answer".to_string())),
    };

    let detected: DetectedItems =
        serde_json::from_str(json).map_err(|e| VisionError::Unparseable(e.to_string()))?;
    Ok(PhotoAnalysis::from_items(detected.items))
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("network error: {0}")]
    Http(reqwest::Error),

    #[error("Workers AI returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("unrecognized room label: {0}")]
    UnrecognizedRoom(String),

    #[error("unparseable analysis response: {0}")]
    Unparseable(String),
}

impl VisionError {
    fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            VisionError::Timeout(timeout.as_millis() as u64)
        } else if err.is_decode() {
            VisionError::Unparseable(err.to_string())
        } else {
            VisionError::Http(err)
        }
    }
}
