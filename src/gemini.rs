//! Gemini API Client
//!
//! Sends a conversation to Gemini `generateContent` and extracts the reply.
//! Failures never reach the caller; they degrade to a fixed apology.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::conversation::{ChatMessage, ChatRole};

/// Reply shown to the user when the model cannot be reached
pub const APOLOGY: &str =
    "Sorry — I'm having trouble talking to my brain (API). Please try again shortly.";

/// Outcome of a model call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    /// Text extracted from the response
    Answer(String),
    /// Response had no text; stringified raw body
    Raw(String),
    /// Call failed; `text` is the apology delivered instead
    Degraded { text: String, reason: String },
}

impl ModelReply {
    pub fn degraded(reason: impl Into<String>) -> Self {
        ModelReply::Degraded {
            text: APOLOGY.to_string(),
            reason: reason.into(),
        }
    }

    /// Text to deliver and persist
    pub fn text(&self) -> &str {
        match self {
            ModelReply::Answer(text) | ModelReply::Raw(text) => text,
            ModelReply::Degraded { text, .. } => text,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ModelReply::Degraded { .. })
    }
}

/// Anything that can answer a conversation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Ask with prior conversation plus the new user utterance
    async fn ask(&self, conversation: &[ChatMessage], user_text: &str) -> ModelReply;
}

/// Client-side failure before a reply could be extracted
#[derive(Debug, thiserror::Error)]
enum GeminiError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gemini API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Gemini API client
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(client: Client, api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self::new(
            client,
            &config.gemini_api_key,
            &config.model_name,
            &config.gemini_api_base,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ModelReply, GeminiError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GeminiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        Ok(match extract_text(parsed) {
            Some(text) => ModelReply::Answer(text.trim().to_string()),
            None => {
                warn!("Gemini response carried no text, falling back to raw body");
                ModelReply::Raw(body.trim().to_string())
            }
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn ask(&self, conversation: &[ChatMessage], user_text: &str) -> ModelReply {
        let request = build_request(conversation, user_text);

        debug!(
            "Calling Gemini API: model={}, history={}, prompt_len={}",
            self.model,
            request.contents.len() - 1,
            user_text.len()
        );

        match self.generate(&request).await {
            Ok(reply) => {
                info!("Gemini response: model={}, reply_len={}", self.model, reply.text().len());
                reply
            }
            Err(e) => {
                error!("Gemini API error: {}", e);
                ModelReply::degraded(e.to_string())
            }
        }
    }
}

fn build_request(conversation: &[ChatMessage], user_text: &str) -> GenerateRequest {
    let system: Vec<Part> = conversation
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| Part {
            text: m.content.clone(),
        })
        .collect();

    let mut contents: Vec<Content> = conversation
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                ChatRole::System => return None,
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            Some(Content {
                role: Some(role),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
        })
        .collect();

    contents.push(Content {
        role: Some("user"),
        parts: vec![Part {
            text: user_text.to_string(),
        }],
    });

    GenerateRequest {
        system_instruction: (!system.is_empty()).then_some(Content {
            role: None,
            parts: system,
        }),
        contents,
    }
}

fn extract_text(response: GenerateResponse) -> Option<String> {
    let parts = response.candidates.into_iter().next()?.content?.parts;
    let texts: Vec<String> = parts.into_iter().filter_map(|p| p.text).collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}
