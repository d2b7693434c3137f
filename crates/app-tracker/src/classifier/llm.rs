//! LLM classification over an OpenAI-compatible chat completions API.

use crate::config::LlmConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::retry::with_timeout;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracker_types::{ApplicationStatus, ClassificationResult, ClassificationSource, EmailRecord};

pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Groq models, best first
pub const DEFAULT_MODELS: &[&str] = &[
    "llama-3.3-70b-versatile",
    "meta-llama/llama-4-maverick-17b-128e-instruct",
    "qwen/qwen3-32b",
    "llama-3.1-8b-instant",
];

/// Body characters included in the prompt
const MAX_PROMPT_BODY: usize = 3000;

const SYSTEM_PROMPT: &str = "Extract job application details. Return ONLY valid JSON.";

/// Chat completion collaborator
#[allow(async_fn_in_trait)]
pub trait CompletionClient {
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> TrackerResult<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Groq chat completions client
pub struct GroqClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GroqClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> TrackerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl CompletionClient for GroqClient {
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> TrackerResult<String> {
        let request = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
            max_tokens: 300,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TrackerError::classification(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TrackerError::classification(format!("{} rate limited", model)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::classification(format!(
                "{} returned {}: {}",
                model,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TrackerError::classification(format!("Invalid response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| TrackerError::classification(format!("{} returned no content", model)))
    }
}

/// Fields the model is asked to return
#[derive(Debug, Deserialize)]
struct LlmReply {
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    role: Option<String>,
    status: String,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Tries each configured model in turn until one returns a usable label
pub struct LlmClassifier<C> {
    client: C,
    models: Vec<String>,
    timeout: Duration,
}

impl<C: CompletionClient> LlmClassifier<C> {
    pub fn new(client: C, models: Vec<String>, timeout: Duration) -> Self {
        Self {
            client,
            models,
            timeout,
        }
    }

    pub fn from_config(client: C, config: &LlmConfig) -> Self {
        Self::new(
            client,
            config.models.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub async fn classify(&self, email: &EmailRecord) -> TrackerResult<ClassificationResult> {
        let prompt = build_prompt(email);
        let mut last_error = None;

        for model in &self.models {
            let attempt = with_timeout(
                self.timeout,
                self.client.complete(model, SYSTEM_PROMPT, &prompt),
                || TrackerError::classification(format!("{} timed out", model)),
            )
            .await
            .and_then(|content| parse_llm_reply(&content, model));

            match attempt {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::debug!("Model {} failed for {}: {}", model, email.message_id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TrackerError::classification("No models configured")))
    }
}

fn build_prompt(email: &EmailRecord) -> String {
    let body: String = email.body_snippet.chars().take(MAX_PROMPT_BODY).collect();

    format!(
        r#"Analyze this job application email and extract information.

EXTRACT CAREFULLY:
1. COMPANY: The actual employer name (not an email platform like Workday or Greenhouse)
2. ROLE: The exact job title mentioned
3. STATUS: Based on the email content

STATUS DETERMINATION:
- Applied = application received / confirmed
- In Review = application under review, assessment or coding challenge
- Interview = interview scheduled or requested
- Offer = job offer extended
- Rejected = not moving forward

EMAIL:
Subject: {}
From: {}
Body:
{}

Return ONLY valid JSON:
{{"company": "company name", "role": "exact job title", "status": "Applied|In Review|Interview|Offer|Rejected", "reasoning": "brief reason"}}"#,
        email.subject, email.sender, body
    )
}

/// Parse a model reply: the whole string as JSON, else the first `{...}` in it.
/// The status must name a known stage.
pub fn parse_llm_reply(content: &str, model: &str) -> TrackerResult<ClassificationResult> {
    let content = content.trim();
    let reply: LlmReply = match serde_json::from_str(content) {
        Ok(reply) => reply,
        Err(_) => first_json_object(content).ok_or_else(|| {
            TrackerError::classification(format!("{} returned no usable JSON object", model))
        })?,
    };

    let status = ApplicationStatus::from_label(&reply.status)
        .filter(ApplicationStatus::is_known)
        .ok_or_else(|| {
            TrackerError::classification(format!(
                "{} returned invalid status '{}'",
                model, reply.status
            ))
        })?;

    let reasoning = reply
        .reasoning
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "LLM classification".to_string());

    Ok(ClassificationResult {
        status,
        source: ClassificationSource::Llm,
        company: meaningful(reply.company),
        role: meaningful(reply.role),
        reasoning: format!("{} (model={})", reasoning, model),
    })
}

/// First `{` that opens a complete reply object. The deserializer stops at
/// the matching close brace, so nested objects and braces inside strings
/// are handled and trailing prose is ignored.
fn first_json_object(content: &str) -> Option<LlmReply> {
    content.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&content[start..])
            .into_iter::<LlmReply>()
            .next()?
            .ok()
    })
}

/// Drop empty and placeholder values such as "Unknown" or "N/A"
fn meaningful(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| {
        !v.is_empty()
            && !matches!(
                v.to_lowercase().as_str(),
                "unknown" | "n/a" | "none" | "null" | "unknown company" | "unknown role"
            )
    })
}
