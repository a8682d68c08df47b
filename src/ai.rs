//! OpenAI-compatible chat client used for the extraction call.
//! Optional — see `AiConfig::from_env()`. The pipeline runs without it,
//! it just never creates memories.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MemoirError;

fn ai_err(msg: impl Into<String>) -> MemoirError {
    MemoirError::AiBackend(msg.into())
}

const AI_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone)]
pub struct AiConfig {
    pub llm_url: String,
    pub llm_key: String,
    pub llm_model: String,
    /// Extraction-specific model override; falls back to `llm_model`.
    pub extract_model: Option<String>,
    pub client: reqwest::Client,
}

impl AiConfig {
    /// Returns `None` if `MEMOIR_LLM_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let llm_url = std::env::var("MEMOIR_LLM_URL").ok()?;
        let client = reqwest::Client::builder()
            .timeout(AI_TIMEOUT)
            .build()
            .expect("failed to build AI HTTP client");
        Some(Self {
            llm_url,
            llm_key: std::env::var("MEMOIR_LLM_KEY").unwrap_or_default(),
            llm_model: std::env::var("MEMOIR_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            extract_model: std::env::var("MEMOIR_EXTRACT_MODEL").ok(),
            client,
        })
    }

    pub fn model_for_extract(&self) -> &str {
        self.extract_model.as_deref().unwrap_or(&self.llm_model)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    tools: Vec<ToolDef>,
    tool_choice: serde_json::Value,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ToolDef {
    #[serde(rename = "type")]
    tool_type: String,
    function: FunctionDef,
}

#[derive(Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

pub struct ToolCallResult<T> {
    pub value: T,
    pub usage: Option<Usage>,
    pub model: String,
    pub duration_ms: u64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Deserialize)]
struct ToolCallFunction {
    arguments: String,
}

/// Call the LLM with one function definition and a forced tool choice,
/// returning the parsed arguments. Forcing the call is what makes the
/// response parseable as a known shape instead of free text.
pub async fn llm_tool_call<T: serde::de::DeserializeOwned>(
    cfg: &AiConfig,
    system: &str,
    user: &str,
    fn_name: &str,
    fn_desc: &str,
    parameters: serde_json::Value,
) -> Result<ToolCallResult<T>, MemoirError> {
    let model = cfg.model_for_extract().to_string();
    let req = ChatRequest {
        model: model.clone(),
        messages: vec![
            ChatMessage { role: "system".into(), content: system.into() },
            ChatMessage { role: "user".into(), content: user.into() },
        ],
        temperature: 0.1,
        tools: vec![ToolDef {
            tool_type: "function".into(),
            function: FunctionDef {
                name: fn_name.into(),
                description: fn_desc.into(),
                parameters,
            },
        }],
        tool_choice: serde_json::json!({"type": "function", "function": {"name": fn_name}}),
    };

    let mut builder = cfg.client.post(&cfg.llm_url).json(&req);
    if !cfg.llm_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.llm_key));
    }

    let start = std::time::Instant::now();
    let resp = builder
        .send()
        .await
        .map_err(|e| ai_err(format!("LLM request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ai_err(format!("LLM returned {status}: {body}")));
    }

    let chat: ChatResponse = resp
        .json()
        .await
        .map_err(|e| ai_err(format!("LLM response parse failed: {e}")))?;
    let duration_ms = start.elapsed().as_millis() as u64;

    let args = chat
        .choices
        .first()
        .and_then(|c| c.message.tool_calls.as_ref())
        .and_then(|tc| tc.first())
        .map(|tc| tc.function.arguments.clone())
        .ok_or_else(|| ai_err("no tool call in response"))?;

    let value: T = serde_json::from_str(&args)
        .map_err(|e| ai_err(format!("tool call arguments parse failed: {e}")))?;

    Ok(ToolCallResult { value, usage: chat.usage, model, duration_ms })
}
