//! Chat completion.
//!
//! The assistant sends one system message and one user message built from
//! the packed context, the question and the (optional) username. The
//! username is never sent to the provider in clear: the request's `user`
//! field carries its SHA-256 hex digest.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use wikiqa_core::models::Usage;

use crate::config::CompletionConfig;
use crate::embedding::{openai_api_key, parse_usage, OPENAI_BASE_URL};

/// Built-in system prompt, replaceable with `[completion] system_prompt`.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant that answers questions using the wiki pages supplied with each question.
Answer the question based on the supplied information. If the question cannot be answered from it, politely say you don't know and ask the user for clarification.
If a username is provided you may address the user by it. If it shows as N/A, refer to the user only as \"you\".
Do not mention the supplied information in your response.
The information is wiki text taken from several pages. Different pages are separated by \"###\".
If the user is not asking a question (e.g. \"thanks\"), respond to it and ask if they have any further questions.
Above all, be polite and helpful.";

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub context: String,
    pub question: String,
    pub username: Option<String>,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    /// The user message sent to the model.
    pub fn user_message(&self) -> String {
        format!(
            "Context:\n{}\n\n---\n\nQuestion: {}\nUsername: {}",
            self.context.trim(),
            self.question,
            self.username.as_deref().unwrap_or("N/A")
        )
    }

    /// SHA-256 hex digest of the username, sent as the end-user identifier.
    pub fn user_id(&self) -> Option<String> {
        self.username.as_deref().map(hash_username)
    }
}

/// The model's reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    /// Provider finish reason (`stop`, `length`, ...).
    pub stop_reason: Option<String>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

pub fn hash_username(username: &str) -> String {
    format!("{:x}", Sha256::digest(username.as_bytes()))
}

/// Used when `completion.provider = "disabled"`.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        bail!("Completion provider is disabled")
    }
}

/// OpenAI `POST /chat/completions`.
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    api_key: String,
    organization: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for OpenAI provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            temperature: config.temperature,
            api_key: openai_api_key()?,
            organization: std::env::var("OPENAI_ORG_ID").ok(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            client,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": request.max_output_tokens,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_message()},
            ],
        });
        if let Some(user) = request.user_id() {
            body["user"] = serde_json::Value::String(user);
        }
        body
    }
}

#[async_trait]
impl CompletionProvider for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut req = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&self.body(request));
        if let Some(org) = &self.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<Completion> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow!("Invalid chat response: no choices"))?;

    let text = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid chat response: missing message content"))?;

    Ok(Completion {
        text: text.to_string(),
        usage: parse_usage(json),
        stop_reason: choice
            .get("finish_reason")
            .and_then(|r| r.as_str())
            .map(str::to_string),
    })
}

pub fn create_completion_provider(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
