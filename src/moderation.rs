//! Question moderation.
//!
//! A [`Moderator`] classifies the user's question before any retrieval is
//! done. A flagged question is declined; a moderator failure is an error,
//! never an implicit pass.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::config::ModerationConfig;
use crate::embedding::{openai_api_key, OPENAI_BASE_URL};

/// Classifies text as acceptable or flagged.
#[async_trait]
pub trait Moderator: Send + Sync {
    /// Returns `true` when `text` is flagged.
    async fn is_flagged(&self, text: &str) -> Result<bool>;
}

/// Passes everything. Warns on every check.
pub struct NoModeration;

#[async_trait]
impl Moderator for NoModeration {
    async fn is_flagged(&self, _text: &str) -> Result<bool> {
        warn!("no moderation provider configured, skipping moderation check");
        Ok(false)
    }
}

/// OpenAI `POST /moderations`.
pub struct OpenAIModerator {
    model: Option<String>,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIModerator {
    pub fn new(config: &ModerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key: openai_api_key()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            client,
        })
    }
}

#[async_trait]
impl Moderator for OpenAIModerator {
    async fn is_flagged(&self, text: &str) -> Result<bool> {
        let mut body = serde_json::json!({ "input": text });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

        let response = self
            .client
            .post(format!("{}/moderations", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI moderation error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_flagged(&json)
    }
}

/// True when any result in the response is flagged.
fn parse_flagged(json: &serde_json::Value) -> Result<bool> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow!("Invalid moderation response: missing results array"))?;

    Ok(results
        .iter()
        .any(|r| r.get("flagged").and_then(|f| f.as_bool()).unwrap_or(false)))
}

pub fn create_moderator(config: &ModerationConfig) -> Result<Arc<dyn Moderator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(NoModeration)),
        "openai" => Ok(Arc::new(OpenAIModerator::new(config)?)),
        other => bail!("Unknown moderation provider: {}", other),
    }
}
