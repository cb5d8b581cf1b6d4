//! End-to-end answer pipeline.
//!
//! ```text
//! validate → moderate → rank_and_pack → complete
//! ```
//!
//! A question whose context comes back empty is still answered; the
//! answer carries `context_empty = true` so callers can tell.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use wikiqa_core::models::Usage;

use crate::active::ActiveDataset;
use crate::completion::{create_completion_provider, CompletionProvider, CompletionRequest, DEFAULT_SYSTEM_PROMPT};
use crate::config::Config;
use crate::dataset::{ensure_servable, load_dataset};
use crate::embedding::create_provider;
use crate::error::{AskError, Rejection};
use crate::moderation::{create_moderator, Moderator};
use crate::retriever::Retriever;
use crate::tokenizer::create_tokenizer;

/// One question. Unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub context_budget: Option<usize>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub context: String,
    pub dataset_id: String,
    pub embedding_usage: Usage,
    pub completion_usage: Usage,
    pub stop_reason: Option<String>,
    pub context_empty: bool,
}

pub struct Assistant {
    retriever: Arc<Retriever>,
    moderator: Arc<dyn Moderator>,
    completion: Arc<dyn CompletionProvider>,
    system_prompt: String,
    default_context_budget: usize,
    default_max_output_tokens: u32,
}

impl Assistant {
    pub fn new(
        retriever: Arc<Retriever>,
        moderator: Arc<dyn Moderator>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            retriever,
            moderator,
            completion,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_context_budget: 4096,
            default_max_output_tokens: 250,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_defaults(mut self, context_budget: usize, max_output_tokens: u32) -> Self {
        self.default_context_budget = context_budget;
        self.default_max_output_tokens = max_output_tokens;
        self
    }

    /// Wire providers, tokenizer and the active dataset from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tokenizer = create_tokenizer(&config.chunking.tokenizer)?;
        let embedder = create_provider(&config.embedding)?;
        let moderator = create_moderator(&config.moderation)?;
        let completion = create_completion_provider(&config.completion)?;

        let id = config
            .dataset
            .active
            .as_deref()
            .context("dataset.active must name the dataset to serve")?;
        let dataset = load_dataset(&config.dataset.root, id)
            .with_context(|| format!("Failed to load dataset '{}'", id))?;
        ensure_servable(&dataset, tokenizer.as_ref())
            .with_context(|| format!("Dataset '{}' cannot be served", id))?;
        info!(dataset = id, passages = dataset.passages.len(), "serving dataset");

        let retriever = Arc::new(Retriever::new(
            ActiveDataset::new(dataset),
            tokenizer,
            embedder,
            config.retrieval.max_question_tokens,
        ));

        let mut assistant = Assistant::new(retriever, moderator, completion).with_defaults(
            config.retrieval.context_budget,
            config.completion.max_output_tokens,
        );
        if let Some(prompt) = &config.completion.system_prompt {
            assistant = assistant.with_system_prompt(prompt.clone());
        }
        Ok(assistant)
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// Check the request fields that do not need any provider.
    fn check_request(&self, request: &AskRequest) -> Result<(usize, u32), Rejection> {
        let budget = request.context_budget.unwrap_or(self.default_context_budget);
        let max_output = request
            .max_output_tokens
            .unwrap_or(self.default_max_output_tokens);
        if max_output == 0 {
            return Err(Rejection::InvalidRequest(
                "max_output_tokens must be > 0".to_string(),
            ));
        }
        if let Some(username) = &request.username {
            if username.trim().is_empty() {
                return Err(Rejection::InvalidRequest(
                    "username must not be blank".to_string(),
                ));
            }
        }
        Ok((budget, max_output))
    }

    pub async fn answer(&self, request: &AskRequest) -> Result<Answer, AskError> {
        let (budget, max_output) = self.check_request(request)?;
        let question = self.retriever.validate_question(&request.question)?;

        let flagged = self.moderator.is_flagged(&question).await.map_err(|e| {
            error!(error = %format!("{:#}", e), "moderation failed");
            AskError::Moderation(e)
        })?;
        if flagged {
            warn!("question flagged by moderation");
            return Err(Rejection::Flagged.into());
        }

        let retrieved = self.retriever.rank_and_pack(&question, budget).await?;
        let context_empty = retrieved.is_empty();
        if context_empty {
            warn!(dataset = %retrieved.dataset_id, "answering without context");
        }

        let completion_request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            context: retrieved.context.clone(),
            question,
            username: request.username.as_ref().map(|u| u.trim().to_string()),
            max_output_tokens: max_output,
        };
        let completion = self
            .completion
            .complete(&completion_request)
            .await
            .map_err(|e| {
                error!(error = %format!("{:#}", e), "completion failed");
                AskError::Completion(e)
            })?;

        info!(
            dataset = %retrieved.dataset_id,
            passages = retrieved.passages.len(),
            context_tokens = retrieved.tokens_used,
            completion_tokens = completion.usage.total_tokens,
            "answered question"
        );

        Ok(Answer {
            answer: completion.text.trim().to_string(),
            context: retrieved.context,
            dataset_id: retrieved.dataset_id,
            embedding_usage: retrieved.usage,
            completion_usage: completion.usage,
            stop_reason: completion.stop_reason,
            context_empty,
        })
    }
}
