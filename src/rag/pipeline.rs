//! The RAG pipeline.
//!
//! Each request walks RETRIEVE → PROMPT → GENERATE → POSTPROCESS → RESOLVE,
//! with any stage able to fail. Transient backend failures (embedding or
//! generation timeouts, rate limits) are retried with bounded backoff;
//! everything else surfaces immediately. Dropping the returned future
//! abandons the pipeline at whatever stage it reached; no partial answer is
//! released.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, Result};
use crate::index::EmbeddingsIndex;
use crate::llm::{ChatMessage, GenerateRequest, TextGenerator};
use super::citation::{CitationConfig, CitationResolver};
use super::context_builder::{ContextBuilder, ContextConfig, Passage};
use super::prompt::{self, PromptMode, PromptTemplate};

/// What the caller gets back per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Answer text only.
    Flatten,
    /// Answer text plus the resolved citation id.
    Reference,
    /// Answer text, citation id, and the context that produced it.
    Full,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Flatten
    }
}

/// One conversation turn in a structured request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagMessage {
    pub role: String,
    pub content: String,
    /// When set, this message drives retrieval. Exactly one message per
    /// request may carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl RagMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// A question, bare or as a structured conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RagRequest {
    Question(String),
    Messages(Vec<RagMessage>),
}

impl RagRequest {
    /// The retrieval query: the bare question, or the single message
    /// carrying an explicit `query` field.
    pub fn query(&self) -> Result<&str> {
        match self {
            RagRequest::Question(question) => Ok(question),
            RagRequest::Messages(messages) => {
                let mut queries = messages.iter().filter_map(|m| m.query.as_deref());
                let query = queries.next().ok_or_else(|| {
                    EngineError::Validation("no message carries a query".to_string())
                })?;
                if queries.next().is_some() {
                    return Err(EngineError::Validation(
                        "more than one message carries a query".to_string(),
                    ));
                }
                Ok(query)
            }
        }
    }

    /// Messages passed through verbatim to the prompt (everything except
    /// the query-bearing one).
    fn passthrough(&self) -> Vec<ChatMessage> {
        match self {
            RagRequest::Question(_) => Vec::new(),
            RagRequest::Messages(messages) => messages
                .iter()
                .filter(|m| m.query.is_none())
                .map(|m| ChatMessage::new(m.role.clone(), m.content.clone()))
                .collect(),
        }
    }
}

impl From<&str> for RagRequest {
    fn from(question: &str) -> Self {
        RagRequest::Question(question.to_string())
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagOptions {
    /// Passages to retrieve; defaults to the context config.
    pub k: Option<usize>,
    /// Context budget; defaults to the context config.
    pub max_context_budget: Option<usize>,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Strip a delimited reasoning segment from the raw output.
    #[serde(default)]
    pub strip_think: bool,
    /// Maximum generation length, in backend tokens.
    pub max_length: Option<u32>,
    /// Bypass retrieval with a caller-supplied context.
    #[serde(skip)]
    pub context: Option<Vec<Passage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retries for transient backend failures, per stage.
    pub max_retries: usize,
    /// Base backoff between retries; grows linearly with the attempt.
    pub retry_backoff_ms: u64,
    /// Timeout for one generation call.
    pub generate_timeout_secs: u64,
    /// Answer text when no context could be retrieved.
    pub insufficient_context_message: String,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    /// Markers bounding the reasoning segment for `strip_think`.
    pub think_start: String,
    pub think_end: String,
    #[serde(default)]
    pub template: PromptTemplate,
    #[serde(default)]
    pub citation: CitationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 250,
            generate_timeout_secs: 60,
            insufficient_context_message:
                "I do not have enough information in the indexed content to answer that."
                    .to_string(),
            prompt_mode: PromptMode::default(),
            template: PromptTemplate::default(),
            citation: CitationConfig::default(),
            think_start: "<think>".to_string(),
            think_end: "</think>".to_string(),
        }
    }
}

/// The structured result of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Always an id from the context window that produced this answer.
    pub reference: Option<String>,
    /// The context window itself, in `full` output mode.
    pub context: Option<Vec<Passage>>,
}

/// Pipeline stages, for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Retrieve,
    Prompt,
    Generate,
    Postprocess,
    Resolve,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Retrieve => "retrieve",
            Stage::Prompt => "prompt",
            Stage::Generate => "generate",
            Stage::Postprocess => "postprocess",
            Stage::Resolve => "resolve",
        }
    }
}

pub struct RagPipeline {
    index: Arc<EmbeddingsIndex>,
    generator: Arc<dyn TextGenerator>,
    context_builder: ContextBuilder,
    resolver: CitationResolver,
    config: PipelineConfig,
}

impl RagPipeline {
    pub fn new(
        index: Arc<EmbeddingsIndex>,
        generator: Arc<dyn TextGenerator>,
        context_config: ContextConfig,
        config: PipelineConfig,
    ) -> Result<Self> {
        let resolver = CitationResolver::new(&config.citation)?;
        Ok(Self {
            index,
            generator,
            context_builder: ContextBuilder::new(context_config),
            resolver,
            config,
        })
    }

    pub fn index(&self) -> &Arc<EmbeddingsIndex> {
        &self.index
    }

    /// Run one request through the pipeline.
    pub async fn answer(&self, request: RagRequest, options: RagOptions) -> Result<Answer> {
        let question = request.query()?.to_string();
        tracing::debug!(question = %question, "rag request");

        // RETRIEVE
        let context = match options.context.clone() {
            Some(context) => context,
            None => {
                let k = options.k.unwrap_or(self.context_builder.config().k);
                let budget = options
                    .max_context_budget
                    .unwrap_or(self.context_builder.config().max_budget);
                self.with_retries(Stage::Retrieve, || {
                    self.context_builder.build(&self.index, &question, k, budget)
                })
                .await?
            }
        };

        if context.is_empty() {
            tracing::debug!("empty context, returning insufficient-information answer");
            return Ok(self.finish(
                self.config.insufficient_context_message.clone(),
                None,
                context,
                options.output_mode,
            ));
        }

        // PROMPT
        tracing::debug!(stage = Stage::Prompt.name(), passages = context.len(), "building prompt");
        let messages = prompt::build(
            self.config.prompt_mode,
            &self.config.template,
            &question,
            &context,
            &request.passthrough(),
        );

        // GENERATE
        let mut generate_request = GenerateRequest::new(messages);
        generate_request.max_tokens = options.max_length;
        let raw = self
            .with_retries(Stage::Generate, || {
                self.generate_bounded(generate_request.clone())
            })
            .await?;

        // POSTPROCESS
        let text = if options.strip_think {
            tracing::debug!(stage = Stage::Postprocess.name(), "stripping reasoning segment");
            strip_reasoning(&raw, &self.config.think_start, &self.config.think_end)
        } else {
            raw
        };

        // RESOLVE
        let reference = match options.output_mode {
            OutputMode::Flatten => None,
            OutputMode::Reference | OutputMode::Full => {
                self.with_retries(Stage::Resolve, || {
                    self.resolver.resolve(&self.index, &text, &context)
                })
                .await?
            }
        };

        Ok(self.finish(text, reference, context, options.output_mode))
    }

    fn finish(
        &self,
        text: String,
        reference: Option<String>,
        context: Vec<Passage>,
        mode: OutputMode,
    ) -> Answer {
        match mode {
            OutputMode::Flatten => Answer {
                text,
                reference: None,
                context: None,
            },
            OutputMode::Reference => Answer {
                text,
                reference,
                context: None,
            },
            OutputMode::Full => Answer {
                text,
                reference,
                context: Some(context),
            },
        }
    }

    async fn generate_bounded(&self, request: GenerateRequest) -> Result<String> {
        let timeout = Duration::from_secs(self.config.generate_timeout_secs);
        match tokio::time::timeout(timeout, self.generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::TransientBackend(format!(
                "generation timed out after {}s",
                self.config.generate_timeout_secs
            ))),
        }
    }

    async fn with_retries<T, F, Fut>(&self, stage: Stage, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        stage = stage.name(),
                        attempt,
                        max = self.config.max_retries,
                        "transient failure, retrying: {err}"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
                Err(err) => {
                    tracing::error!(stage = stage.name(), "stage failed: {err}");
                    return Err(err);
                }
            }
        }
    }
}

/// Remove every complete `start … end` segment from `text`.
///
/// Content outside the delimited spans is preserved byte for byte; an
/// unterminated start marker leaves the text untouched from that point on.
pub fn strip_reasoning(text: &str, start: &str, end: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(start) {
        let after_open = open + start.len();
        match rest[after_open..].find(end) {
            Some(close) => {
                out.push_str(&rest[..open]);
                rest = &rest[after_open + close + end.len()..];
            }
            None => break,
        }
    }

    out.push_str(rest);
    out
}
