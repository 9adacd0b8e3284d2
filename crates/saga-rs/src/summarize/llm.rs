//! Chat-completions-backed summarizer.
//!
//! Speaks the OpenRouter-style chat completions wire format over `reqwest`.
//! HTTP and network failures map onto the retry taxonomy: 429/5xx and
//! transport errors are transient, anything else the endpoint rejects is
//! malformed, and empty or over-long completions are malformed too.

use crate::error::SummarizeError;
use crate::summarize::{SummarizeFuture, SummarizeRequest, Summarizer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default chat completions endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Instructs the model to condense one narrative segment. The merge rule
/// keeps revisit summaries standalone: when a prior summary is provided, the
/// output must replace it, not append to it.
const CONDENSE_PROMPT: &str = "\
You condense one segment of an interactive story into a compact memory.

Rules:
- Record only what happened in the segment: places, named characters, \
  decisions, consequences, items gained or lost.
- Keep names exactly as written. Do not invent people, places, or events.
- Write flowing past-tense prose, not a bullet list.
- Be brief — this memory replaces the full scene.
- If a prior memory for the same place is provided, merge the new events \
  into it and return one standalone memory that supersedes it.";

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct WireResponse {
    choices: Option<Vec<WireChoice>>,
    error: Option<WireError>,
}

#[derive(Deserialize, Debug)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize, Debug)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireError {
    message: String,
}

// ── Summarizer ─────────────────────────────────────────────────────

/// LLM-backed condenser for production sessions.
pub struct LlmSummarizer {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl LlmSummarizer {
    /// Build a summarizer against the default endpoint.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, SummarizeError> {
        let client = reqwest::Client::builder()
            .user_agent("saga-rs/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| SummarizeError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
            max_tokens: 1024,
        })
    }

    /// Override the endpoint (self-hosted gateways, test servers).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the per-call completion token bound.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Assemble the user-turn content: prior memory (if any) then the segment.
    fn build_user_content(req: &SummarizeRequest<'_>) -> String {
        let mut content = String::new();
        content.push_str(&format!("Place: {}\n\n", req.hints.container_name));
        if let Some(prior) = req.hints.prior_summary {
            content.push_str("=== PRIOR MEMORY ===\n");
            content.push_str(prior);
            content.push_str("\n\n=== NEW SEGMENT ===\n");
        }
        content.push_str(req.segment_text);
        content
    }

    async fn call(&self, req: SummarizeRequest<'_>) -> Result<String, SummarizeError> {
        let body = WireRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: CONDENSE_PROMPT.to_string(),
                },
                WireMessage {
                    role: "user",
                    content: Self::build_user_content(&req),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.3,
        };

        debug!(
            "summarizer request: model={}, segment={} chars, prior={}",
            self.model,
            req.segment_text.len(),
            req.hints.prior_summary.is_some(),
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizeError::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SummarizeError::Transient(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let msg = format!("HTTP {status}: {text}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(SummarizeError::Transient(msg))
            } else {
                Err(SummarizeError::Malformed(msg))
            };
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| SummarizeError::Malformed(format!("unparseable response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(SummarizeError::Malformed(format!("API error: {}", err.message)));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(SummarizeError::Malformed("empty completion".into()));
        }
        if content.chars().count() > req.max_chars {
            return Err(SummarizeError::Malformed(format!(
                "completion of {} chars exceeds bound of {}",
                content.chars().count(),
                req.max_chars,
            )));
        }
        Ok(content)
    }
}

impl Summarizer for LlmSummarizer {
    fn summarize<'a>(&'a self, req: SummarizeRequest<'a>) -> SummarizeFuture<'a> {
        Box::pin(self.call(req))
    }
}
