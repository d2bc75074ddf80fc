//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.
//!
//! rig owns the HTTP transport. This adapter turns our chat messages into a
//! rig request (system text as the preamble, the last turn as the prompt),
//! reads text, usage and stop reason back out, and sorts rig's errors into
//! the typed `LlmError` variants the stage runner retries on.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::costs;
use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};
use crate::error::LlmError;

const PROVIDER: &str = "anthropic";

/// `LlmProvider` over any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// A chat split into rig's request parts.
struct RigPrompt {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

/// System messages become the preamble, the final turn the prompt. In JSON
/// mode the assistant turn is prefilled with `{` so the reply starts inside
/// an object.
fn split_messages(messages: &[ChatMessage], json_mode: bool) -> Result<RigPrompt, LlmError> {
    let mut system_parts = Vec::new();
    let mut turns: Vec<Message> = Vec::with_capacity(messages.len() + 1);

    for message in messages {
        match message.role {
            Role::System => system_parts.push(message.content.clone()),
            Role::User => turns.push(Message::user(message.content.clone())),
            Role::Assistant => turns.push(Message::assistant(message.content.clone())),
        }
    }
    if json_mode {
        turns.push(Message::assistant("{"));
    }

    let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: "request has no user or assistant message".to_string(),
    })?;
    let preamble = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

    Ok(RigPrompt {
        preamble,
        history: turns,
        prompt,
    })
}

/// Stop reason and response id from the provider's raw response.
fn raw_details(raw: &Value) -> (FinishReason, Option<String>) {
    let reason = raw
        .get("stop_reason")
        .or_else(|| raw.get("finish_reason"))
        .and_then(Value::as_str);
    let finish_reason = match reason {
        Some("end_turn" | "stop_sequence" | "stop" | "tool_use") => FinishReason::Stop,
        Some("max_tokens" | "length") => FinishReason::Length,
        _ => FinishReason::Unknown,
    };
    let id = raw.get("id").and_then(Value::as_str).map(str::to_string);
    (finish_reason, id)
}

/// Sort a rig error into the provider error taxonomy.
fn map_completion_error(err: CompletionError) -> LlmError {
    match err {
        CompletionError::ProviderError(body) => provider_error(&body),
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason,
        },
        CompletionError::JsonError(e) => LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("Failed to parse response: {e}"),
        },
        other => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Anthropic error bodies name their type (`rate_limit_error`, ...); some
/// paths only carry the message, so both are matched.
fn provider_error(body: &str) -> LlmError {
    let lowered = body.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    if has(&["authentication_error", "permission_error", "invalid x-api-key"]) {
        LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        }
    } else if has(&["rate_limit_error", "rate limit"]) {
        LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after: None,
        }
    } else if has(&["invalid_request_error", "not_found_error", "request_too_large"]) {
        LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("request rejected: {body}"),
        }
    } else {
        LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: body.to_string(),
        }
    }
}

fn saturating_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync,
    M::Response: Serialize,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        costs::model_cost(&self.model_name)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let RigPrompt {
            preamble,
            history,
            prompt,
        } = split_messages(&request.messages, request.json_mode)?;

        debug!(
            model = %self.model_name,
            history = history.len(),
            json_mode = request.json_mode,
            "Sending completion request"
        );

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(map_completion_error)?;

        let mut content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        if request.json_mode && !content.trim_start().starts_with('{') {
            content.insert(0, '{');
        }

        let raw = serde_json::to_value(&response.raw_response).unwrap_or(Value::Null);
        let (finish_reason, response_id) = raw_details(&raw);

        Ok(CompletionResponse {
            content,
            input_tokens: saturating_u32(response.usage.input_tokens),
            output_tokens: saturating_u32(response.usage.output_tokens),
            finish_reason,
            response_id,
        })
    }
}
