//! Stage runner — executes one AI transformation stage.
//!
//! A stage is one model call: instruction template as the system message,
//! payload as the user message. Classify and Analyze must return a JSON
//! object of a fixed shape; Edit and Write return free text. Every failure
//! comes back as a typed `StageFailure`, and only timeouts, rate limits and
//! upstream 5xx-style failures are retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::IgnoredAny;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, StageParams};
use crate::error::StageFailure;
use crate::llm::{ChatMessage, CompletionRequest, FinishReason, LlmProvider, RetryPolicy};
use crate::pipeline::prompts;
use crate::pipeline::types::{
    ActionItem, AnalysisResult, ClassificationResult, CleanedTranscript, Scope, StageId,
    TokenUsage, Transcript,
};

/// Confidence recorded when the classifier omits one.
const UNSTATED_CONFIDENCE: f32 = 0.5;

/// Raw model output logged at debug level is cut to this many characters.
const DEBUG_PREVIEW_CHARS: usize = 500;

/// Edit output may not exceed `EDIT_GROWTH_FACTOR * len(raw) + EDIT_GROWTH_SLACK` bytes.
const EDIT_GROWTH_FACTOR: usize = 2;
const EDIT_GROWTH_SLACK: usize = 256;

/// Names the model uses when it has no real value.
const PLACEHOLDER_NAMES: &[&str] = &["n/a", "na", "none", "null", "unknown", "-", "tbd"];

/// Validated output of a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Classification(ClassificationResult),
    Text(String),
    Analysis(AnalysisResult),
}

/// A stage value plus what it cost to obtain.
///
/// Failures carry the same bookkeeping so tokens spent on failed attempts
/// still reach the run report.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRun<T> {
    pub value: T,
    pub usage: TokenUsage,
    pub attempts: u32,
}

impl<T> StageRun<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> StageRun<U> {
        StageRun {
            value: f(self.value),
            usage: self.usage,
            attempts: self.attempts,
        }
    }
}

/// Outcome of one stage: the value or the failure, both with their usage.
pub type StageResult<T> = Result<StageRun<T>, StageRun<StageFailure>>;

/// Runs stages against a model provider.
///
/// Holds no mutable state; one runner can serve concurrent pipeline runs.
pub struct StageRunner {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    timeout: Duration,
    classifier_window: usize,
    params: [StageParams; 4],
}

impl StageRunner {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &PipelineConfig) -> Self {
        Self {
            llm,
            retry: config.retry,
            timeout: config.model_timeout,
            classifier_window: config.classifier_window,
            params: [config.classify, config.edit, config.analyze, config.write],
        }
    }

    /// Run one stage: its instruction template as the system message,
    /// `payload` as the user message.
    pub async fn run_stage(&self, stage: StageId, payload: &str) -> StageResult<StageOutput> {
        let params = self.params[usize::from(stage.index())];
        let instructions = prompts::instructions_for(stage);
        let mut usage = TokenUsage::default();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(stage = %stage, attempt, "Calling model");

            let request = CompletionRequest::new(vec![
                ChatMessage::system(instructions),
                ChatMessage::user(payload),
            ])
            .with_temperature(params.temperature)
            .with_max_tokens(params.max_tokens)
            .with_json_mode(stage.expects_json());

            let failure = match tokio::time::timeout(self.timeout, self.llm.complete(request)).await
            {
                Err(_) => StageFailure::Timeout(self.timeout),
                Ok(Err(e)) => StageFailure::from(e),
                Ok(Ok(response)) => {
                    usage.add(TokenUsage {
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                    });
                    debug!(
                        stage = %stage,
                        response_id = response.response_id.as_deref().unwrap_or("-"),
                        finish = ?response.finish_reason,
                        raw = %preview(&response.content),
                        "Model output"
                    );
                    let validated = if response.finish_reason == FinishReason::Length {
                        Err(StageFailure::Truncated)
                    } else {
                        validate_output(stage, payload, &response.content)
                    };
                    match validated {
                        Ok(output) => {
                            info!(
                                stage = %stage,
                                attempts = attempt,
                                tokens = usage.total(),
                                "Stage complete"
                            );
                            return Ok(StageRun {
                                value: output,
                                usage,
                                attempts: attempt,
                            });
                        }
                        Err(failure) => failure,
                    }
                }
            };

            if !failure.is_retryable() || !self.retry.allows_retry_after(attempt) {
                warn!(
                    stage = %stage,
                    attempts = attempt,
                    kind = failure.kind(),
                    error = %failure,
                    "Stage failed"
                );
                return Err(StageRun {
                    value: failure,
                    usage,
                    attempts: attempt,
                });
            }

            let retry_after = match &failure {
                StageFailure::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.retry.delay_for(attempt, retry_after);
            warn!(
                stage = %stage,
                attempt,
                kind = failure.kind(),
                delay_ms = delay.as_millis() as u64,
                "Retryable stage failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Stage 0: classify the meeting from the opening of the raw transcript.
    pub async fn classify(&self, transcript: &Transcript) -> StageResult<ClassificationResult> {
        let payload = classify_payload(transcript, self.classifier_window);
        let run = self.run_stage(StageId::Classify, &payload).await?;
        expect_variant(run, |output| match output {
            StageOutput::Classification(c) => Some(c),
            _ => None,
        })
    }

    /// Stage 1: clean the raw transcript.
    pub async fn edit(&self, transcript: &Transcript) -> StageResult<CleanedTranscript> {
        let run = self.run_stage(StageId::Edit, &transcript.raw_text).await?;
        expect_variant(run, |output| match output {
            StageOutput::Text(t) => Some(t),
            _ => None,
        })
        .map(|run| run.map(|clean_text| CleanedTranscript { clean_text }))
    }

    /// Stage 2: extract decisions, action items and open questions.
    pub async fn analyze(&self, cleaned: &CleanedTranscript) -> StageResult<AnalysisResult> {
        let run = self.run_stage(StageId::Analyze, &cleaned.clean_text).await?;
        expect_variant(run, |output| match output {
            StageOutput::Analysis(a) => Some(a),
            _ => None,
        })
    }

    /// Stage 3: write the brief body from the analysis alone.
    pub async fn write(&self, analysis: &AnalysisResult) -> StageResult<String> {
        let payload = serde_json::to_string_pretty(analysis).map_err(|e| StageRun {
            value: StageFailure::MalformedOutput(format!("analysis not serializable: {e}")),
            usage: TokenUsage::default(),
            attempts: 0,
        })?;
        let run = self.run_stage(StageId::Write, &payload).await?;
        expect_variant(run, |output| match output {
            StageOutput::Text(t) => Some(t),
            _ => None,
        })
    }
}

fn expect_variant<T>(
    run: StageRun<StageOutput>,
    pick: impl FnOnce(StageOutput) -> Option<T>,
) -> StageResult<T> {
    let StageRun {
        value,
        usage,
        attempts,
    } = run;
    match pick(value) {
        Some(value) => Ok(StageRun {
            value,
            usage,
            attempts,
        }),
        None => Err(StageRun {
            value: StageFailure::MalformedOutput("stage returned the wrong output kind".into()),
            usage,
            attempts,
        }),
    }
}

// ── Payload construction ────────────────────────────────────────────

/// Header plus the first `window` characters of the transcript.
fn classify_payload(transcript: &Transcript, window: usize) -> String {
    let mut payload = String::with_capacity(window + 256);
    if !transcript.title.trim().is_empty() {
        payload.push_str(&format!("Title: {}\n", transcript.title.trim()));
    }
    if !transcript.participants.is_empty() {
        payload.push_str(&format!(
            "Participants: {}\n",
            transcript.participants.join(", ")
        ));
    }
    payload.push_str("Transcript:\n");
    payload.extend(transcript.raw_text.chars().take(window));
    payload
}

fn preview(text: &str) -> String {
    text.chars().take(DEBUG_PREVIEW_CHARS).collect()
}

// ── Output validation ───────────────────────────────────────────────

/// Validate raw model output against the stage's expected shape.
fn validate_output(stage: StageId, payload: &str, raw: &str) -> Result<StageOutput, StageFailure> {
    if raw.trim().is_empty() {
        return Err(StageFailure::EmptyOutput);
    }

    match stage {
        StageId::Classify => parse_classification(raw).map(StageOutput::Classification),
        StageId::Analyze => parse_analysis(raw).map(StageOutput::Analysis),
        StageId::Edit => {
            let clean = raw.trim();
            let limit = payload.len() * EDIT_GROWTH_FACTOR + EDIT_GROWTH_SLACK;
            if clean.len() > limit {
                return Err(StageFailure::MalformedOutput(format!(
                    "edited transcript grew to {} bytes from {}",
                    clean.len(),
                    payload.len()
                )));
            }
            Ok(StageOutput::Text(clean.to_string()))
        }
        StageId::Write => Ok(StageOutput::Text(raw.trim().to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ClassificationWire {
    #[serde(alias = "meeting_type")]
    scope: String,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct AnalysisWire {
    #[serde(alias = "key_decisions")]
    decisions: Vec<String>,
    action_items: Vec<ActionItemWire>,
    #[serde(alias = "unanswered_questions")]
    open_questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ActionItemWire {
    #[serde(alias = "task")]
    description: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
}

fn parse_classification(raw: &str) -> Result<ClassificationResult, StageFailure> {
    let wire: ClassificationWire = serde_json::from_str(extract_json_object(raw))
        .map_err(|e| StageFailure::MalformedOutput(format!("classification: {e}")))?;

    let scope = match wire.scope.trim().to_ascii_lowercase().as_str() {
        "internal" => Scope::Internal,
        "external" => Scope::External,
        other => {
            return Err(StageFailure::MalformedOutput(format!(
                "classification: unknown scope '{other}'"
            )));
        }
    };

    let client_name = match scope {
        Scope::Internal => None,
        Scope::External => wire.client_name.as_deref().and_then(meaningful_name),
    };
    let confidence = wire
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(UNSTATED_CONFIDENCE)
        .clamp(0.0, 1.0);

    Ok(ClassificationResult {
        scope,
        client_name,
        confidence,
    })
}

fn parse_analysis(raw: &str) -> Result<AnalysisResult, StageFailure> {
    let wire: AnalysisWire = serde_json::from_str(extract_json_object(raw))
        .map_err(|e| StageFailure::MalformedOutput(format!("analysis: {e}")))?;

    let action_items = wire
        .action_items
        .into_iter()
        .filter_map(|item| {
            let description = item.description.trim();
            if description.is_empty() {
                return None;
            }
            Some(ActionItem {
                description: description.to_string(),
                owner: item.owner.as_deref().and_then(meaningful_name),
                due_date: item.due_date.as_deref().and_then(parse_due_date),
            })
        })
        .collect();

    Ok(AnalysisResult {
        decisions: non_blank(wire.decisions),
        action_items,
        open_questions: non_blank(wire.open_questions),
    })
}

fn non_blank(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trimmed name, or `None` for blanks and placeholders like "N/A".
fn meaningful_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if trimmed.is_empty() || PLACEHOLDER_NAMES.contains(&lowered.as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Extract the first JSON object from LLM output.
///
/// Handles markdown fences and prose before or after the object; the
/// object ends where the JSON value ends, not at the last `}` in the text.
fn extract_json_object(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(start) = body.find("```json") {
        let after = &body[start + 7..];
        if let Some(end) = after.find("```") {
            body = after[..end].trim();
        }
    }

    let Some(start) = body.find('{') else {
        return body;
    };
    let candidate = &body[start..];
    let mut values = serde_json::Deserializer::from_str(candidate).into_iter::<IgnoredAny>();
    if let Some(Ok(_)) = values.next() {
        return &candidate[..values.byte_offset()];
    }

    // Not a complete value from the first brace: fall back to the widest span.
    match body.rfind('}') {
        Some(end) if end > start => &body[start..=end],
        _ => body,
    }
}
