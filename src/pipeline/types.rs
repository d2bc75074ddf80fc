//! Shared types for the transcript-to-brief pipeline.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Inbound ─────────────────────────────────────────────────────────

/// A "transcription completed" event, already authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingEvent {
    pub meeting_id: String,
    /// Title carried by the event, if the sender provided one.
    #[serde(default)]
    pub title: String,
}

impl MeetingEvent {
    pub fn new(meeting_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            title: title.into(),
        }
    }
}

/// Transcript as returned by the transcript source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub raw_text: String,
    pub participants: Vec<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

// ── Stages ──────────────────────────────────────────────────────────

/// One of the four fixed transformation stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Classify,
    Edit,
    Analyze,
    Write,
}

impl StageId {
    pub const ALL: [StageId; 4] = [Self::Classify, Self::Edit, Self::Analyze, Self::Write];

    /// Position in the pipeline, 0 through 3.
    pub fn index(self) -> u8 {
        match self {
            Self::Classify => 0,
            Self::Edit => 1,
            Self::Analyze => 2,
            Self::Write => 3,
        }
    }

    /// Stages whose output must be a JSON object of a fixed shape.
    pub fn expects_json(self) -> bool {
        matches!(self, Self::Classify | Self::Analyze)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Edit => "edit",
            Self::Analyze => "analyze",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.index())
    }
}

/// Whether a meeting was held with a client or only within the team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Internal,
    External,
}

/// Stage 0 output. Never absent: a failed classification becomes
/// [`ClassificationResult::fallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub scope: Scope,
    pub client_name: Option<String>,
    /// Model-reported confidence in `[0.0, 1.0]`; `0.0` for the fallback.
    pub confidence: f32,
}

impl ClassificationResult {
    /// Used when the model cannot decide or the stage fails.
    pub fn fallback() -> Self {
        Self {
            scope: Scope::External,
            client_name: None,
            confidence: 0.0,
        }
    }

    pub fn internal(confidence: f32) -> Self {
        Self {
            scope: Scope::Internal,
            client_name: None,
            confidence,
        }
    }

    pub fn external(client_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            scope: Scope::External,
            client_name: Some(client_name.into()),
            confidence,
        }
    }
}

/// Stage 1 output. Replaces the raw transcript for every later stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedTranscript {
    pub clean_text: String,
}

/// One task extracted from the meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub description: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl ActionItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            owner: None,
            due_date: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// Stage 2 output. `action_items` are in first-mention order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub decisions: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub open_questions: Vec<String>,
}

impl AnalysisResult {
    /// Nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty() && self.action_items.is_empty() && self.open_questions.is_empty()
    }
}

/// Stage 3 output: the human-facing brief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brief {
    pub title: String,
    pub body: String,
}

impl Brief {
    /// Title shown on the top-level work item.
    pub fn title_for(meeting_title: &str) -> String {
        let trimmed = meeting_title.trim();
        if trimmed.is_empty() {
            "Meeting Summary: Untitled Meeting".to_string()
        } else {
            format!("Meeting Summary: {trimmed}")
        }
    }

    /// Brief used when the analysis found nothing to report.
    pub fn no_content(meeting_title: &str) -> Self {
        Self {
            title: Self::title_for(meeting_title),
            body: "## Meeting Summary\n\n\
                   This meeting did not contain explicit key decisions, action items, \
                   or unanswered questions that could be automatically extracted.\n\n\
                   Please review the full transcript for context or if you were \
                   expecting specific outcomes."
                .to_string(),
        }
    }
}

// ── Routing and dispatch ────────────────────────────────────────────

/// Where the brief lands. Derived per run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub target_project_id: String,
    pub is_fallback: bool,
}

/// A sub-item that could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSubitem {
    /// Position of the action item in the analysis.
    pub index: usize,
    pub description: String,
    pub reason: String,
}

/// Terminal artifact of a dispatch.
///
/// A non-empty `failed_subitems` is a partial dispatch: still a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub created_item_id: String,
    pub created_item_url: String,
    pub subitem_ids: Vec<String>,
    pub failed_subitems: Vec<FailedSubitem>,
}

impl DispatchResult {
    pub fn is_partial(&self) -> bool {
        !self.failed_subitems.is_empty()
    }
}

// ── Run reporting ───────────────────────────────────────────────────

/// Orchestrator states. Transitions are linear; `Failed` is reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Fetching,
    Classifying,
    Editing,
    Analyzing,
    Writing,
    Routing,
    Dispatching,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Successor on the happy path. Terminal states have none.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Fetching => Some(Self::Classifying),
            Self::Classifying => Some(Self::Editing),
            Self::Editing => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Writing),
            Self::Writing => Some(Self::Routing),
            Self::Routing => Some(Self::Dispatching),
            Self::Dispatching => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// The stage executed in this state, if any.
    pub fn stage(self) -> Option<StageId> {
        match self {
            Self::Classifying => Some(StageId::Classify),
            Self::Editing => Some(StageId::Edit),
            Self::Analyzing => Some(StageId::Analyze),
            Self::Writing => Some(StageId::Write),
            _ => None,
        }
    }
}

/// Final status of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    SuccessWithWarnings,
}

/// Token usage of one stage call (all attempts).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub meeting_id: String,
    pub status: RunStatus,
    pub classification: ClassificationResult,
    /// Classification failed and the fallback was used.
    pub classification_degraded: bool,
    pub routing: RoutingDecision,
    pub brief: Brief,
    pub dispatch: DispatchResult,
    /// Why the raw transcript could not be attached, if it could not.
    pub attachment_warning: Option<String>,
    /// States visited, in order, ending with `Done`.
    pub transitions: Vec<PipelineState>,
    pub usage: TokenUsage,
    pub estimated_cost: Decimal,
}

impl RunReport {
    /// Warnings surfaced to the caller alongside a success.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.classification_degraded {
            warnings.push("classification failed; routed with fallback classification".to_string());
        }
        for failed in &self.dispatch.failed_subitems {
            warnings.push(format!(
                "sub-item #{} '{}' not created: {}",
                failed.index + 1,
                failed.description,
                failed.reason
            ));
        }
        warnings.extend(self.attachment_warning.iter().cloned());
        warnings
    }

    /// The compact result handed back to the trigger.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.status,
            item_url: self.dispatch.created_item_url.clone(),
            failed_subitem_count: self.dispatch.failed_subitems.len(),
        }
    }
}

/// Outbound result: `{status, item_url, failed_subitem_count}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub item_url: String,
    pub failed_subitem_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_states_reach_done() {
        let mut state = PipelineState::Fetching;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            visited.push(next);
            state = next;
        }
        assert_eq!(visited.len(), 8);
        assert_eq!(state, PipelineState::Done);
        assert!(!visited.contains(&PipelineState::Failed));
    }

    #[test]
    fn stage_states_map_to_stage_ids() {
        assert_eq!(PipelineState::Classifying.stage(), Some(StageId::Classify));
        assert_eq!(PipelineState::Writing.stage(), Some(StageId::Write));
        assert_eq!(PipelineState::Routing.stage(), None);
        let indices: Vec<u8> = StageId::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn stage_display_names_label_and_index() {
        assert_eq!(StageId::Analyze.to_string(), "analyze (2)");
        assert!(StageId::Classify.expects_json());
        assert!(!StageId::Write.expects_json());
    }

    #[test]
    fn fallback_classification_is_external_without_client() {
        let fallback = ClassificationResult::fallback();
        assert_eq!(fallback.scope, Scope::External);
        assert!(fallback.client_name.is_none());
    }

    #[test]
    fn brief_title_defaults_for_blank_meeting() {
        assert_eq!(Brief::title_for("  "), "Meeting Summary: Untitled Meeting");
        assert_eq!(Brief::title_for("Acme kickoff"), "Meeting Summary: Acme kickoff");
        assert!(Brief::no_content("x").body.contains("did not contain"));
    }

    #[test]
    fn analysis_emptiness() {
        assert!(AnalysisResult::default().is_empty());
        let analysis = AnalysisResult {
            open_questions: vec!["Budget?".into()],
            ..Default::default()
        };
        assert!(!analysis.is_empty());
    }

    #[test]
    fn scope_serializes_lowercase() {
        let json = serde_json::to_value(ClassificationResult::external("Acme", 0.9)).unwrap();
        assert_eq!(json["scope"], "external");
        assert_eq!(json["client_name"], "Acme");
    }
}
