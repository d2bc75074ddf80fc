//! Error types for the meeting brief pipeline.

use std::time::Duration;

use crate::pipeline::types::StageId;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Model service errors, as reported by an `LlmProvider`.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transcript source errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Transcript not found for meeting {meeting_id}")]
    NotFound { meeting_id: String },

    #[error("Transient transcript fetch failure: {reason}")]
    TransientError { reason: String },
}

/// Failure of a single AI transformation stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageFailure {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("model service rejected credentials")]
    AuthError,

    #[error("model service failed: {0}")]
    Upstream(String),

    #[error("malformed stage output: {0}")]
    MalformedOutput(String),

    #[error("stage produced empty output")]
    EmptyOutput,

    #[error("model output was cut off at the token limit")]
    Truncated,
}

impl StageFailure {
    /// Whether another attempt at the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Upstream(_)
        )
    }

    /// Short label for logging and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthError => "auth_error",
            Self::Upstream(_) => "upstream",
            Self::MalformedOutput(_) => "malformed_output",
            Self::EmptyOutput => "empty_output",
            Self::Truncated => "truncated",
        }
    }
}

impl From<LlmError> for StageFailure {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout { timeout, .. } => Self::Timeout(timeout),
            LlmError::RateLimited { retry_after, .. } => Self::RateLimited { retry_after },
            LlmError::AuthFailed { .. } => Self::AuthError,
            LlmError::InvalidResponse { reason, .. } => Self::MalformedOutput(reason),
            LlmError::Json(e) => Self::MalformedOutput(e.to_string()),
            LlmError::RequestFailed { provider, reason } => {
                Self::Upstream(format!("{provider}: {reason}"))
            }
        }
    }
}

/// Project directory lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Project directory request failed: {0}")]
    Request(String),
}

/// Work-item sink errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Work-item sink request failed: {0}")]
    Request(String),

    #[error("Work-item sink call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Work-item sink returned an unexpected response: {0}")]
    InvalidResponse(String),
}

/// Terminal dispatch failure. Sub-item failures never surface here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchFailure {
    #[error("Top-level item creation failed in project {project_id}: {source}")]
    TopLevelCreateFailed {
        project_id: String,
        #[source]
        source: SinkError,
    },
}

/// Terminal error of one pipeline run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Stage {stage} failed: {failure}")]
    Stage { stage: StageId, failure: StageFailure },

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchFailure),
}

impl PipelineError {
    /// The stage a failure is attributed to, if it came from a stage.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(StageFailure::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(StageFailure::RateLimited { retry_after: None }.is_retryable());
        assert!(StageFailure::Upstream("502".into()).is_retryable());
        assert!(!StageFailure::AuthError.is_retryable());
        assert!(!StageFailure::MalformedOutput("x".into()).is_retryable());
        assert!(!StageFailure::EmptyOutput.is_retryable());
        assert!(!StageFailure::Truncated.is_retryable());
    }

    #[test]
    fn llm_errors_map_to_distinct_stage_failures() {
        let auth: StageFailure = LlmError::AuthFailed {
            provider: "anthropic".into(),
        }
        .into();
        assert_eq!(auth, StageFailure::AuthError);

        let limited: StageFailure = LlmError::RateLimited {
            provider: "anthropic".into(),
            retry_after: Some(Duration::from_secs(2)),
        }
        .into();
        assert_eq!(
            limited,
            StageFailure::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );

        let invalid: StageFailure = LlmError::InvalidResponse {
            provider: "anthropic".into(),
            reason: "no content".into(),
        }
        .into();
        assert_eq!(invalid.kind(), "malformed_output");
    }

    #[test]
    fn stage_error_names_the_stage() {
        let err = PipelineError::Stage {
            stage: StageId::Analyze,
            failure: StageFailure::EmptyOutput,
        };
        assert_eq!(err.stage(), Some(StageId::Analyze));
        assert!(err.to_string().contains("analyze"));
    }
}
