//! Configuration types.
//!
//! Everything the pipeline needs is carried in explicit structs built once
//! at startup; nothing reads the environment at call time.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::RetryPolicy;

/// Per-stage model parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Pipeline configuration, passed into the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Project that receives internal meetings.
    pub internal_project_id: String,
    /// Intake project used whenever client routing cannot be resolved.
    pub intake_project_id: String,
    /// Bound on a single model call.
    pub model_timeout: Duration,
    /// Bound on a single work-item sink call.
    pub sink_timeout: Duration,
    /// Retry policy for retryable stage failures.
    pub retry: RetryPolicy,
    /// Characters of transcript the classifier sees.
    pub classifier_window: usize,
    pub classify: StageParams,
    pub edit: StageParams,
    pub analyze: StageParams,
    pub write: StageParams,
}

impl PipelineConfig {
    /// Config with default tuning for the given projects.
    pub fn new(internal_project_id: impl Into<String>, intake_project_id: impl Into<String>) -> Self {
        Self {
            internal_project_id: internal_project_id.into(),
            intake_project_id: intake_project_id.into(),
            model_timeout: Duration::from_secs(60),
            sink_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            classifier_window: 1500,
            classify: StageParams {
                temperature: 0.0,
                max_tokens: 256,
            },
            edit: StageParams {
                temperature: 0.1,
                max_tokens: 16_384,
            },
            analyze: StageParams {
                temperature: 0.1,
                max_tokens: 2048,
            },
            write: StageParams {
                temperature: 0.3,
                max_tokens: 2048,
            },
        }
    }

    /// Build from environment variables.
    ///
    /// `BRIEF_INTAKE_PROJECT_ID` is required; `BRIEF_INTERNAL_PROJECT_ID`
    /// falls back to the intake project.
    pub fn from_env() -> Result<Self, ConfigError> {
        let intake = require_env("BRIEF_INTAKE_PROJECT_ID")?;
        let internal = std::env::var("BRIEF_INTERNAL_PROJECT_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| intake.clone());

        let mut config = Self::new(internal, intake);
        config.model_timeout = Duration::from_secs(parse_env_or("BRIEF_MODEL_TIMEOUT_SECS", 60u64)?);
        config.sink_timeout = Duration::from_secs(parse_env_or("BRIEF_SINK_TIMEOUT_SECS", 30u64)?);

        let max_attempts: u32 = parse_env_or("BRIEF_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "BRIEF_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }
        config.retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(parse_env_or("BRIEF_BACKOFF_BASE_MS", 500u64)?),
            ..RetryPolicy::default()
        };
        Ok(config)
    }
}

/// Webhook server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Shared secret expected in the `fireflies-webhook-secret` header.
    pub webhook_secret: Option<SecretString>,
    /// Event type that triggers a run.
    pub accepted_event: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5019,
            webhook_secret: None,
            accepted_event: "meeting.completed".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_env_or("BRIEF_PORT", 5019u16)?;
        let webhook_secret = std::env::var("FIREFLIES_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);
        Ok(Self {
            port,
            webhook_secret,
            ..Self::default()
        })
    }
}

/// Read a required, non-empty environment variable.
pub fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional environment variable, using `default` when unset.
pub fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

/// Parse a `Name=value,Name=value` list, preserving order.
pub fn parse_pairs(key: &str, raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, value) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected Name=value, got '{entry}'"),
            })?;
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() || value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("empty name or value in '{entry}'"),
                });
            }
            Ok((name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_given_projects() {
        let config = PipelineConfig::new("internal-1", "intake-1");
        assert_eq!(config.internal_project_id, "internal-1");
        assert_eq!(config.intake_project_id, "intake-1");
        assert_eq!(config.classifier_window, 1500);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn parse_pairs_keeps_order() {
        let pairs = parse_pairs("X", "Acme=111, Globex Corp = 222 ,").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("Acme".to_string(), "111".to_string()),
                ("Globex Corp".to_string(), "222".to_string()),
            ]
        );
    }

    #[test]
    fn parse_pairs_rejects_missing_separator() {
        let err = parse_pairs("BRIEF_COLLABORATORS", "Sarah").unwrap_err();
        assert!(err.to_string().contains("BRIEF_COLLABORATORS"));
        assert!(parse_pairs("X", "=1").is_err());
    }

    #[test]
    fn parse_env_or_default_when_unset() {
        let value: u64 = parse_env_or("MEETING_BRIEF_TEST_SURELY_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }
}
