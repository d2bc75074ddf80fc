//! Fireflies.ai transcript source (GraphQL).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use super::TranscriptSource;
use crate::error::{ConfigError, FetchError};
use crate::pipeline::types::Transcript;

const FIREFLIES_API_URL: &str = "https://api.fireflies.ai/graphql";

const TRANSCRIPT_QUERY: &str = "\
query GetTranscript($id: String!) {
  transcript(id: $id) {
    title
    duration
    participants
    sentences {
      speaker_name
      text
    }
  }
}";

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<TranscriptData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct TranscriptData {
    transcript: Option<TranscriptWire>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptWire {
    title: Option<String>,
    /// Minutes.
    duration: Option<f64>,
    #[serde(default)]
    participants: Option<Vec<String>>,
    #[serde(default)]
    sentences: Option<Vec<SentenceWire>>,
}

#[derive(Debug, Deserialize)]
struct SentenceWire {
    speaker_name: Option<String>,
    #[serde(default)]
    text: String,
}

/// Fireflies GraphQL client.
pub struct FirefliesSource {
    client: reqwest::Client,
    api_key: SecretString,
    api_url: String,
}

impl FirefliesSource {
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "FIREFLIES_API_KEY".into(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            api_url: FIREFLIES_API_URL.to_string(),
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[async_trait]
impl TranscriptSource for FirefliesSource {
    async fn fetch(&self, meeting_id: &str) -> Result<Transcript, FetchError> {
        info!(meeting_id = %meeting_id, "Fetching transcript from Fireflies");

        let body = serde_json::json!({
            "query": TRANSCRIPT_QUERY,
            "variables": { "id": meeting_id },
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::TransientError {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                meeting_id: meeting_id.to_string(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(meeting_id = %meeting_id, status = %status, "Fireflies request failed");
            return Err(FetchError::TransientError {
                reason: format!("{status}: {text}"),
            });
        }

        let parsed: GraphqlResponse =
            response
                .json()
                .await
                .map_err(|e| FetchError::TransientError {
                    reason: format!("invalid GraphQL response: {e}"),
                })?;

        if !parsed.errors.is_empty() {
            let messages: Vec<&str> = parsed.errors.iter().map(|e| e.message.as_str()).collect();
            warn!(meeting_id = %meeting_id, errors = ?messages, "Fireflies returned GraphQL errors");
        }

        let wire = parsed.data.and_then(|d| d.transcript);
        let transcript = wire.and_then(assemble_transcript).ok_or_else(|| {
            warn!(meeting_id = %meeting_id, "No transcript content for meeting");
            FetchError::NotFound {
                meeting_id: meeting_id.to_string(),
            }
        })?;

        info!(
            meeting_id = %meeting_id,
            title = %transcript.title,
            participants = transcript.participants.len(),
            chars = transcript.raw_text.len(),
            "Fetched transcript"
        );
        Ok(transcript)
    }
}

/// Build a transcript from the wire shape. `None` when there are no sentences.
fn assemble_transcript(wire: TranscriptWire) -> Option<Transcript> {
    let sentences = wire.sentences.unwrap_or_default();
    if sentences.is_empty() {
        return None;
    }

    let mut speakers: Vec<String> = Vec::new();
    let lines: Vec<String> = sentences
        .iter()
        .map(|sentence| {
            let speaker = sentence
                .speaker_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown");
            if speaker != "Unknown" && !speakers.iter().any(|s| s == speaker) {
                speakers.push(speaker.to_string());
            }
            format!("{speaker}: {}", sentence.text.trim())
        })
        .collect();

    let participants = match wire.participants {
        Some(list) if !list.is_empty() => list,
        _ => speakers,
    };
    let title = wire
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Meeting".to_string());

    Some(Transcript {
        raw_text: lines.join("\n"),
        participants,
        title,
        duration_secs: wire
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|minutes| (minutes * 60.0).round() as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    fn parse(json: &str) -> Option<Transcript> {
        let response: GraphqlResponse = serde_json::from_str(json).unwrap();
        response.data.and_then(|d| d.transcript).and_then(assemble_transcript)
    }

    #[test]
    fn assembles_speaker_lines() {
        let transcript = parse(
            r#"{"data": {"transcript": {
                "title": "Acme kickoff",
                "duration": 30.5,
                "sentences": [
                    {"speaker_name": "Dana", "text": "Welcome everyone."},
                    {"speaker_name": "Lee", "text": " Thanks. "},
                    {"speaker_name": null, "text": "[inaudible]"},
                    {"speaker_name": "Dana", "text": "Let's start."}
                ]
            }}}"#,
        )
        .unwrap();

        assert_eq!(
            transcript.raw_text,
            "Dana: Welcome everyone.\nLee: Thanks.\nUnknown: [inaudible]\nDana: Let's start."
        );
        assert_eq!(transcript.participants, vec!["Dana", "Lee"]);
        assert_eq!(transcript.title, "Acme kickoff");
        assert_eq!(transcript.duration_secs, Some(1830));
    }

    #[test]
    fn explicit_participants_win() {
        let transcript = parse(
            r#"{"data": {"transcript": {
                "title": "",
                "participants": ["dana@acme.test", "lee@us.test"],
                "sentences": [{"speaker_name": "Dana", "text": "Hi"}]
            }}}"#,
        )
        .unwrap();
        assert_eq!(transcript.participants, vec!["dana@acme.test", "lee@us.test"]);
        assert_eq!(transcript.title, "Untitled Meeting");
    }

    #[test]
    fn missing_transcript_or_sentences_is_none() {
        assert!(parse(r#"{"data": {"transcript": null}}"#).is_none());
        assert!(parse(r#"{"data": {"transcript": {"title": "x", "sentences": []}}}"#).is_none());
        assert!(parse(r#"{"data": null, "errors": [{"message": "object_not_found"}]}"#).is_none());
    }

    // ── HTTP behaviour against a local server ───────────────────────

    /// Fake GraphQL endpoint; the meeting id picks the scenario.
    async fn graphql(headers: HeaderMap, axum::Json(body): axum::Json<Value>) -> Response {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer ff-key");
        if !authorized {
            return (StatusCode::UNAUTHORIZED, "no key").into_response();
        }
        assert!(body["query"].as_str().unwrap().contains("sentences"));

        match body["variables"]["id"].as_str().unwrap_or_default() {
            "gone" => (StatusCode::NOT_FOUND, "not found").into_response(),
            "down" => (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response(),
            "busy" => (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response(),
            "garbled" => (StatusCode::OK, "<html>oops</html>").into_response(),
            "unknown" => axum::Json(json!({
                "data": {"transcript": null},
                "errors": [{"message": "object_not_found"}]
            }))
            .into_response(),
            "silent" => axum::Json(json!({
                "data": {"transcript": {"title": "Silent", "sentences": []}}
            }))
            .into_response(),
            _ => axum::Json(json!({
                "data": {"transcript": {
                    "title": "Acme kickoff",
                    "duration": 2,
                    "participants": [],
                    "sentences": [
                        {"speaker_name": "Dana", "text": "Welcome."},
                        {"speaker_name": "Lee", "text": "Thanks."}
                    ]
                }}
            }))
            .into_response(),
        }
    }

    async fn fake_fireflies() -> FirefliesSource {
        let app = Router::new().route("/graphql", post(graphql));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FirefliesSource::new(SecretString::from("ff-key"), Duration::from_secs(5))
            .unwrap()
            .with_api_url(format!("http://127.0.0.1:{port}/graphql"))
    }

    #[tokio::test]
    async fn fetch_success_builds_transcript() {
        let source = fake_fireflies().await;
        let transcript = source.fetch("m-1").await.unwrap();
        assert_eq!(transcript.raw_text, "Dana: Welcome.\nLee: Thanks.");
        assert_eq!(transcript.participants, vec!["Dana", "Lee"]);
        assert_eq!(transcript.title, "Acme kickoff");
        assert_eq!(transcript.duration_secs, Some(120));
    }

    #[tokio::test]
    async fn http_404_is_not_found() {
        let source = fake_fireflies().await;
        let err = source.fetch("gone").await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { meeting_id } if meeting_id == "gone"));
    }

    #[tokio::test]
    async fn missing_or_empty_transcript_is_not_found() {
        let source = fake_fireflies().await;
        assert!(matches!(
            source.fetch("unknown").await,
            Err(FetchError::NotFound { .. })
        ));
        assert!(matches!(
            source.fetch("silent").await,
            Err(FetchError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn server_errors_and_rate_limits_are_transient() {
        let source = fake_fireflies().await;
        for id in ["down", "busy", "garbled"] {
            match source.fetch(id).await {
                Err(FetchError::TransientError { reason }) => {
                    assert!(!reason.is_empty(), "{id}: empty reason");
                }
                other => panic!("{id}: expected TransientError, got {other:?}"),
            }
        }
        let Err(FetchError::TransientError { reason }) = source.fetch("busy").await else {
            panic!("expected TransientError");
        };
        assert!(reason.starts_with("429"));
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        let source = FirefliesSource::new(SecretString::from("ff-key"), Duration::from_secs(1))
            .unwrap()
            .with_api_url("http://127.0.0.1:1/graphql");
        assert!(matches!(
            source.fetch("m-1").await,
            Err(FetchError::TransientError { .. })
        ));
    }
}
