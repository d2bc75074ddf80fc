//! Transcript sources.

pub mod fireflies;

pub use fireflies::FirefliesSource;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::pipeline::types::Transcript;

/// Fetches the transcript for a meeting.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch(&self, meeting_id: &str) -> Result<Transcript, FetchError>;
}
