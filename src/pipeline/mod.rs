//! Transcript-to-brief pipeline.
//!
//! Every meeting event flows through:
//! 1. `TranscriptSource::fetch()` — raw transcript
//! 2. `StageRunner` — classify, edit, analyze, write (one model call each)
//! 3. `RoutingResolver::resolve()` — target project, never fails
//! 4. `BriefDispatcher::dispatch()` — top-level item plus sub-items
//!
//! `Orchestrator` sequences the above and reports the run.

pub mod orchestrator;
pub mod prompts;
pub mod stage;
pub mod types;

pub use orchestrator::{Orchestrator, PipelineDeps};
