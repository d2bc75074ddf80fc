//! Meeting Brief — turns finished meeting transcripts into routed,
//! assigned project-management briefs.

pub mod asana;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod routing;
pub mod server;
pub mod sources;
