//! Pipeline orchestrator — drives one meeting event to a dispatched brief.
//!
//! Fetching → Classifying → Editing → Analyzing → Writing → Routing →
//! Dispatching → Done. A failed classification degrades to the fallback
//! classification; every other failure ends the run in `Failed` with the
//! failing stage named in the error.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dispatch::{BriefDispatcher, Collaborators, WorkItemSink};
use crate::error::PipelineError;
use crate::llm::LlmProvider;
use crate::pipeline::stage::{StageResult, StageRunner};
use crate::pipeline::types::{
    Brief, ClassificationResult, MeetingEvent, PipelineState, RunReport, RunStatus, StageId,
    TokenUsage,
};
use crate::routing::{ProjectDirectory, RoutingResolver};
use crate::sources::TranscriptSource;

/// External collaborators of a pipeline run.
pub struct PipelineDeps {
    pub source: Arc<dyn TranscriptSource>,
    pub llm: Arc<dyn LlmProvider>,
    pub directory: Arc<dyn ProjectDirectory>,
    pub sink: Arc<dyn WorkItemSink>,
    pub collaborators: Collaborators,
}

/// Runs meeting events through the pipeline.
///
/// Holds no per-run state; concurrent runs share one orchestrator.
pub struct Orchestrator {
    source: Arc<dyn TranscriptSource>,
    llm: Arc<dyn LlmProvider>,
    stages: StageRunner,
    router: RoutingResolver,
    dispatcher: BriefDispatcher,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Self {
        Self {
            source: deps.source,
            stages: StageRunner::new(Arc::clone(&deps.llm), &config),
            llm: deps.llm,
            router: RoutingResolver::new(&config, deps.directory),
            dispatcher: BriefDispatcher::new(deps.sink, deps.collaborators, config.sink_timeout),
        }
    }

    /// Run one event to completion.
    pub async fn run(&self, event: &MeetingEvent) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id, meeting_id = %event.meeting_id);
        self.run_inner(run_id, event).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        event: &MeetingEvent,
    ) -> Result<RunReport, PipelineError> {
        let mut run = RunTracker::new();
        info!(title = %event.title, "Pipeline run started");

        // Fetching
        let transcript = self
            .source
            .fetch(&event.meeting_id)
            .await
            .map_err(|e| run.fail(PipelineError::Fetch(e)))?;

        run.advance(); // Classifying: advisory, never aborts.
        let (classification, classification_degraded) =
            match self.stages.classify(&transcript).await {
                Ok(stage_run) => {
                    run.usage.add(stage_run.usage);
                    info!(
                        scope = ?stage_run.value.scope,
                        client = stage_run.value.client_name.as_deref().unwrap_or("-"),
                        confidence = stage_run.value.confidence,
                        "Meeting classified"
                    );
                    (stage_run.value, false)
                }
                Err(failed) => {
                    run.usage.add(failed.usage);
                    warn!(
                        kind = failed.value.kind(),
                        error = %failed.value,
                        attempts = failed.attempts,
                        "Classification failed, using fallback"
                    );
                    (ClassificationResult::fallback(), true)
                }
            };

        run.advance(); // Editing
        let cleaned = self.stages.edit(&transcript).await;
        let cleaned = run.settle(StageId::Edit, cleaned)?;

        run.advance(); // Analyzing
        let analysis = self.stages.analyze(&cleaned).await;
        let analysis = run.settle(StageId::Analyze, analysis)?;

        run.advance(); // Writing
        let meeting_title = brief_title_source(event, &transcript.title);
        let brief = if analysis.is_empty() {
            info!("Analysis found nothing to report, using no-content brief");
            Brief::no_content(meeting_title)
        } else {
            let body = self.stages.write(&analysis).await;
            Brief {
                title: Brief::title_for(meeting_title),
                body: run.settle(StageId::Write, body)?,
            }
        };

        run.advance(); // Routing
        let routing = self.router.resolve(&classification).await;

        run.advance(); // Dispatching
        let dispatch = self
            .dispatcher
            .dispatch(&brief, &analysis.action_items, &routing)
            .await
            .map_err(|e| run.fail(PipelineError::Dispatch(e)))?;
        let attachment_warning = self
            .dispatcher
            .attach_transcript(&dispatch.created_item_id, &transcript)
            .await;

        run.advance(); // Done

        let warned = dispatch.is_partial() || attachment_warning.is_some();
        let status = if warned || classification_degraded {
            RunStatus::SuccessWithWarnings
        } else {
            RunStatus::Success
        };
        let estimated_cost = self.estimate_cost(run.usage);

        info!(
            status = ?status,
            project_id = %routing.target_project_id,
            fallback = routing.is_fallback,
            item_url = %dispatch.created_item_url,
            subitems = dispatch.subitem_ids.len(),
            failed_subitems = dispatch.failed_subitems.len(),
            attached = attachment_warning.is_none(),
            input_tokens = run.usage.input_tokens,
            output_tokens = run.usage.output_tokens,
            cost = %estimated_cost,
            "Pipeline run complete"
        );

        Ok(RunReport {
            run_id,
            meeting_id: event.meeting_id.clone(),
            status,
            classification,
            classification_degraded,
            routing,
            brief,
            dispatch,
            attachment_warning,
            transitions: run.transitions,
            usage: run.usage,
            estimated_cost,
        })
    }

    fn estimate_cost(&self, usage: TokenUsage) -> Decimal {
        let (input_rate, output_rate) = self.llm.cost_per_token();
        input_rate * Decimal::from(usage.input_tokens)
            + output_rate * Decimal::from(usage.output_tokens)
    }
}

/// Event title first; the source's title when the event carried none.
fn brief_title_source<'a>(event: &'a MeetingEvent, transcript_title: &'a str) -> &'a str {
    if event.title.trim().is_empty() {
        transcript_title
    } else {
        &event.title
    }
}

/// States visited and tokens spent during one run.
struct RunTracker {
    transitions: Vec<PipelineState>,
    usage: TokenUsage,
}

impl RunTracker {
    /// Starts in `Fetching`.
    fn new() -> Self {
        let mut transitions = Vec::with_capacity(9);
        transitions.push(PipelineState::Fetching);
        Self {
            transitions,
            usage: TokenUsage::default(),
        }
    }

    fn current(&self) -> PipelineState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(PipelineState::Fetching)
    }

    /// Move to the next happy-path state.
    fn advance(&mut self) {
        if let Some(next) = self.current().next() {
            debug!(
                from = ?self.current(),
                to = ?next,
                stage = ?next.stage(),
                "State transition"
            );
            self.transitions.push(next);
        }
    }

    /// Account a stage outcome; a failure ends the run.
    fn settle<T>(&mut self, stage: StageId, outcome: StageResult<T>) -> Result<T, PipelineError> {
        match outcome {
            Ok(stage_run) => {
                self.usage.add(stage_run.usage);
                Ok(stage_run.value)
            }
            Err(failed) => {
                self.usage.add(failed.usage);
                Err(self.fail(PipelineError::Stage {
                    stage,
                    failure: failed.value,
                }))
            }
        }
    }

    /// Record the terminal failure and hand the error back.
    fn fail(&mut self, err: PipelineError) -> PipelineError {
        let last = self.current();
        if !last.is_terminal() {
            self.transitions.push(PipelineState::Failed);
        }
        error!(
            state = ?last,
            stage = ?err.stage(),
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            error = %err,
            "Pipeline run failed"
        );
        err
    }
}
