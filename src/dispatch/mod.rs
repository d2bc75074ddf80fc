//! Brief dispatcher — turns a brief and its action items into work items.
//!
//! One top-level item per brief, then one sub-item per action item in
//! analysis order. Sub-item failures are collected, never rolled back; a
//! failed top-level item aborts before any sub-item is attempted. The raw
//! transcript is attached to the created item afterwards; a failed
//! attachment is a warning.

pub mod collaborators;

pub use collaborators::Collaborators;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DispatchFailure, SinkError};
use crate::pipeline::types::{
    ActionItem, Brief, DispatchResult, FailedSubitem, RoutingDecision, Transcript,
};

/// File name used for the attached raw transcript.
pub const TRANSCRIPT_FILE_NAME: &str = "transcript.txt";

/// A created top-level work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedItem {
    pub id: String,
    pub url: String,
}

/// Sub-item creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubitem {
    pub description: String,
    pub assignee: Option<String>,
    pub due_on: Option<NaiveDate>,
}

/// Project-management sink.
#[async_trait]
pub trait WorkItemSink: Send + Sync {
    /// Create a top-level item in a project.
    async fn create_item(
        &self,
        project_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedItem, SinkError>;

    /// Create a sub-item under an existing item, returning its id.
    async fn create_subitem(
        &self,
        parent_item_id: &str,
        subitem: &NewSubitem,
    ) -> Result<String, SinkError>;

    /// Attach a plain-text file to an existing item.
    async fn attach_file(
        &self,
        item_id: &str,
        file_name: &str,
        content: &str,
    ) -> Result<(), SinkError>;
}

/// Dispatches briefs into a `WorkItemSink`.
pub struct BriefDispatcher {
    sink: Arc<dyn WorkItemSink>,
    collaborators: Collaborators,
    timeout: Duration,
}

impl BriefDispatcher {
    pub fn new(sink: Arc<dyn WorkItemSink>, collaborators: Collaborators, timeout: Duration) -> Self {
        Self {
            sink,
            collaborators,
            timeout,
        }
    }

    /// Create the top-level item and one sub-item per action item.
    pub async fn dispatch(
        &self,
        brief: &Brief,
        action_items: &[ActionItem],
        routing: &RoutingDecision,
    ) -> Result<DispatchResult, DispatchFailure> {
        let project_id = &routing.target_project_id;
        let item = self
            .bounded(self.sink.create_item(project_id, &brief.title, &brief.body))
            .await
            .map_err(|source| {
                warn!(project_id = %project_id, error = %source, "Top-level item creation failed");
                DispatchFailure::TopLevelCreateFailed {
                    project_id: project_id.clone(),
                    source,
                }
            })?;

        info!(
            project_id = %project_id,
            item_id = %item.id,
            fallback = routing.is_fallback,
            "Created top-level item"
        );

        let mut subitem_ids = Vec::with_capacity(action_items.len());
        let mut failed_subitems = Vec::new();

        for (index, action) in action_items.iter().enumerate() {
            let subitem = self.subitem_for(action);
            match self
                .bounded(self.sink.create_subitem(&item.id, &subitem))
                .await
            {
                Ok(id) => subitem_ids.push(id),
                Err(e) => {
                    warn!(
                        parent = %item.id,
                        index,
                        description = %action.description,
                        error = %e,
                        "Sub-item creation failed"
                    );
                    failed_subitems.push(FailedSubitem {
                        index,
                        description: action.description.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            item_id = %item.id,
            created = subitem_ids.len(),
            failed = failed_subitems.len(),
            "Dispatch complete"
        );

        Ok(DispatchResult {
            created_item_id: item.id,
            created_item_url: item.url,
            subitem_ids,
            failed_subitems,
        })
    }

    /// Attach the raw transcript to a created item.
    ///
    /// Returns a warning line when the attachment could not be made.
    pub async fn attach_transcript(&self, item_id: &str, transcript: &Transcript) -> Option<String> {
        match self
            .bounded(
                self.sink
                    .attach_file(item_id, TRANSCRIPT_FILE_NAME, &transcript.raw_text),
            )
            .await
        {
            Ok(()) => {
                info!(item_id = %item_id, bytes = transcript.raw_text.len(), "Attached transcript");
                None
            }
            Err(e) => {
                warn!(item_id = %item_id, error = %e, "Transcript attachment failed");
                Some(format!("transcript not attached: {e}"))
            }
        }
    }

    fn subitem_for(&self, action: &ActionItem) -> NewSubitem {
        let assignee = action
            .owner
            .as_deref()
            .and_then(|owner| self.collaborators.resolve(owner))
            .map(str::to_string);
        NewSubitem {
            description: action.description.clone(),
            assignee,
            due_on: action.due_date,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, SinkError>>,
    ) -> Result<T, SinkError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Sink that records calls and fails the sub-items at chosen positions.
    #[derive(Default)]
    struct RecordingSink {
        fail_top_level: bool,
        fail_subitems: Vec<usize>,
        fail_attachment: bool,
        subitems: Mutex<Vec<(String, NewSubitem)>>,
        items: Mutex<Vec<(String, String)>>,
        attachments: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl WorkItemSink for RecordingSink {
        async fn create_item(
            &self,
            project_id: &str,
            title: &str,
            _body: &str,
        ) -> Result<CreatedItem, SinkError> {
            if self.fail_top_level {
                return Err(SinkError::Request("500 Internal Server Error".into()));
            }
            self.items
                .lock()
                .await
                .push((project_id.to_string(), title.to_string()));
            Ok(CreatedItem {
                id: "item-1".into(),
                url: "https://pm.example/item-1".into(),
            })
        }

        async fn create_subitem(
            &self,
            parent_item_id: &str,
            subitem: &NewSubitem,
        ) -> Result<String, SinkError> {
            let mut subitems = self.subitems.lock().await;
            let position = subitems.len();
            subitems.push((parent_item_id.to_string(), subitem.clone()));
            if self.fail_subitems.contains(&position) {
                return Err(SinkError::Request("422 Unprocessable".into()));
            }
            Ok(format!("sub-{}", position + 1))
        }

        async fn attach_file(
            &self,
            item_id: &str,
            file_name: &str,
            content: &str,
        ) -> Result<(), SinkError> {
            if self.fail_attachment {
                return Err(SinkError::Request("413 Payload Too Large".into()));
            }
            self.attachments.lock().await.push((
                item_id.to_string(),
                file_name.to_string(),
                content.to_string(),
            ));
            Ok(())
        }
    }

    fn transcript() -> Transcript {
        Transcript {
            raw_text: "Dana: kickoff\nLee: agreed".into(),
            participants: vec!["Dana".into(), "Lee".into()],
            title: "Kickoff".into(),
            duration_secs: None,
        }
    }

    fn brief() -> Brief {
        Brief {
            title: "Meeting Summary: Kickoff".into(),
            body: "## Overview".into(),
        }
    }

    fn routing() -> RoutingDecision {
        RoutingDecision {
            target_project_id: "p-acme".into(),
            is_fallback: false,
        }
    }

    fn three_items() -> Vec<ActionItem> {
        vec![
            ActionItem::new("Update roadmap").with_owner("Sarah"),
            ActionItem::new("Send contract").with_owner("Priya"),
            ActionItem::new("Book venue")
                .with_due_date(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()),
        ]
    }

    fn dispatcher(sink: Arc<RecordingSink>) -> BriefDispatcher {
        let roster = Collaborators::new(vec![("Sarah Chen".into(), "u-sarah".into())]);
        BriefDispatcher::new(sink, roster, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn all_subitems_created_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let result = dispatcher(sink.clone())
            .dispatch(&brief(), &three_items(), &routing())
            .await
            .unwrap();

        assert_eq!(result.created_item_id, "item-1");
        assert_eq!(result.subitem_ids, vec!["sub-1", "sub-2", "sub-3"]);
        assert!(result.failed_subitems.is_empty());
        assert!(!result.is_partial());

        let calls = sink.subitems.lock().await;
        let descriptions: Vec<&str> = calls.iter().map(|(_, s)| s.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Update roadmap", "Send contract", "Book venue"]);
        assert!(calls.iter().all(|(parent, _)| parent == "item-1"));
        assert_eq!(calls[0].1.assignee.as_deref(), Some("u-sarah"));
        assert_eq!(calls[1].1.assignee, None);
        assert_eq!(calls[2].1.due_on, NaiveDate::from_ymd_opt(2025, 7, 1));

        let items = sink.items.lock().await;
        assert_eq!(items[0], ("p-acme".to_string(), "Meeting Summary: Kickoff".to_string()));
    }

    #[tokio::test]
    async fn middle_subitem_failure_is_partial_success() {
        let sink = Arc::new(RecordingSink {
            fail_subitems: vec![1],
            ..Default::default()
        });
        let result = dispatcher(sink.clone())
            .dispatch(&brief(), &three_items(), &routing())
            .await
            .unwrap();

        assert!(result.is_partial());
        assert_eq!(result.subitem_ids, vec!["sub-1", "sub-3"]);
        assert_eq!(result.failed_subitems.len(), 1);
        assert_eq!(result.failed_subitems[0].index, 1);
        assert_eq!(result.failed_subitems[0].description, "Send contract");
        assert_eq!(sink.subitems.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn top_level_failure_attempts_no_subitems() {
        let sink = Arc::new(RecordingSink {
            fail_top_level: true,
            ..Default::default()
        });
        let err = dispatcher(sink.clone())
            .dispatch(&brief(), &three_items(), &routing())
            .await
            .unwrap_err();

        let DispatchFailure::TopLevelCreateFailed { project_id, .. } = err;
        assert_eq!(project_id, "p-acme");
        assert!(sink.subitems.lock().await.is_empty());
    }

    #[tokio::test]
    async fn no_action_items_creates_only_top_level() {
        let sink = Arc::new(RecordingSink::default());
        let result = dispatcher(sink.clone())
            .dispatch(&brief(), &[], &routing())
            .await
            .unwrap();
        assert!(result.subitem_ids.is_empty());
        assert_eq!(sink.items.lock().await.len(), 1);
    }

    /// Sink whose sub-item calls never return.
    struct HangingSink;

    #[async_trait]
    impl WorkItemSink for HangingSink {
        async fn create_item(
            &self,
            _project_id: &str,
            _title: &str,
            _body: &str,
        ) -> Result<CreatedItem, SinkError> {
            Ok(CreatedItem {
                id: "item-9".into(),
                url: "https://pm.example/item-9".into(),
            })
        }

        async fn create_subitem(
            &self,
            _parent_item_id: &str,
            _subitem: &NewSubitem,
        ) -> Result<String, SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".into())
        }

        async fn attach_file(
            &self,
            _item_id: &str,
            _file_name: &str,
            _content: &str,
        ) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_subitem_times_out_as_failure() {
        let dispatcher = BriefDispatcher::new(
            Arc::new(HangingSink),
            Collaborators::default(),
            Duration::from_secs(2),
        );
        let result = dispatcher
            .dispatch(&brief(), &[ActionItem::new("Follow up")], &routing())
            .await
            .unwrap();
        assert_eq!(result.failed_subitems.len(), 1);
        assert!(result.failed_subitems[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn transcript_attached_to_created_item() {
        let sink = Arc::new(RecordingSink::default());
        let warning = dispatcher(sink.clone())
            .attach_transcript("item-1", &transcript())
            .await;

        assert!(warning.is_none());
        let attachments = sink.attachments.lock().await;
        assert_eq!(
            attachments[0],
            (
                "item-1".to_string(),
                TRANSCRIPT_FILE_NAME.to_string(),
                "Dana: kickoff\nLee: agreed".to_string()
            )
        );
    }

    #[tokio::test]
    async fn failed_attachment_is_a_warning() {
        let sink = Arc::new(RecordingSink {
            fail_attachment: true,
            ..Default::default()
        });
        let warning = dispatcher(sink)
            .attach_transcript("item-1", &transcript())
            .await
            .unwrap();
        assert!(warning.starts_with("transcript not attached"));
        assert!(warning.contains("413"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attachment_times_out_with_configured_timeout() {
        let dispatcher = BriefDispatcher::new(
            Arc::new(HangingSink),
            Collaborators::default(),
            Duration::from_secs(2),
        );
        let warning = dispatcher
            .attach_transcript("item-9", &transcript())
            .await
            .unwrap();
        assert!(warning.contains("timed out"));
        assert!(warning.contains("2s"));
    }
}
