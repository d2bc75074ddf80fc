//! Asana adapter: project directory and work-item sink.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::dispatch::{CreatedItem, NewSubitem, WorkItemSink};
use crate::error::{ConfigError, DirectoryError, SinkError};
use crate::routing::{ProjectDirectory, ProjectRef};

const ASANA_API_BASE: &str = "https://app.asana.com/api/1.0";

/// Page size for project listing (Asana maximum).
const PROJECT_PAGE_LIMIT: u32 = 100;

/// Asana connection settings.
#[derive(Debug, Clone)]
pub struct AsanaConfig {
    pub token: SecretString,
    pub workspace_gid: String,
    pub timeout: Duration,
}

impl AsanaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            token: SecretString::from(crate::config::require_env("ASANA_PERSONAL_ACCESS_TOKEN")?),
            workspace_gid: crate::config::require_env("ASANA_WORKSPACE_GID")?,
            timeout: Duration::from_secs(crate::config::parse_env_or("BRIEF_SINK_TIMEOUT_SECS", 30u64)?),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: String,
}

#[derive(Debug, Deserialize)]
struct ProjectWire {
    gid: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct TaskWire {
    gid: String,
    #[serde(default)]
    permalink_url: Option<String>,
}

/// Asana REST client.
pub struct AsanaClient {
    client: reqwest::Client,
    token: SecretString,
    workspace_gid: String,
    base_url: String,
    timeout: Duration,
}

impl AsanaClient {
    pub fn new(config: AsanaConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "ASANA_PERSONAL_ACCESS_TOKEN".into(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            token: config.token,
            workspace_gid: config.workspace_gid,
            base_url: ASANA_API_BASE.to_string(),
            timeout: config.timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_task(&self, path: &str, data: Value) -> Result<TaskWire, SinkError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.token.expose_secret())
            .query(&[("opt_fields", "permalink_url")])
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let response = check_status(response).await?;

        let envelope: DataEnvelope<TaskWire> = response
            .json()
            .await
            .map_err(|e| SinkError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }

    fn send_error(&self, e: reqwest::Error) -> SinkError {
        if e.is_timeout() {
            SinkError::Timeout(self.timeout)
        } else {
            SinkError::Request(e.to_string())
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(SinkError::Request(format!("{status}: {text}")))
}

/// Task payload for a top-level item.
///
/// The brief is markdown, so it always goes to plain `notes`; `html_notes`
/// only accepts Asana's XML subset and rejects arbitrary tags.
fn task_payload(project_id: &str, title: &str, body: &str) -> Value {
    json!({
        "name": title,
        "projects": [project_id],
        "notes": body,
    })
}

fn subtask_payload(parent_item_id: &str, subitem: &NewSubitem) -> Value {
    let mut data = json!({
        "name": subitem.description,
        "parent": parent_item_id,
    });
    if let Some(assignee) = &subitem.assignee {
        data["assignee"] = Value::String(assignee.clone());
    }
    if let Some(due_on) = subitem.due_on {
        data["due_on"] = Value::String(due_on.format("%Y-%m-%d").to_string());
    }
    data
}

#[async_trait]
impl ProjectDirectory for AsanaClient {
    async fn find_projects(&self, client_name: &str) -> Result<Vec<ProjectRef>, DirectoryError> {
        debug!(client = %client_name, workspace = %self.workspace_gid, "Listing Asana projects");

        let mut projects = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let limit = PROJECT_PAGE_LIMIT.to_string();
            let mut query = vec![
                ("workspace", self.workspace_gid.as_str()),
                ("opt_fields", "name"),
                ("archived", "false"),
                ("limit", limit.as_str()),
            ];
            if let Some(ref o) = offset {
                query.push(("offset", o.as_str()));
            }

            let response = self
                .client
                .get(format!("{}/projects", self.base_url))
                .bearer_auth(self.token.expose_secret())
                .query(&query)
                .send()
                .await
                .map_err(|e| DirectoryError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(DirectoryError::Request(format!("{status}: {text}")));
            }

            let page: DataEnvelope<Vec<ProjectWire>> = response
                .json()
                .await
                .map_err(|e| DirectoryError::Request(format!("invalid project list: {e}")))?;

            projects.extend(page.data.into_iter().map(|p| ProjectRef {
                id: p.gid,
                name: p.name,
            }));

            match page.next_page {
                Some(next) => offset = Some(next.offset),
                None => break,
            }
        }

        debug!(count = projects.len(), "Listed Asana projects");
        Ok(projects)
    }
}

#[async_trait]
impl WorkItemSink for AsanaClient {
    async fn create_item(
        &self,
        project_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedItem, SinkError> {
        info!(project_id = %project_id, title = %title, "Creating Asana task");
        let task = self
            .post_task("/tasks", task_payload(project_id, title, body))
            .await?;
        let url = task
            .permalink_url
            .unwrap_or_else(|| format!("https://app.asana.com/0/{project_id}/{}", task.gid));
        Ok(CreatedItem { id: task.gid, url })
    }

    async fn create_subitem(
        &self,
        parent_item_id: &str,
        subitem: &NewSubitem,
    ) -> Result<String, SinkError> {
        debug!(parent = %parent_item_id, name = %subitem.description, "Creating Asana sub-task");
        let task = self
            .post_task("/tasks", subtask_payload(parent_item_id, subitem))
            .await?;
        Ok(task.gid)
    }

    async fn attach_file(
        &self,
        item_id: &str,
        file_name: &str,
        content: &str,
    ) -> Result<(), SinkError> {
        debug!(
            task = %item_id,
            file = %file_name,
            bytes = content.len(),
            "Uploading Asana attachment"
        );
        let part = Part::text(content.to_string())
            .file_name(file_name.to_string())
            .mime_str("text/plain")
            .map_err(|e| SinkError::Request(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/tasks/{}/attachments", self.base_url, item_id))
            .bearer_auth(self.token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        check_status(response).await?;
        Ok(())
    }
}
