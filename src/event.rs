use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{RelayError, Result};

/// Webhook payload delivered to the relay. Every field is optional at the
/// wire; the validated views below fail fast on missing data instead of
/// threading `Option` through the whole pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionsEvent {
    pub action: Option<String>,
    pub repository: Option<EventRepository>,
    pub workflow: Option<EventWorkflow>,
    pub workflow_run: Option<EventWorkflowRun>,
    pub pull_request: Option<EventPullRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRepository {
    pub name: String,
    pub owner: EventActor,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventActor {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventWorkflow {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventWorkflowRun {
    pub id: u64,
    pub conclusion: Option<String>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub run_number: Option<u64>,
    pub head_branch: Option<String>,
    pub event: Option<String>,
    pub triggering_actor: Option<EventActor>,
}

/// Pull request snapshot as delivered in `pull_request` events. Only the
/// fields the relay forwards are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct EventPullRequest {
    pub number: u64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
    pub merged: Option<bool>,
    pub html_url: Option<String>,
    pub user: Option<EventPullRequestAuthor>,
    pub head: Option<EventPullRequestRef>,
    pub base: Option<EventPullRequestRef>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPullRequestAuthor {
    pub login: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPullRequestRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// Closed classification of the payload `action` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionsEventType {
    WorkflowQueued,
    WorkflowStarted,
    WorkflowFinished,
    PullRequestOpened,
    PullRequestClosed,
    PullRequestEdited,
    PullRequestReopened,
    Unknown,
}

impl ActionsEventType {
    pub fn from_action(action: Option<&str>) -> Self {
        match action {
            Some("requested") => Self::WorkflowQueued,
            Some("in_progress") => Self::WorkflowStarted,
            Some("completed") => Self::WorkflowFinished,
            Some("opened") => Self::PullRequestOpened,
            Some("closed") => Self::PullRequestClosed,
            Some("edited") => Self::PullRequestEdited,
            Some("reopened") => Self::PullRequestReopened,
            _ => Self::Unknown,
        }
    }

    /// Action string of the workflow phase, as embedded in integration job
    /// names (`<name>#<action>#<run id>`).
    pub fn action_str(&self) -> &'static str {
        match self {
            Self::WorkflowQueued => "requested",
            Self::WorkflowStarted => "in_progress",
            Self::WorkflowFinished => "completed",
            Self::PullRequestOpened => "opened",
            Self::PullRequestClosed => "closed",
            Self::PullRequestEdited => "edited",
            Self::PullRequestReopened => "reopened",
            Self::Unknown => "unknown",
        }
    }
}

/// Validated view of a workflow lifecycle event, constructed once at entry.
#[derive(Debug, Clone)]
pub struct WorkflowEventData {
    pub owner: String,
    pub repo: String,
    pub repo_html_url: Option<String>,
    pub workflow_name: String,
    pub workflow_file_path: String,
    pub run_id: u64,
    pub run_number: Option<u64>,
    pub head_branch: Option<String>,
    pub trigger_event: Option<String>,
    pub triggering_actor: Option<String>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub run_updated_at: Option<DateTime<Utc>>,
    pub conclusion: Option<String>,
}

impl WorkflowEventData {
    pub fn from_event(event: &ActionsEvent) -> Result<Self> {
        let repository = event
            .repository
            .as_ref()
            .ok_or(RelayError::MissingRequiredField("repository"))?;
        let workflow = event
            .workflow
            .as_ref()
            .ok_or(RelayError::MissingRequiredField("workflow"))?;
        let run = event
            .workflow_run
            .as_ref()
            .ok_or(RelayError::MissingRequiredField("workflow_run"))?;

        Ok(Self {
            owner: repository.owner.login.clone(),
            repo: repository.name.clone(),
            repo_html_url: repository.html_url.clone(),
            workflow_name: workflow.name.clone(),
            workflow_file_path: workflow.path.clone(),
            run_id: run.id,
            run_number: run.run_number,
            head_branch: run.head_branch.clone(),
            trigger_event: run.event.clone(),
            triggering_actor: run.triggering_actor.as_ref().map(|a| a.login.clone()),
            run_started_at: run.run_started_at,
            run_updated_at: run.updated_at,
            conclusion: run.conclusion.clone(),
        })
    }

    pub fn build_ci_id(&self) -> String {
        self.run_id.to_string()
    }

    /// Display number for events: the run number, falling back to the build
    /// ci id when the payload did not carry one.
    pub fn event_number(&self) -> String {
        self.run_number
            .map(|number| number.to_string())
            .unwrap_or_else(|| self.build_ci_id())
    }

    pub fn branch(&self) -> Result<&str> {
        self.head_branch
            .as_deref()
            .ok_or(RelayError::MissingRequiredField("workflow_run.head_branch"))
    }
}
