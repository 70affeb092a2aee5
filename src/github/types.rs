use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Workflow run as returned by the actions API. Only the fields the relay
/// correlates on are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub workflow_id: u64,
    pub conclusion: Option<String>,
    pub run_started_at: Option<DateTime<Utc>>,
}

/// Job within a workflow run, including its steps.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionsJob {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

/// Ordered sub-task of a job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStep {
    pub name: String,
    pub number: i64,
    pub conclusion: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle states a workflow run can be listed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Requested,
    Waiting,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Requested => "requested",
            Self::Waiting => "waiting",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub commit: CommitDetail,
    #[serde(default)]
    pub files: Vec<CommitFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub author: Option<CommitAuthor>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitFile {
    pub filename: String,
    pub status: String,
    pub previous_filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
}

/// Repository contents API response for a single file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileContent {
    pub content: String,
    pub encoding: String,
}
