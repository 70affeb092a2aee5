use serde::{Deserialize, Serialize};

use super::events::{CiParameter, MultiBranchType};

/// Standard list envelope for entity collection responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceList<T> {
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Typed reference to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
}

impl EntityRef {
    pub fn ci_server(id: &str) -> Self {
        Self {
            entity_type: "ci_server".to_string(),
            id: id.to_string(),
        }
    }
}

/// Tracking-server record of one upstream CI system instance.
#[derive(Debug, Clone, Deserialize)]
pub struct CiServer {
    pub id: String,
    pub instance_id: Option<String>,
    pub plugin_version: Option<String>,
}

/// Tracking-server record of a CI workflow definition.
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub multi_branch_type: Option<String>,
    pub ci_server: Option<EntityRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CiJob {
    pub id: String,
    pub name: Option<String>,
    pub ci_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineNode {
    pub ci_job: Option<CiJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CiBuild {
    /// Epoch milliseconds.
    pub start_time: i64,
}

/// Job row joined with its optional test-runner executor.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorJob {
    pub executor: Option<Executor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Executor {
    pub id: String,
    pub name: Option<String>,
}

/// Entity update body for `pipelines`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_branch_type: Option<MultiBranchType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_server: Option<EntityRef>,
}

/// Bulk job update body for the internal job-update channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiJobUpdate {
    pub job_id: String,
    pub name: String,
    pub job_ci_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_server: Option<CiServerIdRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CiServerIdRef {
    pub id: String,
}

/// Job entry in a pipeline creation body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJobEntry {
    pub name: String,
    pub job_ci_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<CiParameter>>,
}
