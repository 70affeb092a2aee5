use serde::{Deserialize, Serialize};

/// Lifecycle classification of a relayed CI event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiEventType {
    Queued,
    Started,
    Finished,
    Scm,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiCausesType {
    Timer,
    User,
    Scm,
    Upstream,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    Success,
    Failure,
    Aborted,
    Unstable,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiBranchType {
    Parent,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    Post,
    Internal,
}

/// Why a build happened, chainable through upstream triggers (root last).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiEventCause {
    #[serde(rename = "type")]
    pub cause_type: CiCausesType,
    pub project: String,
    pub build_ci_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<CiEventCause>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiParameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub default_value: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    pub description: String,
    #[serde(rename = "type")]
    pub parameter_type: String,
}

/// Normalized CI event relayed to the tracking server.
///
/// `duration` and `result` are present iff `event_type` is `Finished`;
/// `scm_data` is present iff `event_type` is `Scm`. The mapper enforces
/// both invariants at construction time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiEvent {
    pub build_ci_id: String,
    pub event_type: CiEventType,
    pub number: String,
    pub project: String,
    pub project_display_name: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<CiEventCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scm_data: Option<ScmData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<CiParameter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_branch_type: Option<MultiBranchType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_ci_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_type: Option<PhaseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_validation: Option<bool>,
}

/// Identity block sent along with every event batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiServerInfo {
    pub instance_id: String,
    #[serde(rename = "type")]
    pub server_type: String,
    pub url: String,
    pub version: String,
    /// Epoch milliseconds.
    pub sending_time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CiEventsList {
    pub server: CiServerInfo,
    pub events: Vec<CiEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScmData {
    pub repository: ScmRepository,
    pub commits: Vec<ScmCommit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScmRepository {
    pub url: String,
    pub branch: String,
    #[serde(rename = "type")]
    pub repository_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScmCommit {
    pub rev_id: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Epoch milliseconds.
    pub time: i64,
    pub comment: String,
    pub changes: Vec<ScmCommitChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmChangeType {
    Add,
    Edit,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScmCommitChange {
    pub file: String,
    #[serde(rename = "type")]
    pub change_type: ScmChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_to_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// Pull-request snapshot document for the tracking server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestData {
    pub id: String,
    pub author_name: String,
    pub author_email: String,
    pub title: String,
    pub description: String,
    /// Epoch milliseconds.
    pub created_time: i64,
    /// Epoch milliseconds.
    pub updated_time: i64,
    pub merged: bool,
    pub self_url: String,
    pub state: PullRequestState,
    pub source_repository: ScmRepository,
    pub target_repository: ScmRepository,
    pub commits: Vec<ScmCommit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_camel_case_and_skips_absent_fields() {
        let event = CiEvent {
            build_ci_id: "42".to_string(),
            event_type: CiEventType::Started,
            number: "7".to_string(),
            project: "acme/widgets/ci.yml/build".to_string(),
            project_display_name: "build".to_string(),
            start_time: 1000,
            duration: None,
            result: None,
            causes: vec![],
            scm_data: None,
            parameters: None,
            multi_branch_type: None,
            parent_ci_id: None,
            branch: None,
            phase_type: None,
            skip_validation: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["buildCiId"], "42");
        assert_eq!(json["eventType"], "started");
        assert_eq!(json["projectDisplayName"], "build");
        assert!(json.get("duration").is_none());
        assert!(json.get("result").is_none());
        assert!(json.get("scmData").is_none());
        assert!(json.get("causes").is_none());
    }

    #[test]
    fn test_nested_cause_serialization() {
        let cause = CiEventCause {
            cause_type: CiCausesType::Upstream,
            project: "acme/widgets/ci.yml".to_string(),
            build_ci_id: "42".to_string(),
            user_id: None,
            user_name: None,
            causes: vec![CiEventCause {
                cause_type: CiCausesType::Scm,
                project: "acme/widgets/ci.yml".to_string(),
                build_ci_id: "42".to_string(),
                user_id: Some("octocat".to_string()),
                user_name: Some("octocat".to_string()),
                causes: vec![],
            }],
        };

        let json = serde_json::to_value(&cause).unwrap();
        assert_eq!(json["type"], "upstream");
        assert_eq!(json["causes"][0]["type"], "scm");
        assert_eq!(json["causes"][0]["userId"], "octocat");
    }
}
