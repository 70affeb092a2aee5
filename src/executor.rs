use chrono::Utc;
use log::debug;

use crate::causes::{build_causes, CauseJobData};
use crate::error::Result;
use crate::event::WorkflowEventData;
use crate::mapper::{run_duration, run_result};
use crate::tracker::events::{CiEvent, CiEventType, MultiBranchType, PhaseType};
use crate::tracker::types::{CiServer, Executor};
use crate::tracker::TrackerClient;

const TEST_RUNNER_SUBTYPE: &str = "test_runner";

/// Resolve the test-runner executor linked to `ci_job_id`, creating it on
/// first use.
pub async fn get_or_create_executor(
    tracker: &TrackerClient,
    name: &str,
    ci_job_id: &str,
    framework: &str,
    ci_server: &CiServer,
) -> Result<Executor> {
    let executor_jobs = tracker.get_executors(ci_job_id, ci_server).await?;
    debug!("Found {} executor job(s)", executor_jobs.len());

    if let Some(executor) = executor_jobs.into_iter().find_map(|job| job.executor) {
        debug!(
            "Using executor with {{id='{}', name='{}'}}",
            executor.id,
            executor.name.as_deref().unwrap_or_default()
        );
        return Ok(executor);
    }

    let created = tracker
        .create_executor(serde_json::json!({
            "name": name,
            "subtype": TEST_RUNNER_SUBTYPE,
            "framework": {
                "id": framework_id(framework),
                "type": "list_node",
            },
            "ci_server": {
                "id": ci_server.id,
                "type": "ci_server",
            },
            "ci_job": {
                "id": ci_job_id,
                "type": "ci_job",
            },
        }))
        .await?;

    debug!("Created executor with {{id='{}'}}", created.id);
    Ok(created)
}

pub fn build_executor_name(
    pattern: &str,
    repository_owner: &str,
    repository_name: &str,
    workflow_name: &str,
    workflow_file_name: &str,
) -> String {
    pattern
        .replace("${repository_owner}", repository_owner)
        .replace("${repository_name}", repository_name)
        .replace("${workflow_name}", workflow_name)
        .replace("${workflow_file_name}", workflow_file_name)
}

pub fn build_executor_ci_id(
    repository_owner: &str,
    repository_name: &str,
    workflow_file_name: &str,
    branch: Option<&str>,
) -> String {
    match branch {
        Some(branch) => {
            format!("{repository_owner}/{repository_name}/{workflow_file_name}/executor/{branch}")
        }
        None => format!("{repository_owner}/{repository_name}/{workflow_file_name}/executor"),
    }
}

/// Root event for the executor's own per-branch record.
#[allow(clippy::too_many_arguments)]
pub fn root_executor_event(
    data: &WorkflowEventData,
    executor_name: &str,
    executor_ci_id: &str,
    parent_ci_id: &str,
    branch: &str,
    event_type: CiEventType,
    phase_type: Option<PhaseType>,
) -> Result<CiEvent> {
    let causes = build_causes(
        &CauseJobData::Root {
            job_name: executor_ci_id.to_string(),
            cause_type: data.trigger_event.clone(),
            user_id: data.triggering_actor.clone(),
            user_name: data.triggering_actor.clone(),
        },
        &data.build_ci_id(),
    )?;

    let mut event = CiEvent {
        build_ci_id: data.build_ci_id(),
        event_type,
        number: data.event_number(),
        project: executor_ci_id.to_string(),
        project_display_name: executor_name.to_string(),
        start_time: data
            .run_started_at
            .map(|started| started.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis()),
        duration: None,
        result: None,
        causes,
        scm_data: None,
        parameters: None,
        multi_branch_type: Some(MultiBranchType::Child),
        parent_ci_id: Some(parent_ci_id.to_string()),
        branch: Some(branch.to_string()),
        phase_type,
        skip_validation: Some(true),
    };

    if event_type == CiEventType::Finished {
        event.duration = Some(run_duration(data.run_started_at, data.run_updated_at)?);
        event.result = Some(run_result(data.conclusion.as_deref())?);
    }

    Ok(event)
}

fn framework_id(framework: &str) -> &'static str {
    let framework_id = match framework {
        "bddScenario" | "cucumber" => "list_node.testing_framework.cucumber",
        "gradle" | "junit" => "list_node.testing_framework.junit",
        "jbehave" => "list_node.testing_framework.jbehave",
        "protractor" => "list_node.testing_tool_type.protractor",
        "testNG" => "list_node.testing_framework.testng",
        "uft" => "list_node.testing_framework.uft",
        _ => "list_node.testing_framework.junit",
    };

    debug!("Framework with name '{framework}' has ID '{framework_id}'.");
    framework_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_ci_id_with_and_without_branch() {
        assert_eq!(
            build_executor_ci_id("acme", "widgets", "ci.yml", Some("main")),
            "acme/widgets/ci.yml/executor/main"
        );
        assert_eq!(
            build_executor_ci_id("acme", "widgets", "ci.yml", None),
            "acme/widgets/ci.yml/executor"
        );
    }

    #[test]
    fn test_executor_name_substitutes_placeholders() {
        let name = build_executor_name(
            "${repository_owner} ${workflow_name} runner",
            "acme",
            "widgets",
            "CI",
            "ci.yml",
        );
        assert_eq!(name, "acme CI runner");
    }

    #[test]
    fn test_framework_id_falls_back_to_junit() {
        assert_eq!(framework_id("cucumber"), "list_node.testing_framework.cucumber");
        assert_eq!(framework_id("junit"), "list_node.testing_framework.junit");
        assert_eq!(framework_id("mystery"), "list_node.testing_framework.junit");
    }
}
