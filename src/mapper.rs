use chrono::{DateTime, Utc};

use crate::causes::{build_causes, CauseJobData};
use crate::error::{RelayError, Result};
use crate::event::WorkflowEventData;
use crate::github::types::{ActionsJob, JobStep};
use crate::pipeline::PipelineEventData;
use crate::tracker::events::{BuildResult, CiEvent, CiEventType, CiParameter, ScmData};

/// Uniform view over the pieces of a workflow run the relay reports on:
/// the run itself, a job, or a step.
#[derive(Debug, Clone)]
pub struct PipelineComponent {
    pub name: String,
    pub conclusion: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ActionsJob> for PipelineComponent {
    fn from(job: &ActionsJob) -> Self {
        Self {
            name: job.name.clone(),
            conclusion: job.conclusion.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

impl From<&JobStep> for PipelineComponent {
    fn from(step: &JobStep) -> Self {
        Self {
            name: step.name.clone(),
            conclusion: step.conclusion.clone(),
            started_at: step.started_at,
            completed_at: step.completed_at,
        }
    }
}

/// Map a component observation to a CI event.
///
/// The event is FINISHED only once every child is finished and the component
/// itself carries a conclusion; any earlier observation maps to STARTED.
pub fn map_component_to_event(
    component: &PipelineComponent,
    parent_cause_data: &CauseJobData,
    build_ci_id: &str,
    all_children_finished: bool,
    run_number: Option<u64>,
) -> Result<CiEvent> {
    let component_full_name = format!("{}/{}", parent_cause_data.job_name(), component.name);
    let event_type = if all_children_finished && component.conclusion.is_some() {
        CiEventType::Finished
    } else {
        CiEventType::Started
    };

    let causes = build_causes(
        &CauseJobData::child_of(parent_cause_data, component_full_name.clone()),
        build_ci_id,
    )?;

    let mut event = CiEvent {
        build_ci_id: build_ci_id.to_string(),
        event_type,
        number: run_number
            .map(|number| number.to_string())
            .unwrap_or_else(|| build_ci_id.to_string()),
        project: component_full_name,
        project_display_name: component.name.clone(),
        // The start timestamp may not have propagated from the source host
        // yet on the first sighting; fall back to the observation time.
        start_time: component
            .started_at
            .map(|started| started.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis()),
        duration: None,
        result: None,
        causes,
        scm_data: None,
        parameters: None,
        multi_branch_type: None,
        parent_ci_id: None,
        branch: None,
        phase_type: None,
        skip_validation: None,
    };

    if event.event_type == CiEventType::Finished {
        event.result = Some(run_result(component.conclusion.as_deref())?);
        event.duration = Some(run_duration(component.started_at, component.completed_at)?);
    }

    Ok(event)
}

/// Build the root event for the workflow run itself.
pub fn root_workflow_event(
    data: &WorkflowEventData,
    pipeline: &PipelineEventData,
    event_type: CiEventType,
    job_ci_id_prefix: &str,
    scm_data: Option<ScmData>,
    parameters: Option<Vec<CiParameter>>,
) -> Result<CiEvent> {
    let causes = build_causes(
        &CauseJobData::Root {
            job_name: job_ci_id_prefix.to_string(),
            cause_type: data.trigger_event.clone(),
            user_id: data.triggering_actor.clone(),
            user_name: data.triggering_actor.clone(),
        },
        &pipeline.build_ci_id,
    )?;

    let mut event = CiEvent {
        build_ci_id: pipeline.build_ci_id.clone(),
        event_type,
        number: data.event_number(),
        project: job_ci_id_prefix.to_string(),
        project_display_name: pipeline.root_job_name.clone(),
        start_time: data
            .run_started_at
            .map(|started| started.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis()),
        duration: None,
        result: None,
        causes,
        scm_data: None,
        parameters,
        multi_branch_type: None,
        parent_ci_id: None,
        branch: None,
        phase_type: None,
        skip_validation: None,
    };

    match event_type {
        CiEventType::Finished => {
            event.duration = Some(run_duration(data.run_started_at, data.run_updated_at)?);
            event.result = Some(run_result(data.conclusion.as_deref())?);
        }
        CiEventType::Scm => {
            event.scm_data = Some(scm_data.ok_or(RelayError::MissingScmData)?);
        }
        _ => {}
    }

    Ok(event)
}

pub fn run_duration(
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<i64> {
    match (started_at, completed_at) {
        (Some(started), Some(completed)) => {
            Ok(completed.timestamp_millis() - started.timestamp_millis())
        }
        _ => Err(RelayError::MissingTimestamps),
    }
}

pub fn run_result(conclusion: Option<&str>) -> Result<BuildResult> {
    let conclusion = conclusion.ok_or(RelayError::MissingRequiredField("conclusion"))?;

    Ok(match conclusion {
        "success" => BuildResult::Success,
        "failure" | "timed_out" => BuildResult::Failure,
        "cancelled" => BuildResult::Aborted,
        "neutral" | "action_required" | "stale" => BuildResult::Unstable,
        _ => BuildResult::Unavailable,
    })
}
