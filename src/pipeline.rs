use log::info;

use crate::error::{RelayError, Result};
use crate::event::WorkflowEventData;
use crate::github::types::ActionsJob;
use crate::tracker::events::CiParameter;
use crate::tracker::types::{CiServer, PipelineUpdate};
use crate::tracker::TrackerClient;

/// Resolved identity of one workflow run, created once per event and handed
/// down to every component that emits for it.
#[derive(Debug, Clone)]
pub struct PipelineEventData {
    pub pipeline_id: String,
    pub instance_id: String,
    pub build_ci_id: String,
    pub base_url: String,
    pub root_job_name: String,
}

/// Render the configured pipeline-name pattern for this event.
///
/// Child (per-branch) pipelines carry a `/branch` suffix on top of the
/// rendered parent name.
pub fn build_pipeline_name(
    data: &WorkflowEventData,
    pattern: &str,
    workflow_file_name: &str,
    is_parent: bool,
) -> Result<String> {
    let branch = data.branch()?;

    let rendered = pattern
        .replace("${repository_owner}", &data.owner)
        .replace("${repository_name}", &data.repo)
        .replace("${workflow_name}", &data.workflow_name)
        .replace("${workflow_file_name}", workflow_file_name);

    Ok(if is_parent {
        rendered
    } else {
        format!("{rendered}/{branch}")
    })
}

/// Look up (or create) the pipeline and assemble the run identity.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_pipeline_data(
    tracker: &TrackerClient,
    data: &WorkflowEventData,
    root_job_name: &str,
    ci_server: &CiServer,
    create_on_absence: bool,
    job_ci_id_prefix: Option<&str>,
    jobs: Option<&[ActionsJob]>,
    parameters: Option<&[CiParameter]>,
    base_url: &str,
) -> Result<PipelineEventData> {
    let pipeline = tracker
        .get_pipeline_or_create(
            root_job_name,
            ci_server,
            create_on_absence,
            job_ci_id_prefix,
            jobs,
            parameters,
        )
        .await?;

    let instance_id = ci_server
        .instance_id
        .clone()
        .ok_or_else(|| RelayError::NotFound(format!("Instance id of CI server '{}'", ci_server.id)))?;

    Ok(PipelineEventData {
        pipeline_id: pipeline.id,
        instance_id,
        build_ci_id: data.build_ci_id(),
        base_url: base_url.to_string(),
        root_job_name: root_job_name.to_string(),
    })
}

/// Align stale pipeline display names with the configured pattern output.
/// Matches both the parent record and its `/branch` children; a no-op when
/// every name already agrees.
pub async fn update_pipeline_name_if_needed(
    tracker: &TrackerClient,
    root_job_ci_id: &str,
    ci_server: &CiServer,
    pipeline_name: &str,
) -> Result<()> {
    let pipelines = tracker
        .get_pipelines_by_root_job_ci_id(root_job_ci_id, ci_server)
        .await?;

    for pipeline in pipelines {
        let name_tokens: Vec<&str> = pipeline.name.split('/').collect();
        if pipeline.name != pipeline_name && name_tokens[0] != pipeline_name {
            let full_pipeline_name = if name_tokens.len() == 2 {
                format!("{pipeline_name}/{}", name_tokens[1])
            } else {
                pipeline_name.to_string()
            };

            info!("Renaming '{}' to '{full_pipeline_name}'", pipeline.name);
            tracker
                .update_pipeline(&PipelineUpdate {
                    id: pipeline.id,
                    name: Some(full_pipeline_name),
                    multi_branch_type: None,
                    ci_server: None,
                })
                .await?;
        }
    }

    Ok(())
}
