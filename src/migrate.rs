use log::info;

use crate::error::Result;
use crate::event::WorkflowEventData;
use crate::tracker::events::MultiBranchType;
use crate::tracker::types::{CiJob, CiJobUpdate, CiServer, CiServerIdRef, PipelineUpdate};
use crate::tracker::TrackerClient;

/// One-time structural upgrades, attempted on every QUEUED event. Each
/// upgrade re-checks its precondition first, so repeated invocations are
/// no-ops.
pub async fn perform_migrations(
    tracker: &TrackerClient,
    shared_space: u64,
    data: &WorkflowEventData,
    pipeline_name: &str,
    ci_id_prefix: &str,
    ci_server: &CiServer,
) -> Result<()> {
    upgrade_to_multi_branch_if_needed(
        tracker,
        shared_space,
        &data.workflow_name,
        pipeline_name,
        ci_id_prefix,
    )
    .await?;

    migrate_ci_server_if_needed(tracker, shared_space, ci_server, pipeline_name).await
}

/// Single-branch → multi-branch upgrade: rewrite the legacy pipeline's job
/// ci-ids to the hierarchical prefix and flip it to a PARENT record.
async fn upgrade_to_multi_branch_if_needed(
    tracker: &TrackerClient,
    shared_space: u64,
    workflow_name: &str,
    new_pipeline_name: &str,
    ci_id_prefix: &str,
) -> Result<()> {
    let shared_space_name = tracker.get_shared_space_name(shared_space).await?;
    let old_pipeline_name = format!("GHA/{shared_space_name}/{workflow_name}");

    let pipeline = match tracker.get_pipeline_by_name(&old_pipeline_name).await? {
        Some(pipeline) if pipeline.multi_branch_type.is_none() => pipeline,
        _ => return Ok(()),
    };

    info!("Migrating '{old_pipeline_name}' to multi-branch pipeline...");

    let jobs = tracker.get_jobs_by_pipeline(&pipeline.id).await?;
    let updates = job_ci_id_updates(&jobs, ci_id_prefix, &old_pipeline_name, new_pipeline_name);
    if let Some(server) = &pipeline.ci_server {
        tracker.update_ci_jobs(&updates, &server.id).await?;
    }

    tracker
        .update_pipeline(&PipelineUpdate {
            id: pipeline.id,
            name: Some(new_pipeline_name.to_string()),
            multi_branch_type: Some(MultiBranchType::Parent),
            ci_server: None,
        })
        .await
}

/// Repoint a pipeline still linked to the legacy shared CI server record at
/// the per-owner one, relinking all its jobs.
async fn migrate_ci_server_if_needed(
    tracker: &TrackerClient,
    shared_space: u64,
    new_ci_server: &CiServer,
    pipeline_name: &str,
) -> Result<()> {
    let old_instance_id = format!("GHA/{shared_space}");

    let old_ci_server = match tracker.get_ci_server(&old_instance_id).await? {
        Some(server) => server,
        None => return Ok(()),
    };

    let pipeline = match tracker.get_pipeline_by_name(pipeline_name).await? {
        Some(pipeline) => pipeline,
        None => return Ok(()),
    };

    let linked_to_old = pipeline
        .ci_server
        .as_ref()
        .is_some_and(|server| server.id == old_ci_server.id);
    if new_ci_server.instance_id == old_ci_server.instance_id || !linked_to_old {
        return Ok(());
    }

    info!(
        "Migrating CI server '{}' to '{}'...",
        old_ci_server.instance_id.as_deref().unwrap_or_default(),
        new_ci_server.instance_id.as_deref().unwrap_or_default()
    );

    tracker
        .update_pipeline_server(&pipeline.id, &new_ci_server.id)
        .await?;

    let jobs = tracker.get_jobs_by_pipeline(&pipeline.id).await?;
    let updates = server_relink_updates(&jobs, &new_ci_server.id);
    tracker.update_ci_jobs(&updates, &old_ci_server.id).await
}

/// Rewrite job ci-ids that do not yet carry the hierarchical prefix. The
/// legacy root job takes the new pipeline name and the bare prefix as id.
fn job_ci_id_updates(
    jobs: &[CiJob],
    ci_id_prefix: &str,
    old_pipeline_name: &str,
    new_pipeline_name: &str,
) -> Vec<CiJobUpdate> {
    jobs.iter()
        .filter_map(|job| {
            let (ci_id, name) = match (&job.ci_id, &job.name) {
                (Some(ci_id), Some(name)) => (ci_id, name),
                _ => return None,
            };
            if ci_id.starts_with(ci_id_prefix) {
                return None;
            }

            Some(if name == old_pipeline_name {
                CiJobUpdate {
                    job_id: job.id.clone(),
                    name: new_pipeline_name.to_string(),
                    job_ci_id: ci_id_prefix.to_string(),
                    ci_server: None,
                }
            } else {
                CiJobUpdate {
                    job_id: job.id.clone(),
                    name: name.clone(),
                    job_ci_id: format!("{ci_id_prefix}/{name}"),
                    ci_server: None,
                }
            })
        })
        .collect()
}

/// Relink every job to the new CI server, keeping names and ci-ids.
fn server_relink_updates(jobs: &[CiJob], new_ci_server_id: &str) -> Vec<CiJobUpdate> {
    jobs.iter()
        .map(|job| CiJobUpdate {
            job_id: job.id.clone(),
            name: job.name.clone().unwrap_or_default(),
            job_ci_id: job.ci_id.clone().unwrap_or_default(),
            ci_server: Some(CiServerIdRef {
                id: new_ci_server_id.to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;

    fn ci_job(id: &str, name: &str, ci_id: &str) -> CiJob {
        CiJob {
            id: id.to_string(),
            name: Some(name.to_string()),
            ci_id: Some(ci_id.to_string()),
        }
    }

    #[test]
    fn test_job_ci_id_updates_rewrites_legacy_ids() {
        let jobs = vec![
            ci_job("1", "GHA/space/CI", "GHA/space/CI"),
            ci_job("2", "build", "build"),
            ci_job("3", "test", "acme/widgets/ci.yml/test"),
        ];

        let updates = job_ci_id_updates(&jobs, "acme/widgets/ci.yml", "GHA/space/CI", "acme/widgets/CI");

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].name, "acme/widgets/CI");
        assert_eq!(updates[0].job_ci_id, "acme/widgets/ci.yml");
        assert_eq!(updates[1].name, "build");
        assert_eq!(updates[1].job_ci_id, "acme/widgets/ci.yml/build");
    }

    #[test]
    fn test_job_ci_id_updates_is_empty_once_migrated() {
        let jobs = vec![
            ci_job("1", "acme/widgets/CI", "acme/widgets/ci.yml"),
            ci_job("2", "build", "acme/widgets/ci.yml/build"),
        ];

        let updates = job_ci_id_updates(&jobs, "acme/widgets/ci.yml", "GHA/space/CI", "acme/widgets/CI");

        assert!(updates.is_empty());
    }

    #[test]
    fn test_server_relink_updates_point_at_new_server() {
        let jobs = vec![ci_job("1", "build", "acme/widgets/ci.yml/build")];

        let updates = server_relink_updates(&jobs, "77");

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].ci_server.as_ref().unwrap().id, "77");
        assert_eq!(updates[0].job_ci_id, "acme/widgets/ci.yml/build");
    }

    #[tokio::test]
    async fn test_multi_branch_upgrade_is_noop_when_already_upgraded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/shared_spaces")
            .match_query(mockito::Matcher::Any)
            .with_body(
                serde_json::json!({"total_count": 1, "data": [{"name": "space"}]}).to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api/shared_spaces/1001/workspaces/1002/pipelines")
            .match_query(mockito::Matcher::Any)
            .with_body(
                serde_json::json!({
                    "total_count": 1,
                    "data": [{
                        "id": "p1",
                        "name": "GHA/space/CI",
                        "multi_branch_type": "parent",
                        "ci_server": {"type": "ci_server", "id": "9"}
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let update_pipeline = server
            .mock("PUT", "/api/shared_spaces/1001/workspaces/1002/pipelines")
            .expect(0)
            .create_async()
            .await;
        let update_jobs = server
            .mock(
                "PUT",
                "/internal-api/shared_spaces/1001/workspaces/1002/analytics/ci/ci_job_update",
            )
            .match_query(mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let tracker = TrackerClient::new(
            server.url(),
            1001,
            1002,
            "client".to_string(),
            Token::from("secret"),
        )
        .unwrap();

        upgrade_to_multi_branch_if_needed(&tracker, 1001, "CI", "acme/widgets/CI", "acme/widgets/ci.yml")
            .await
            .unwrap();

        update_pipeline.assert_async().await;
        update_jobs.assert_async().await;
    }
}
