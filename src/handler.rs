use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};

use crate::causes::CauseJobData;
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::event::{ActionsEvent, ActionsEventType, WorkflowEventData};
use crate::executor;
use crate::features::Features;
use crate::github::GitHubClient;
use crate::mapper::root_workflow_event;
use crate::migrate::perform_migrations;
use crate::params;
use crate::pipeline::{
    build_pipeline_name, resolve_pipeline_data, update_pipeline_name_if_needed, PipelineEventData,
};
use crate::poll::Poller;
use crate::poller::{
    poll_for_runs_to_finish, JobPoller, JOB_POLL_INTERVAL, JOB_POLL_MAX_IDLE_TRIES,
};
use crate::scm::{collect_scm_data, send_pull_request_data};
use crate::test_results::send_test_results;
use crate::tracker::events::{CiEvent, CiEventType, MultiBranchType, PhaseType};
use crate::tracker::TrackerClient;
use crate::util::{extract_workflow_file_name, is_version_greater_or_equal};

/// Tracking-server version that introduced per-owner CI server records.
const MULTI_INSTANCE_SERVER_VERSION: &str = "25.1.4";

const CHILD_PIPELINE_RESOLVE_INTERVAL: Duration = Duration::from_secs(2);
const CHILD_PIPELINE_RESOLVE_TRIES: u32 = 20;

/// Dispatch one incoming event through the QUEUED → STARTED → FINISHED state
/// machine, or the stateless pull-request path.
pub async fn handle_event(
    event: &ActionsEvent,
    config: &Config,
    tracker: &TrackerClient,
    integration_run_id: u64,
) -> Result<()> {
    let start_time = Utc::now();
    let event_type = ActionsEventType::from_action(event.action.as_deref());

    match event_type {
        ActionsEventType::WorkflowQueued
        | ActionsEventType::WorkflowStarted
        | ActionsEventType::WorkflowFinished => {
            handle_workflow_event(event, event_type, config, tracker, integration_run_id, start_time)
                .await
        }
        ActionsEventType::PullRequestOpened
        | ActionsEventType::PullRequestClosed
        | ActionsEventType::PullRequestEdited
        | ActionsEventType::PullRequestReopened => {
            handle_pull_request_event(event, config, tracker).await
        }
        ActionsEventType::Unknown => Ok(()),
    }
}

async fn handle_workflow_event(
    event: &ActionsEvent,
    event_type: ActionsEventType,
    config: &Config,
    tracker: &TrackerClient,
    integration_run_id: u64,
    start_time: DateTime<Utc>,
) -> Result<()> {
    let data = WorkflowEventData::from_event(event)?;
    let github = config.github_client(&data.owner, &data.repo)?;

    let is_queued = event_type == ActionsEventType::WorkflowQueued;
    let is_started = event_type == ActionsEventType::WorkflowStarted;

    let current_run = github.get_workflow_run(integration_run_id).await?;
    let jobs = github.get_workflow_run_jobs(data.run_id).await?;

    let base_url = config.github.base_url.clone();
    let shared_space = config.tracker_shared_space()?;
    let features = Features::load(tracker).await?;

    let legacy_server = is_legacy_server(tracker).await?;
    let instance_id = ci_server_instance_id(&data.owner, shared_space, legacy_server);
    let server_name = if legacy_server {
        format!("GHA/{}", tracker.get_shared_space_name(shared_space).await?)
    } else {
        format!("GHA-{}", data.owner)
    };

    let ci_server = tracker
        .get_ci_server_or_create(&instance_id, &server_name, &base_url, is_queued)
        .await?;

    if is_queued && !legacy_server {
        tracker
            .update_plugin_version_if_needed(&instance_id, &ci_server, &base_url)
            .await?;
    }

    let workflow_file_name = extract_workflow_file_name(&data.workflow_file_path);
    let short_job_ci_id_prefix = format!("{}/{}/{workflow_file_name}", data.owner, data.repo);
    let job_ci_id_prefix = if is_queued {
        short_job_ci_id_prefix.clone()
    } else {
        format!("{short_job_ci_id_prefix}/{}", data.branch()?)
    };

    let pipeline_name = build_pipeline_name(
        &data,
        &config.pipeline.name_pattern,
        &workflow_file_name,
        event_type != ActionsEventType::WorkflowFinished,
    )?;

    let mut config_parameters = None;
    if is_queued {
        perform_migrations(
            tracker,
            shared_space,
            &data,
            &pipeline_name,
            &short_job_ci_id_prefix,
            &ci_server,
        )
        .await?;

        update_pipeline_name_if_needed(
            tracker,
            &format!("{job_ci_id_prefix}*"),
            &ci_server,
            &pipeline_name,
        )
        .await?;

        if features.pipeline_parameters {
            config_parameters = Some(
                params::parameters_from_config(
                    &github,
                    &workflow_file_name,
                    data.head_branch.as_deref(),
                )
                .await?,
            );
        }
    }

    let mut pipeline_data = resolve_pipeline_data(
        tracker,
        &data,
        &pipeline_name,
        &ci_server,
        is_queued,
        Some(&job_ci_id_prefix),
        Some(&jobs),
        config_parameters.as_deref(),
        &base_url,
    )
    .await?;

    if is_started {
        let branch = data.branch()?.to_string();
        debug!(
            "Creating child pipeline: {}/{branch}",
            pipeline_data.root_job_name
        );

        let child_started_event = CiEvent {
            build_ci_id: pipeline_data.build_ci_id.clone(),
            event_type: CiEventType::Started,
            number: data.event_number(),
            project: job_ci_id_prefix.clone(),
            project_display_name: format!("{}/{branch}", pipeline_data.root_job_name),
            start_time: start_time.timestamp_millis(),
            duration: None,
            result: None,
            causes: vec![],
            scm_data: None,
            parameters: None,
            multi_branch_type: Some(MultiBranchType::Child),
            parent_ci_id: Some(short_job_ci_id_prefix.clone()),
            branch: Some(branch.clone()),
            phase_type: None,
            skip_validation: Some(true),
        };

        tracker
            .send_events(
                &[child_started_event],
                &pipeline_data.instance_id,
                &pipeline_data.base_url,
            )
            .await?;

        // The child record is materialized asynchronously by the event
        // above; poll until it resolves.
        let child_pipeline_name = format!("{}/{branch}", pipeline_data.root_job_name);
        pipeline_data = Poller::new(CHILD_PIPELINE_RESOLVE_INTERVAL, CHILD_PIPELINE_RESOLVE_TRIES)
            .poll(|| {
                resolve_pipeline_data(
                    tracker,
                    &data,
                    &child_pipeline_name,
                    &ci_server,
                    false,
                    None,
                    None,
                    None,
                    &base_url,
                )
            })
            .await?;
    }

    let root_cause = CauseJobData::Root {
        job_name: job_ci_id_prefix.clone(),
        cause_type: data.trigger_event.clone(),
        user_id: data.triggering_actor.clone(),
        user_name: data.triggering_actor.clone(),
    };

    if is_started {
        emit_scm_delta(&github, tracker, &data, &pipeline_data, &job_ci_id_prefix).await?;

        if features.automated_tests {
            if let Some(framework) = &config.tests.framework {
                let identity = executor_identity(config, &data, &workflow_file_name)?;

                executor::get_or_create_executor(
                    tracker,
                    &identity.name,
                    &identity.ci_id,
                    framework,
                    &ci_server,
                )
                .await?;

                let start_event = executor::root_executor_event(
                    &data,
                    &identity.name,
                    &identity.ci_id,
                    &identity.parent_ci_id,
                    data.branch()?,
                    CiEventType::Started,
                    Some(PhaseType::Internal),
                )?;
                tracker
                    .send_events(
                        &[start_event],
                        &pipeline_data.instance_id,
                        &pipeline_data.base_url,
                    )
                    .await?;
            }
        }

        info!("Polling for job updates...");
        JobPoller::new(
            &github,
            tracker,
            &data,
            &pipeline_data,
            &root_cause,
            JOB_POLL_INTERVAL,
        )
        .poll_for_job_updates(JOB_POLL_MAX_IDLE_TRIES)
        .await?;
    } else if event_type == ActionsEventType::WorkflowFinished {
        info!("Waiting for started events to finish up...");
        poll_for_runs_to_finish(
            &github,
            &current_run,
            data.run_id,
            start_time,
            ActionsEventType::WorkflowStarted,
        )
        .await?;

        let parameters = if features.pipeline_parameters {
            let execution_parameters = params::parameters_from_logs(&github, data.run_id).await?;
            (!execution_parameters.is_empty()).then_some(execution_parameters)
        } else {
            None
        };

        let completed_event = root_workflow_event(
            &data,
            &pipeline_data,
            CiEventType::Finished,
            &job_ci_id_prefix,
            None,
            parameters,
        )?;
        tracker
            .send_events(
                &[completed_event],
                &pipeline_data.instance_id,
                &pipeline_data.base_url,
            )
            .await?;

        if features.automated_tests && config.tests.framework.is_some() {
            let identity = executor_identity(config, &data, &workflow_file_name)?;

            let finish_event = executor::root_executor_event(
                &data,
                &identity.name,
                &identity.ci_id,
                &identity.parent_ci_id,
                data.branch()?,
                CiEventType::Finished,
                None,
            )?;
            tracker
                .send_events(
                    &[finish_event],
                    &pipeline_data.instance_id,
                    &pipeline_data.base_url,
                )
                .await?;
        }

        let patterns: Vec<&str> = [
            config.tests.unit_results_pattern.as_deref(),
            config.tests.gherkin_results_pattern.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !patterns.is_empty() {
            send_test_results(
                &github,
                tracker,
                data.run_id,
                &pipeline_data.build_ci_id,
                &job_ci_id_prefix,
                &pipeline_data.instance_id,
                &patterns,
            )
            .await?;
        }
    }

    Ok(())
}

struct ExecutorIdentity {
    name: String,
    ci_id: String,
    parent_ci_id: String,
}

fn executor_identity(
    config: &Config,
    data: &WorkflowEventData,
    workflow_file_name: &str,
) -> Result<ExecutorIdentity> {
    Ok(ExecutorIdentity {
        name: executor::build_executor_name(
            &config.pipeline.name_pattern,
            &data.owner,
            &data.repo,
            &data.workflow_name,
            workflow_file_name,
        ),
        ci_id: executor::build_executor_ci_id(
            &data.owner,
            &data.repo,
            workflow_file_name,
            Some(data.branch()?),
        ),
        parent_ci_id: executor::build_executor_ci_id(
            &data.owner,
            &data.repo,
            workflow_file_name,
            None,
        ),
    })
}

/// On STARTED: when a previous build of this job exists, inject the commit
/// delta since that build as an SCM event.
async fn emit_scm_delta(
    github: &GitHubClient,
    tracker: &TrackerClient,
    data: &WorkflowEventData,
    pipeline_data: &PipelineEventData,
    job_ci_id_prefix: &str,
) -> Result<()> {
    let mut builds = tracker.get_job_builds(job_ci_id_prefix).await?;
    builds.sort_by_key(|build| std::cmp::Reverse(build.start_time));

    // The build being processed is already recorded at this point, so the
    // window opens at the start of the second most recent build.
    if builds.len() < 2 {
        return Ok(());
    }
    let since = match Utc.timestamp_millis_opt(builds[1].start_time) {
        chrono::LocalResult::Single(since) => since,
        _ => return Ok(()),
    };

    let scm_data = match collect_scm_data(github, data, since).await? {
        Some(scm_data) => scm_data,
        None => return Ok(()),
    };

    info!("Injecting commits since {since}...");

    let scm_event = root_workflow_event(
        data,
        pipeline_data,
        CiEventType::Scm,
        job_ci_id_prefix,
        Some(scm_data),
        None,
    )?;
    tracker
        .send_events(&[scm_event], &pipeline_data.instance_id, &pipeline_data.base_url)
        .await
}

async fn handle_pull_request_event(
    event: &ActionsEvent,
    config: &Config,
    tracker: &TrackerClient,
) -> Result<()> {
    info!("Received pull request event...");

    let repository = event
        .repository
        .as_ref()
        .ok_or(RelayError::MissingRequiredField("repository"))?;
    let pull_request = event
        .pull_request
        .as_ref()
        .ok_or(RelayError::MissingRequiredField("pull_request"))?;
    let repo_url = repository
        .html_url
        .as_deref()
        .ok_or(RelayError::MissingRequiredField("repository.html_url"))?;

    let github = config.github_client(&repository.owner.login, &repository.name)?;

    info!("Sending pull request data to the tracking server...");
    send_pull_request_data(&github, tracker, pull_request, repo_url).await
}

/// Servers older than the per-owner convention keep the shared instance id.
async fn is_legacy_server(tracker: &TrackerClient) -> Result<bool> {
    let server_version = tracker.get_server_version().await?;
    let legacy = !is_version_greater_or_equal(&server_version, MULTI_INSTANCE_SERVER_VERSION);
    if legacy {
        warn!(
            "The tracking server version is '{server_version}', older than '{MULTI_INSTANCE_SERVER_VERSION}'. Using the legacy CI server convention."
        );
    }
    Ok(legacy)
}

fn ci_server_instance_id(repository_owner: &str, shared_space: u64, legacy: bool) -> String {
    if legacy {
        format!("GHA/{shared_space}")
    } else {
        format!("GHA-{repository_owner}")
    }
}
