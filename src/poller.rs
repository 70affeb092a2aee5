use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info};

use crate::causes::CauseJobData;
use crate::error::Result;
use crate::event::{ActionsEventType, WorkflowEventData};
use crate::github::types::{ActionsJob, RunStatus, WorkflowRun};
use crate::github::GitHubClient;
use crate::mapper::{map_component_to_event, PipelineComponent};
use crate::pipeline::PipelineEventData;
use crate::poll;
use crate::tracker::events::{CiEvent, CiEventType};
use crate::tracker::TrackerClient;

pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const JOB_POLL_MAX_IDLE_TRIES: u32 = 2;
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Per-job progress, local to one polling session. Each set guards one
/// emission so repeated observations of the same state stay silent.
#[derive(Debug, Default)]
struct StepProgress {
    job_event_sent: bool,
    steps_started: HashSet<i64>,
    steps_finished: HashSet<i64>,
}

/// Polls the source host until every job and step of a workflow run has been
/// observed finished, streaming start/finish events exactly once per
/// component transition.
pub struct JobPoller<'a> {
    github: &'a GitHubClient,
    tracker: &'a TrackerClient,
    data: &'a WorkflowEventData,
    pipeline: &'a PipelineEventData,
    root_cause: &'a CauseJobData,
    interval: Duration,
}

impl<'a> JobPoller<'a> {
    pub fn new(
        github: &'a GitHubClient,
        tracker: &'a TrackerClient,
        data: &'a WorkflowEventData,
        pipeline: &'a PipelineEventData,
        root_cause: &'a CauseJobData,
        interval: Duration,
    ) -> Self {
        Self {
            github,
            tracker,
            data,
            pipeline,
            root_cause,
            interval,
        }
    }

    /// Top-level poll loop: drain a FIFO queue of not-yet-finished jobs,
    /// replenished each cycle from the run's current job list.
    ///
    /// An empty queue bumps an idle-try counter; at `max_idle_tries` the
    /// run's own conclusion decides between waiting further (jobs may not
    /// have been reported yet) and terminating.
    pub async fn poll_for_job_updates(&self, max_idle_tries: u32) -> Result<()> {
        let mut done = false;
        let mut try_count: u32 = 1;
        let mut jobs_finished: HashSet<u64> = HashSet::new();
        let mut job_queue: VecDeque<u64> = VecDeque::new();

        while !done {
            let mut jobs = self.github.get_workflow_run_jobs(self.data.run_id).await?;
            jobs.sort_by_key(|job| (job.started_at.is_none(), job.started_at));

            enqueue_new_jobs(&mut job_queue, &jobs_finished, &jobs);

            if let Some(job_id) = job_queue.pop_front() {
                try_count = 1;
                info!(
                    "Polling step updates for job {job_id} [{}/{}]...",
                    jobs_finished.len() + 1,
                    jobs.len()
                );
                self.poll_for_job_step_updates(job_id).await?;
                jobs_finished.insert(job_id);
            } else if try_count == max_idle_tries {
                let workflow_run = self.github.get_workflow_run(self.data.run_id).await?;
                if workflow_run.conclusion.is_none() {
                    try_count -= 1;
                    debug!("The workflow run is not completed. Will continue to wait for jobs...");
                } else {
                    done = true;
                    debug!("All the jobs in the workflow run have been completed.");
                }
            } else {
                try_count += 1;
                poll::sleep(self.interval).await;
            }
        }

        Ok(())
    }

    /// Step-level sub-loop for one job: observe, emit due events, sleep,
    /// repeat; one extra flush iteration after every step has concluded so
    /// the job's own FINISHED event goes out.
    async fn poll_for_job_step_updates(&self, job_id: u64) -> Result<()> {
        let mut progress = StepProgress::default();
        let mut done = false;
        let mut all_steps_finished = false;

        while !done {
            done = all_steps_finished;

            let job = self.github.get_job(job_id).await?;
            let (events, now_finished) = collect_job_events(
                &mut progress,
                &job,
                all_steps_finished,
                self.root_cause,
                &self.pipeline.build_ci_id,
                self.data.run_number,
            )?;
            all_steps_finished = now_finished;

            if !events.is_empty() {
                self.tracker
                    .send_events(&events, &self.pipeline.instance_id, &self.pipeline.base_url)
                    .await?;
            }

            poll::sleep(self.interval).await;
        }

        Ok(())
    }
}

/// Append every job id not already finished and not already queued.
fn enqueue_new_jobs(
    job_queue: &mut VecDeque<u64>,
    jobs_finished: &HashSet<u64>,
    jobs: &[ActionsJob],
) {
    for job in jobs {
        if !jobs_finished.contains(&job.id) && !job_queue.contains(&job.id) {
            job_queue.push_back(job.id);
        }
    }
}

/// One observation's emissions for a job and its steps.
///
/// The job-level event goes out on the first observation and on the
/// finishing observation, never in between. Steps are handled in ordinal
/// order: a step first seen already finished gets a synthetic STARTED
/// immediately before its FINISHED; both transitions are emitted at most
/// once per step. Returns the events plus whether every step has concluded.
fn collect_job_events(
    progress: &mut StepProgress,
    job: &ActionsJob,
    all_steps_finished: bool,
    root_cause: &CauseJobData,
    build_ci_id: &str,
    run_number: Option<u64>,
) -> Result<(Vec<CiEvent>, bool)> {
    let mut events = Vec::new();

    let job_event = map_component_to_event(
        &PipelineComponent::from(job),
        root_cause,
        build_ci_id,
        all_steps_finished,
        run_number,
    )?;
    let job_finished = job_event.event_type == CiEventType::Finished;
    if !progress.job_event_sent || job_finished {
        events.push(job_event);
        progress.job_event_sent = true;
    }

    let mut steps = job.steps.clone();
    steps.sort_by_key(|step| step.number);
    let now_all_finished = steps.iter().all(|step| step.conclusion.is_some());

    let job_cause = CauseJobData::child_of(
        root_cause,
        format!("{}/{}", root_cause.job_name(), job.name),
    );

    for step in &steps {
        let step_event = map_component_to_event(
            &PipelineComponent::from(step),
            &job_cause,
            build_ci_id,
            true,
            run_number,
        )?;

        if step_event.event_type == CiEventType::Finished {
            if !progress.steps_started.contains(&step.number) {
                // Fast step: pair the finish with a synthetic start.
                events.push(CiEvent {
                    event_type: CiEventType::Started,
                    duration: None,
                    result: None,
                    ..step_event.clone()
                });
                progress.steps_started.insert(step.number);
            }
            if progress.steps_finished.insert(step.number) {
                events.push(step_event);
            }
        } else if progress.steps_started.insert(step.number) {
            events.push(step_event);
        }
    }

    Ok((events, now_all_finished))
}

/// Wait until no sibling integration run of this workflow still carries a
/// `<phase>` job for `workflow_run_id`. Substitutes for a lock between the
/// STARTED-phase side effects and the terminal event.
pub async fn poll_for_runs_to_finish(
    github: &GitHubClient,
    current_run: &WorkflowRun,
    workflow_run_id: u64,
    before: DateTime<Utc>,
    phase: ActionsEventType,
) -> Result<()> {
    loop {
        let not_finished_runs = get_not_finished_runs(github, before, current_run).await?;

        let jobs_per_run = join_all(
            not_finished_runs
                .iter()
                .map(|run| github.get_workflow_run_jobs(run.id)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let runs_to_wait_for = jobs_per_run
            .iter()
            .filter(|jobs| run_handles_phase(jobs, phase, workflow_run_id))
            .count();

        if runs_to_wait_for == 0 {
            return Ok(());
        }

        debug!("Waiting for {runs_to_wait_for} sibling integration run(s) to finish up...");
        poll::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

async fn get_not_finished_runs(
    github: &GitHubClient,
    before: DateTime<Utc>,
    current_run: &WorkflowRun,
) -> Result<Vec<WorkflowRun>> {
    let mut runs = Vec::new();
    for status in [
        RunStatus::InProgress,
        RunStatus::Queued,
        RunStatus::Requested,
        RunStatus::Waiting,
    ] {
        runs.extend(
            github
                .get_workflow_runs_triggered_before_by_status(
                    before,
                    current_run.workflow_id,
                    status,
                )
                .await?,
        );
    }
    Ok(runs
        .into_iter()
        .filter(|run| run.id != current_run.id)
        .collect())
}

/// Integration job names carry `<name>#<action>#<triggering run id>`.
fn run_handles_phase(jobs: &[ActionsJob], phase: ActionsEventType, workflow_run_id: u64) -> bool {
    jobs.iter().any(|job| {
        let mut components = job.name.split('#');
        let _name = components.next();
        let action = components.next();
        let triggered_by = components.next().and_then(|id| id.parse::<u64>().ok());
        action == Some(phase.action_str()) && triggered_by == Some(workflow_run_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::JobStep;

    fn root_cause() -> CauseJobData {
        CauseJobData::Root {
            job_name: "acme/widgets/ci.yml/main".to_string(),
            cause_type: Some("push".to_string()),
            user_id: None,
            user_name: None,
        }
    }

    fn step(number: i64, conclusion: Option<&str>) -> JobStep {
        JobStep {
            name: format!("step-{number}"),
            number,
            conclusion: conclusion.map(str::to_string),
            started_at: Some("2024-05-01T10:00:00Z".parse().unwrap()),
            completed_at: conclusion.map(|_| "2024-05-01T10:01:00Z".parse().unwrap()),
        }
    }

    fn job(id: u64, conclusion: Option<&str>, steps: Vec<JobStep>) -> ActionsJob {
        ActionsJob {
            id,
            name: "build".to_string(),
            conclusion: conclusion.map(str::to_string),
            started_at: Some("2024-05-01T10:00:00Z".parse().unwrap()),
            completed_at: conclusion.map(|_| "2024-05-01T10:02:00Z".parse().unwrap()),
            steps,
        }
    }

    fn kinds(events: &[CiEvent]) -> Vec<(String, CiEventType)> {
        events
            .iter()
            .map(|event| (event.project_display_name.clone(), event.event_type))
            .collect()
    }

    #[test]
    fn test_fast_step_gets_synthetic_started_then_finished() {
        let mut progress = StepProgress::default();
        let observed = job(1, None, vec![step(1, Some("success"))]);

        let (events, all_finished) =
            collect_job_events(&mut progress, &observed, false, &root_cause(), "42", None)
                .unwrap();

        assert!(all_finished);
        assert_eq!(
            kinds(&events),
            vec![
                ("build".to_string(), CiEventType::Started),
                ("step-1".to_string(), CiEventType::Started),
                ("step-1".to_string(), CiEventType::Finished),
            ]
        );
        // Synthetic STARTED must not smuggle finish-only fields.
        assert!(events[1].duration.is_none());
        assert!(events[1].result.is_none());
        assert!(events[2].duration.is_some());

        // A further observation of the same state emits nothing new for the
        // step and no redundant job STARTED.
        let observed = job(1, Some("success"), vec![step(1, Some("success"))]);
        let (events, _) =
            collect_job_events(&mut progress, &observed, false, &root_cause(), "42", None)
                .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_slow_step_emits_started_once_then_finished_once() {
        let mut progress = StepProgress::default();

        let observed = job(1, None, vec![step(1, None)]);
        let (events, all_finished) =
            collect_job_events(&mut progress, &observed, false, &root_cause(), "42", None)
                .unwrap();
        assert!(!all_finished);
        assert_eq!(
            kinds(&events),
            vec![
                ("build".to_string(), CiEventType::Started),
                ("step-1".to_string(), CiEventType::Started),
            ]
        );

        // Step still running: nothing to re-emit.
        let (events, _) =
            collect_job_events(&mut progress, &observed, false, &root_cause(), "42", None)
                .unwrap();
        assert!(events.is_empty());

        let observed = job(1, None, vec![step(1, Some("success"))]);
        let (events, all_finished) =
            collect_job_events(&mut progress, &observed, false, &root_cause(), "42", None)
                .unwrap();
        assert!(all_finished);
        assert_eq!(
            kinds(&events),
            vec![("step-1".to_string(), CiEventType::Finished)]
        );
    }

    #[test]
    fn test_two_jobs_two_polls_scenario_emits_eight_events() {
        let mut total = Vec::new();

        for job_id in [1, 2] {
            let mut progress = StepProgress::default();
            let mut all_finished = false;
            let job_name = format!("build-{job_id}");

            // First poll: job running, step unfinished.
            let mut observed = job(job_id, None, vec![step(1, None)]);
            observed.name = job_name.clone();
            let (events, now_finished) = collect_job_events(
                &mut progress,
                &observed,
                all_finished,
                &root_cause(),
                "42",
                None,
            )
            .unwrap();
            all_finished = now_finished;
            total.extend(events);

            // Second poll: step finished.
            let mut observed = job(job_id, Some("success"), vec![step(1, Some("success"))]);
            observed.name = job_name.clone();
            let (events, now_finished) = collect_job_events(
                &mut progress,
                &observed,
                all_finished,
                &root_cause(),
                "42",
                None,
            )
            .unwrap();
            all_finished = now_finished;
            total.extend(events);

            // Flush: every step concluded, the job event turns FINISHED.
            let (events, _) = collect_job_events(
                &mut progress,
                &observed,
                all_finished,
                &root_cause(),
                "42",
                None,
            )
            .unwrap();
            total.extend(events);

            let job_events: Vec<_> = total
                .iter()
                .filter(|event| event.project_display_name == job_name)
                .collect();
            let started_index = job_events
                .iter()
                .position(|event| event.event_type == CiEventType::Started)
                .unwrap();
            let finished_index = job_events
                .iter()
                .position(|event| event.event_type == CiEventType::Finished)
                .unwrap();
            assert!(started_index < finished_index);
        }

        let started = total
            .iter()
            .filter(|event| event.event_type == CiEventType::Started)
            .count();
        let finished = total
            .iter()
            .filter(|event| event.event_type == CiEventType::Finished)
            .count();
        assert_eq!(total.len(), 8);
        assert_eq!(started, 4);
        assert_eq!(finished, 4);
    }

    #[test]
    fn test_job_without_steps_counts_as_all_finished() {
        let mut progress = StepProgress::default();
        let observed = job(1, None, vec![]);

        let (events, all_finished) =
            collect_job_events(&mut progress, &observed, false, &root_cause(), "42", None)
                .unwrap();

        assert!(all_finished);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CiEventType::Started);
    }

    #[test]
    fn test_enqueue_deduplicates_by_id() {
        let mut queue = VecDeque::from([2]);
        let finished = HashSet::from([1]);
        let jobs = vec![
            job(1, Some("success"), vec![]),
            job(2, None, vec![]),
            job(3, None, vec![]),
        ];

        enqueue_new_jobs(&mut queue, &finished, &jobs);

        assert_eq!(queue, VecDeque::from([2, 3]));
    }

    #[test]
    fn test_run_handles_phase_parses_integration_job_names() {
        let mut integration_job = job(9, None, vec![]);
        integration_job.name = "TrackerIntegration#in_progress#4242".to_string();

        assert!(run_handles_phase(
            &[integration_job.clone()],
            ActionsEventType::WorkflowStarted,
            4242
        ));
        assert!(!run_handles_phase(
            &[integration_job.clone()],
            ActionsEventType::WorkflowQueued,
            4242
        ));
        assert!(!run_handles_phase(
            &[integration_job],
            ActionsEventType::WorkflowStarted,
            9999
        ));

        let plain_job = job(3, None, vec![]);
        assert!(!run_handles_phase(
            &[plain_job],
            ActionsEventType::WorkflowStarted,
            4242
        ));
    }
}
