use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::Token;
use crate::error::{RelayError, Result};

use super::types::{ActionsJob, Artifact, Commit, FileContent, RunStatus, WorkflowRun};

const PER_PAGE: usize = 100;

/// GitHub API client scoped to a single repository.
///
/// All list endpoints paginate transparently; callers receive fully
/// materialized vectors.
pub struct GitHubClient {
    client: reqwest::Client,
    /// Redirect-following is disabled here so signed storage locations can
    /// be read from the `Location` header.
    no_redirect_client: reqwest::Client,
    base_url: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(base_url: String, owner: String, repo: String, token: Option<Token>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("cirelay/0.3.0"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|e| RelayError::Config(format!("Invalid API token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers.clone())
            .build()?;
        let no_redirect_client = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            owner,
            repo,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.base_url, self.owner, self.repo, path
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RelayError::Api {
                status: status.as_u16(),
                method: "GET",
                url: url.to_string(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn get_workflow_run(&self, run_id: u64) -> Result<WorkflowRun> {
        debug!("Getting workflow run with {{run_id='{run_id}'}}...");
        self.get_json(&self.repo_url(&format!("actions/runs/{run_id}")))
            .await
    }

    pub async fn get_workflow_run_jobs(&self, run_id: u64) -> Result<Vec<ActionsJob>> {
        debug!("Getting all jobs for workflow run with {{run_id='{run_id}'}}...");

        let mut all_jobs = Vec::new();
        let mut page = 1;
        loop {
            let url = self.repo_url(&format!(
                "actions/runs/{run_id}/jobs?per_page={PER_PAGE}&page={page}"
            ));
            let response: JobsResponse = self.get_json(&url).await?;
            let fetched = response.jobs.len();
            all_jobs.extend(response.jobs);

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_jobs)
    }

    pub async fn get_job(&self, job_id: u64) -> Result<ActionsJob> {
        debug!("Getting job with {{job_id='{job_id}'}}...");
        self.get_json(&self.repo_url(&format!("actions/jobs/{job_id}")))
            .await
    }

    /// List runs of a workflow in the given lifecycle state that started
    /// before `before`, restricted to `workflow_run`-triggered runs.
    pub async fn get_workflow_runs_triggered_before_by_status(
        &self,
        before: DateTime<Utc>,
        workflow_id: u64,
        status: RunStatus,
    ) -> Result<Vec<WorkflowRun>> {
        debug!(
            "Getting workflow runs before '{before}' with {{workflow_id='{workflow_id}', status='{}'}}...",
            status.as_str()
        );

        let mut all_runs = Vec::new();
        let mut page = 1;
        loop {
            let url = self.repo_url(&format!(
                "actions/workflows/{workflow_id}/runs?event=workflow_run&status={}&per_page={PER_PAGE}&page={page}",
                status.as_str()
            ));
            let response: RunsResponse = self.get_json(&url).await?;
            let fetched = response.workflow_runs.len();
            all_runs.extend(response.workflow_runs);

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_runs
            .into_iter()
            .filter(|run| matches!(run.run_started_at, Some(started) if started < before))
            .collect())
    }

    pub async fn get_workflow_run_artifacts(&self, run_id: u64) -> Result<Vec<Artifact>> {
        debug!("Getting artifacts for workflow run with {{run_id='{run_id}'}}...");

        let mut all_artifacts = Vec::new();
        let mut page = 1;
        loop {
            let url = self.repo_url(&format!(
                "actions/runs/{run_id}/artifacts?per_page={PER_PAGE}&page={page}"
            ));
            let response: ArtifactsResponse = self.get_json(&url).await?;
            let fetched = response.artifacts.len();
            all_artifacts.extend(response.artifacts);

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_artifacts)
    }

    pub async fn download_artifact(&self, artifact_id: u64) -> Result<Vec<u8>> {
        info!("Downloading artifact with {{artifact_id='{artifact_id}'}}...");

        let url = self.repo_url(&format!("actions/artifacts/{artifact_id}/zip"));
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RelayError::Api {
                status: status.as_u16(),
                method: "GET",
                url,
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Commit SHAs on `branch` authored at or after `since`, newest first.
    pub async fn get_commit_ids(
        &self,
        branch: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let iso_since = since.format("%Y-%m-%dT%H:%M:%SZ");
        debug!("Getting commits since '{iso_since}' for branch '{branch}'...");

        let mut all_shas = Vec::new();
        let mut page = 1;
        loop {
            let url = self.repo_url(&format!(
                "commits?sha={branch}&since={iso_since}&per_page={PER_PAGE}&page={page}"
            ));
            let commits: Vec<CommitRef> = self.get_json(&url).await?;
            let fetched = commits.len();
            all_shas.extend(commits.into_iter().map(|commit| commit.sha));

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_shas)
    }

    pub async fn get_commit(&self, sha: &str) -> Result<Commit> {
        debug!("Getting commit with {{ref='{sha}'}}...");
        self.get_json(&self.repo_url(&format!("commits/{sha}")))
            .await
    }

    pub async fn get_pull_request_commit_ids(&self, pull_number: u64) -> Result<Vec<String>> {
        debug!("Getting commits for pull request with {{pull_number='{pull_number}'}}...");

        let mut all_shas = Vec::new();
        let mut page = 1;
        loop {
            let url = self.repo_url(&format!(
                "pulls/{pull_number}/commits?per_page={PER_PAGE}&page={page}"
            ));
            let commits: Vec<CommitRef> = self.get_json(&url).await?;
            let fetched = commits.len();
            all_shas.extend(commits.into_iter().map(|commit| commit.sha));

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_shas)
    }

    /// Location of the run's log archive, readable without API auth.
    pub async fn get_download_logs_url(&self, run_id: u64) -> Result<Option<String>> {
        info!("Locating logs for workflow run with {{run_id='{run_id}'}}...");

        let url = self.repo_url(&format!("actions/runs/{run_id}/logs"));
        let response = self.no_redirect_client.get(&url).send().await?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if location.is_none() {
            warn!("Couldn't get the location of the log files for workflow run with {{run_id='{run_id}'}}");
        }

        Ok(location)
    }

    pub async fn get_workflow_file(
        &self,
        workflow_file_name: &str,
        branch: Option<&str>,
    ) -> Result<FileContent> {
        info!(
            "Getting the configuration file for workflow with {{workflow_file_name='{workflow_file_name}'}}..."
        );

        let mut url = self.repo_url(&format!("contents/.github/workflows/{workflow_file_name}"));
        if let Some(branch) = branch {
            url.push_str(&format!("?ref={branch}"));
        }

        self.get_json(&url).await
    }
}

#[derive(Deserialize)]
struct JobsResponse {
    jobs: Vec<ActionsJob>,
}

#[derive(Deserialize)]
struct RunsResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct ArtifactsResponse {
    artifacts: Vec<Artifact>,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}
