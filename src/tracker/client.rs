use std::collections::HashMap;

use chrono::Utc;
use log::{debug, info};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Token;
use crate::error::{RelayError, Result};
use crate::github::types::ActionsJob;
use crate::util::is_version_greater_or_equal;

use super::events::{CiEvent, CiEventsList, CiParameter, CiServerInfo, PullRequestData};
use super::query::{escape_query_value, Query};
use super::types::{
    CiBuild, CiJob, CiJobUpdate, CiServer, EntityRef, Executor, ExecutorJob, Pipeline,
    PipelineJobEntry, PipelineNode, PipelineUpdate, ResourceList,
};

const SERVER_TYPE: &str = "github_actions";
const PLUGIN_VERSION: &str = "24.4.1";

/// REST client for the CI tracking server.
///
/// Entity CRUD goes through the workspace collections; everything else uses
/// the custom-request channel under the analytics paths.
pub struct TrackerClient {
    client: reqwest::Client,
    base_url: String,
    shared_space: u64,
    workspace: u64,
    client_id: String,
    client_secret: Token,
}

impl TrackerClient {
    pub fn new(
        base_url: String,
        shared_space: u64,
        workspace: u64,
        client_id: String,
        client_secret: Token,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("cirelay/0.3.0")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            shared_space,
            workspace,
            client_id,
            client_secret,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/api/shared_spaces/{}/workspaces/{}/{}",
            self.base_url, self.shared_space, self.workspace, collection
        )
    }

    fn analytics_internal_url(&self, path: &str) -> String {
        format!(
            "{}/internal-api/shared_spaces/{}/analytics/ci/{}",
            self.base_url, self.shared_space, path
        )
    }

    fn analytics_workspace_internal_url(&self, path: &str) -> String {
        format!(
            "{}/internal-api/shared_spaces/{}/workspaces/{}/analytics/ci/{}",
            self.base_url, self.shared_space, self.workspace, path
        )
    }

    fn analytics_url(&self, path: &str) -> String {
        format!(
            "{}/api/shared_spaces/{}/workspaces/{}/analytics/ci/{}",
            self.base_url, self.shared_space, self.workspace, path
        )
    }

    fn parse_url(url: &str) -> Result<Url> {
        Url::parse(url).map_err(|e| RelayError::Config(format!("Invalid server URL: {e}")))
    }

    fn with_params(url: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut parsed = Self::parse_url(url)?;
        parsed.query_pairs_mut().extend_pairs(params);
        Ok(parsed)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&(impl Serialize + ?Sized)>,
    ) -> Result<T> {
        let method_name: &'static str = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            _ => "REQUEST",
        };

        let mut request = self
            .client
            .request(method, url.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.as_str()));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RelayError::Api {
                status: status.as_u16(),
                method: method_name,
                url: url.to_string(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Fire-and-forget variant for endpoints whose response body is not
    /// meaningful to the relay.
    async fn request_no_content(
        &self,
        method: Method,
        url: Url,
        body: Option<&(impl Serialize + ?Sized)>,
    ) -> Result<()> {
        let method_name: &'static str = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            _ => "REQUEST",
        };

        let mut request = self
            .client
            .request(method, url.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.as_str()));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RelayError::Api {
                status: status.as_u16(),
                method: method_name,
                url: url.to_string(),
                message,
            });
        }

        Ok(())
    }

    async fn get_entities<T: DeserializeOwned>(
        &self,
        collection: &str,
        fields: &str,
        query: &Query,
    ) -> Result<ResourceList<T>> {
        let url = Self::with_params(
            &self.collection_url(collection),
            &[("fields", fields), ("query", &query.build())],
        )?;
        let list: ResourceList<T> = self.request(Method::GET, url, None::<&()>).await?;
        debug!(
            "Query on '{collection}' matched {} entit(ies)",
            list.total_count.unwrap_or(list.data.len() as u64)
        );
        Ok(list)
    }

    pub async fn send_events(
        &self,
        events: &[CiEvent],
        instance_id: &str,
        base_url: &str,
    ) -> Result<()> {
        debug!(
            "Sending {} event(s) to the tracking server (instanceId: {instance_id})",
            events.len()
        );

        let payload = CiEventsList {
            server: CiServerInfo {
                instance_id: instance_id.to_string(),
                server_type: SERVER_TYPE.to_string(),
                url: base_url.to_string(),
                version: PLUGIN_VERSION.to_string(),
                sending_time: Utc::now().timestamp_millis(),
            },
            events: events.to_vec(),
        };

        let url = Self::parse_url(&self.analytics_internal_url("events"))?;
        self.request_no_content(Method::PUT, url, Some(&payload))
            .await
    }

    pub async fn send_test_result(
        &self,
        report_xml: &str,
        instance_id: &str,
        job_ci_id: &str,
        build_ci_id: &str,
    ) -> Result<()> {
        debug!(
            "Sending test results for job run with {{jobCiId='{job_ci_id}', buildCiId='{build_ci_id}', instanceId='{instance_id}'}}"
        );

        let url = Self::with_params(
            &self.analytics_internal_url("test-results"),
            &[
                ("skip-errors", "true"),
                ("instance-id", instance_id),
                ("job-ci-id", job_ci_id),
                ("build-ci-id", build_ci_id),
            ],
        )?;

        let response = self
            .client
            .post(url.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.as_str()))
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(report_xml.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RelayError::Api {
                status: status.as_u16(),
                method: "POST",
                url: url.to_string(),
                message,
            });
        }

        Ok(())
    }

    pub async fn create_ci_server(
        &self,
        name: &str,
        instance_id: &str,
        base_url: &str,
    ) -> Result<CiServer> {
        debug!("Creating CI server with {{name='{name}', instanceId='{instance_id}'}}...");

        let body = serde_json::json!({
            "data": [{
                "name": name,
                "instance_id": instance_id,
                "server_type": SERVER_TYPE,
                "url": base_url,
            }]
        });

        let url = Self::with_params(
            &self.collection_url("ci_servers"),
            &[("fields", "instance_id")],
        )?;
        let created: ResourceList<CiServer> =
            self.request(Method::POST, url, Some(&body)).await?;
        created
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::NotFound(format!("Created CI server '{instance_id}'")))
    }

    pub async fn get_ci_server(&self, instance_id: &str) -> Result<Option<CiServer>> {
        debug!("Getting CI server with {{instanceId='{instance_id}'}}...");

        let query = Query::field("instance_id").equals(instance_id);
        let servers: ResourceList<CiServer> = self
            .get_entities("ci_servers", "instance_id,plugin_version", &query)
            .await?;

        Ok(servers.data.into_iter().next())
    }

    pub async fn get_ci_server_or_create(
        &self,
        instance_id: &str,
        name: &str,
        base_url: &str,
        create_on_absence: bool,
    ) -> Result<CiServer> {
        match self.get_ci_server(instance_id).await? {
            Some(server) => Ok(server),
            None if create_on_absence => self.create_ci_server(name, instance_id, base_url).await,
            None => Err(RelayError::NotFound(format!(
                "CI server '{name}' (instanceId='{instance_id}')"
            ))),
        }
    }

    pub async fn create_pipeline(
        &self,
        pipeline_name: &str,
        ci_server: &CiServer,
        job_ci_id_prefix: &str,
        jobs: &[ActionsJob],
        parameters: Option<&[CiParameter]>,
    ) -> Result<Pipeline> {
        debug!("Creating pipeline with {{name='{pipeline_name}'}}...");

        let mut pipeline_jobs: Vec<PipelineJobEntry> = jobs
            .iter()
            .map(|job| PipelineJobEntry {
                name: job.name.clone(),
                job_ci_id: format!("{job_ci_id_prefix}/{}", job.name),
                parameters: None,
            })
            .collect();
        pipeline_jobs.push(PipelineJobEntry {
            name: pipeline_name.to_string(),
            job_ci_id: job_ci_id_prefix.to_string(),
            parameters: parameters.map(<[CiParameter]>::to_vec),
        });

        let body = serde_json::json!({
            "data": [{
                "name": pipeline_name,
                "ci_server": EntityRef::ci_server(&ci_server.id),
                "root_job_ci_id": job_ci_id_prefix,
                "jobs": pipeline_jobs,
            }]
        });

        let url = Self::parse_url(&self.collection_url("pipelines"))?;
        let created: ResourceList<Pipeline> =
            self.request(Method::POST, url, Some(&body)).await?;
        created
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::NotFound(format!("Created pipeline '{pipeline_name}'")))
    }

    pub async fn get_pipeline_or_create(
        &self,
        pipeline_name: &str,
        ci_server: &CiServer,
        create_on_absence: bool,
        job_ci_id_prefix: Option<&str>,
        jobs: Option<&[ActionsJob]>,
        parameters: Option<&[CiParameter]>,
    ) -> Result<Pipeline> {
        debug!("Getting pipeline with {{name='{pipeline_name}'}}...");

        let query = Query::field("name").equals(pipeline_name).and(
            Query::field("ci_server").equals_query(Query::field("id").equals(&ci_server.id)),
        );
        let pipelines: ResourceList<Pipeline> =
            self.get_entities("pipelines", "name,ci_server", &query).await?;

        if let Some(pipeline) = pipelines.data.into_iter().next() {
            return Ok(pipeline);
        }

        if create_on_absence {
            self.create_pipeline(
                pipeline_name,
                ci_server,
                job_ci_id_prefix.unwrap_or_default(),
                jobs.unwrap_or_default(),
                parameters,
            )
            .await
        } else {
            Err(RelayError::NotFound(format!("Pipeline '{pipeline_name}'")))
        }
    }

    pub async fn get_pipeline_by_name(&self, pipeline_name: &str) -> Result<Option<Pipeline>> {
        debug!("Getting pipeline with {{name='{pipeline_name}'}}...");

        let query = Query::field("name").equals(pipeline_name);
        let pipelines: ResourceList<Pipeline> = self
            .get_entities("pipelines", "name,ci_server,multi_branch_type", &query)
            .await?;

        Ok(pipelines.data.into_iter().next())
    }

    /// Pipelines whose root job ci id matches `root_job_ci_id` (the value may
    /// carry a trailing `*` understood by the server as a prefix match).
    pub async fn get_pipelines_by_root_job_ci_id(
        &self,
        root_job_ci_id: &str,
        ci_server: &CiServer,
    ) -> Result<Vec<Pipeline>> {
        debug!("Getting pipelines with {{root_job_ci_id='{root_job_ci_id}'}}...");

        let query = Query::field("root_job")
            .equals_query(Query::field("ci_id").equals(root_job_ci_id))
            .and(Query::field("ci_server").equals_query(Query::field("id").equals(&ci_server.id)));
        let pipelines: ResourceList<Pipeline> =
            self.get_entities("pipelines", "name,ci_server", &query).await?;

        Ok(pipelines.data)
    }

    pub async fn update_pipeline(&self, pipeline: &PipelineUpdate) -> Result<()> {
        debug!("Updating pipeline with {{id='{}'}}...", pipeline.id);

        let body = serde_json::json!({ "data": [pipeline] });
        let url = Self::parse_url(&self.collection_url("pipelines"))?;
        self.request_no_content(Method::PUT, url, Some(&body)).await
    }

    /// Repoint a pipeline to another CI server through the internal update
    /// channel (the entity endpoint does not accept server moves).
    pub async fn update_pipeline_server(
        &self,
        pipeline_id: &str,
        new_ci_server_id: &str,
    ) -> Result<()> {
        debug!(
            "Repointing pipeline {{id='{pipeline_id}'}} to CI server {{id='{new_ci_server_id}'}}..."
        );

        let body = serde_json::json!({
            "id": pipeline_id,
            "ciServer": EntityRef::ci_server(new_ci_server_id),
        });
        let url = Self::parse_url(&self.analytics_workspace_internal_url("pipeline_update"))?;
        self.request_no_content(Method::PUT, url, Some(&body)).await
    }

    pub async fn get_jobs_by_pipeline(&self, pipeline_id: &str) -> Result<Vec<CiJob>> {
        debug!("Getting all the jobs for pipeline with {{id='{pipeline_id}'}}...");

        let query =
            Query::field("pipeline").equals_query(Query::field("id").equals(pipeline_id));
        let nodes: ResourceList<PipelineNode> = self
            .get_entities("pipeline_nodes", "ci_job{ci_id,name}", &query)
            .await?;

        Ok(nodes.data.into_iter().filter_map(|node| node.ci_job).collect())
    }

    pub async fn get_job_builds(&self, job_ci_id: &str) -> Result<Vec<CiBuild>> {
        debug!("Getting job builds for CI job with {{ciId='{job_ci_id}'}}...");

        let query = Query::field("ci_job").equals_query(Query::field("ci_id").equals(job_ci_id));
        let builds: ResourceList<CiBuild> =
            self.get_entities("ci_builds", "start_time", &query).await?;

        Ok(builds.data)
    }

    /// Bulk-update job ci ids and/or server linkage through the internal job
    /// update channel. `ci_server_id` scopes the update to the owning server.
    pub async fn update_ci_jobs(
        &self,
        jobs: &[CiJobUpdate],
        ci_server_id: &str,
    ) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        for job in jobs {
            debug!(
                "Updating job with {{id='{}', name='{}', jobCiId='{}'}}...",
                job.job_id, job.name, job.job_ci_id
            );
        }

        let url = Self::with_params(
            &self.analytics_workspace_internal_url("ci_job_update"),
            &[("ci-server-id", ci_server_id)],
        )?;
        self.request_no_content(Method::PUT, url, Some(jobs)).await
    }

    pub async fn get_executors(
        &self,
        ci_job_id: &str,
        ci_server: &CiServer,
    ) -> Result<Vec<ExecutorJob>> {
        debug!("Getting executors for job with {{ciId='{ci_job_id}'}}...");

        let query = Query::field("ci_id")
            .equals(ci_job_id)
            .and(Query::field("ci_server").equals_query(Query::field("id").equals(&ci_server.id)))
            .and(Query::field("subtype").in_values(&["test_runner", "uft_test_runner"]));
        let jobs: ResourceList<ExecutorJob> =
            self.get_entities("ci_jobs", "executor{name}", &query).await?;

        Ok(jobs.data)
    }

    pub async fn create_executor(&self, body: serde_json::Value) -> Result<Executor> {
        debug!("Creating executor...");

        let wrapped = serde_json::json!({ "data": [body] });
        let url = Self::parse_url(&self.collection_url("executors"))?;
        let created: ResourceList<Executor> =
            self.request(Method::POST, url, Some(&wrapped)).await?;
        created
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::NotFound("Created executor".to_string()))
    }

    pub async fn send_pull_requests(&self, pull_requests: &[PullRequestData]) -> Result<()> {
        debug!("Sending {} pull request(s)...", pull_requests.len());

        let url = Self::parse_url(&self.analytics_url("pull-requests"))?;
        self.request_no_content(Method::PUT, url, Some(pull_requests))
            .await
    }

    /// Server version from the connectivity-status probe.
    pub async fn get_server_version(&self) -> Result<String> {
        let url = Self::parse_url(&self.analytics_internal_url("servers/connectivity/status"))?;
        let status: ConnectivityStatus = self.request(Method::GET, url, None::<&()>).await?;
        Ok(status.server_version)
    }

    pub async fn get_feature_toggles(&self) -> Result<HashMap<String, bool>> {
        let url = Self::parse_url(&self.analytics_internal_url("feature_toggles"))?;
        self.request(Method::GET, url, None::<&()>).await
    }

    pub async fn get_shared_space_name(&self, shared_space_id: u64) -> Result<String> {
        debug!("Getting the name of the shared space {{id='{shared_space_id}'}}...");

        let url = Self::with_params(
            &format!("{}/api/shared_spaces", self.base_url),
            &[
                ("fields", "name"),
                (
                    "query",
                    &format!("\"id EQ {}\"", escape_query_value(&shared_space_id.to_string())),
                ),
            ],
        )?;
        let spaces: ResourceList<NamedEntity> = self.request(Method::GET, url, None::<&()>).await?;

        spaces
            .data
            .into_iter()
            .next()
            .map(|space| space.name)
            .ok_or_else(|| RelayError::NotFound(format!("Shared space '{shared_space_id}'")))
    }

    /// Refresh the registered plugin version when the server still carries an
    /// older one. Safe to call repeatedly.
    pub async fn update_plugin_version_if_needed(
        &self,
        instance_id: &str,
        ci_server: &CiServer,
        self_url: &str,
    ) -> Result<()> {
        info!(
            "Current CI server plugin version: '{}'",
            ci_server.plugin_version.as_deref().unwrap_or("<unset>")
        );

        let needs_update = match ci_server.plugin_version.as_deref() {
            None => true,
            Some(registered) => is_version_greater_or_equal(PLUGIN_VERSION, registered),
        };
        if !needs_update {
            return Ok(());
        }

        info!("Updating CI server plugin version to: '{PLUGIN_VERSION}'");
        let url = Self::with_params(
            &self.analytics_internal_url(&format!("servers/{instance_id}/tasks")),
            &[
                ("self-type", SERVER_TYPE),
                ("api-version", "1"),
                ("sdk-version", ""),
                ("plugin-version", PLUGIN_VERSION),
                ("self-url", self_url),
                ("client-id", &self.client_id),
                ("client-server-user", ""),
            ],
        )?;
        self.request_no_content(Method::GET, url, None::<&()>).await
    }
}

#[derive(Deserialize)]
struct ConnectivityStatus {
    #[serde(rename = "serverVersion")]
    server_version: String,
}

#[derive(Deserialize)]
struct NamedEntity {
    name: String,
}
