//! Docker Engine API client.
//!
//! Every call goes over HTTP to `runtime.endpoint`, normally a socket proxy
//! that only exposes the container and exec endpoints.

use alloc::collections::BTreeMap;
use core::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary, CreatedContainer,
    ExecOutput, RuntimeError, demux_stream,
};

const API_VERSION: &str = "v1.43";
const STOP_GRACE_SECS: &str = "10";

/// [`ContainerRuntime`] backed by the Docker Engine HTTP API.
#[derive(Debug, Clone)]
pub struct DockerClient {
    http: Client,
    base: Url,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    state: InspectState,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
    #[serde(default)]
    health: Option<InspectHealth>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecInspect {
    exit_code: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecCreate<'req> {
    attach_stdout: bool,
    attach_stderr: bool,
    cmd: &'req [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'req str>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

impl DockerClient {
    /// Creates a client for the runtime API at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL or the HTTP client cannot be built.
    pub fn new(endpoint: &str, request_timeout: Duration) -> eyre::Result<Self> {
        let mut base = Url::parse(endpoint)?;
        base.path_segments_mut()
            .map_err(|()| eyre::eyre!("runtime endpoint cannot be a base URL: {endpoint}"))?
            .pop_if_empty()
            .push(API_VERSION);
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, base })
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str], query: &[(&str, &str)]) -> RequestBuilder {
        self.http.request(method, self.url(segments, query))
    }
}

/// Turns a non-success response into [`RuntimeError::Api`].
async fn api_error(response: Response) -> RuntimeError {
    let status = response.status().as_u16();
    let message = match response.json::<ApiMessage>().await {
        Ok(body) => body.message,
        Err(_) => "no error message".to_string(),
    };
    RuntimeError::Api { status, message }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list(
        &self,
        all: bool,
        name_prefix: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filters = json!({ "name": [name_prefix] }).to_string();
        let all = if all { "true" } else { "false" };
        let response = self
            .request(
                Method::GET,
                &["containers", "json"],
                &[("all", all), ("filters", &filters)],
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let entries: Vec<ListEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .flat_map(|entry| {
                let ListEntry {
                    id,
                    names,
                    state,
                    status,
                } = entry;
                names.into_iter().map(move |name| ContainerSummary {
                    id: id.clone(),
                    name: name.trim_start_matches('/').to_string(),
                    state: state.clone(),
                    status: status.clone(),
                })
            })
            // the runtime's name filter is a substring match
            .filter(|summary| summary.name.starts_with(name_prefix))
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState, RuntimeError> {
        let response = self
            .request(Method::GET, &["containers", name, "json"], &[])
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(ContainerState::Absent),
            status if !status.is_success() => return Err(api_error(response).await),
            _ => {}
        }
        let InspectResponse { state } = response.json().await?;
        Ok(match (state.running, state.health) {
            (false, _) => ContainerState::Stopped,
            (true, None) => ContainerState::Running,
            (true, Some(health)) => match health.status.as_str() {
                "healthy" => ContainerState::Healthy,
                "unhealthy" => ContainerState::Unhealthy,
                _ => ContainerState::Running,
            },
        })
    }

    #[tracing::instrument(skip_all, fields(container = %spec.name))]
    async fn create(&self, spec: &ContainerSpec) -> Result<CreatedContainer, RuntimeError> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let labels: BTreeMap<&str, &str> = [("tenantgate.managed", "true")].into();
        let body = json!({
            "Image": spec.image,
            "Cmd": spec.command,
            "Env": env,
            "Labels": labels,
            "Healthcheck": {
                "Test": spec.healthcheck.test(),
                "Interval": nanos(spec.healthcheck.interval),
                "Timeout": nanos(spec.healthcheck.timeout),
                "Retries": spec.healthcheck.retries,
                "StartPeriod": nanos(spec.healthcheck.start_period),
            },
            "HostConfig": {
                "RestartPolicy": { "Name": "unless-stopped" },
                "Binds": spec.volume_binds,
                "NetworkMode": spec.network,
            },
        });
        let response = self
            .request(
                Method::POST,
                &["containers", "create"],
                &[("name", &spec.name)],
            )
            .json(&body)
            .send()
            .await?;
        match response.status() {
            StatusCode::CONFLICT => return Err(RuntimeError::Conflict(spec.name.clone())),
            status if !status.is_success() => return Err(api_error(response).await),
            _ => {}
        }
        let IdResponse { id } = response.json().await?;
        info!(%id, image = %spec.image, "Created container");
        Ok(CreatedContainer {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        let response = self
            .request(Method::POST, &["containers", name, "start"], &[])
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(name.to_string())),
            _ => Err(api_error(response).await),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let response = self
            .request(
                Method::POST,
                &["containers", name, "stop"],
                &[("t", STOP_GRACE_SECS)],
            )
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_MODIFIED => {
                debug!(container = %name, "Container already stopped");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(name.to_string())),
            _ => Err(api_error(response).await),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let response = self
            .request(Method::DELETE, &["containers", name], &[("force", "true")])
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(container = %name, "Container already gone");
                Ok(())
            }
            _ => Err(api_error(response).await),
        }
    }

    async fn signal(&self, name: &str, signal: &str) -> Result<(), RuntimeError> {
        let response = self
            .request(
                Method::POST,
                &["containers", name, "kill"],
                &[("signal", signal)],
            )
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(name.to_string())),
            _ => Err(api_error(response).await),
        }
    }

    #[tracing::instrument(skip(self, command))]
    async fn exec_in_other(
        &self,
        container: &str,
        command: &[String],
        user: Option<&str>,
    ) -> Result<ExecOutput, RuntimeError> {
        let response = self
            .request(Method::POST, &["containers", container, "exec"], &[])
            .json(&ExecCreate {
                attach_stdout: true,
                attach_stderr: true,
                cmd: command,
                user,
            })
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(RuntimeError::NotFound(container.to_string())),
            status if !status.is_success() => return Err(api_error(response).await),
            _ => {}
        }
        let IdResponse { id } = response.json().await?;

        let response = self
            .request(Method::POST, &["exec", &id, "start"], &[])
            .json(&json!({ "Detach": false, "Tty": false }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let raw = response.bytes().await?;
        let (stdout, stderr) = demux_stream(&raw);

        let response = self
            .request(Method::GET, &["exec", &id, "json"], &[])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let ExecInspect { exit_code } = response.json().await?;
        let Some(exit_code) = exit_code else {
            return Err(RuntimeError::Api {
                status: StatusCode::OK.as_u16(),
                message: format!("exec {id} finished without an exit code"),
            });
        };
        debug!(exit_code, "Exec finished");

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}
