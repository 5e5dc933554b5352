//! In-process stand-in for the Docker Engine API, served over real HTTP.
//!
//! Covers exactly the endpoints the coordinator's runtime client uses. Created
//! containers are healthy as soon as they start unless told otherwise.

use alloc::{collections::BTreeMap, sync::Arc};
use core::net::SocketAddr;
use std::{collections::HashMap, sync::Mutex};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use tokio::{net::TcpListener, task};

#[derive(Debug, Clone)]
pub(crate) struct MockContainer {
    pub id: String,
    pub running: bool,
    /// `None` for containers without a healthcheck.
    pub health: Option<&'static str>,
    pub create_body: Value,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub containers: BTreeMap<String, MockContainer>,
    pub execs: BTreeMap<String, (String, Vec<String>)>,
    pub exec_exit_code: i64,
    /// Health status new containers report once started.
    pub start_health: Option<&'static str>,
    pub signals: Vec<(String, String)>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}{:012}", self.next_id)
    }
}

type Shared = Arc<Mutex<MockState>>;

/// A running mock; the server task stops when this is dropped.
pub(crate) struct DockerMock {
    pub state: Shared,
    pub addr: SocketAddr,
    handle: task::JoinHandle<()>,
}

impl Drop for DockerMock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl DockerMock {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState {
            start_health: Some("healthy"),
            ..MockState::default()
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::clone(&state));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            state,
            addr,
            handle,
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Adds a running container without a healthcheck, like the pooling proxy.
    pub(crate) fn add_running(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("c");
        state.containers.insert(
            name.to_owned(),
            MockContainer {
                id,
                running: true,
                health: None,
                create_body: Value::Null,
            },
        );
    }

    pub(crate) fn container(&self, name: &str) -> Option<MockContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub(crate) fn set_running(&self, name: &str, running: bool) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.running = running;
        }
    }

    pub(crate) fn set_health(&self, name: &str, health: &'static str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.health = Some(health);
        }
    }

    /// Commands executed so far, with the container they ran in.
    pub(crate) fn exec_commands(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().execs.values().cloned().collect()
    }

    pub(crate) fn signals(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().signals.clone()
    }
}

fn no_such_container(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("No such container: {name}") })),
    )
        .into_response()
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/v1.43/containers/json", get(list))
        .route("/v1.43/containers/create", post(create))
        .route("/v1.43/containers/{name}/json", get(inspect))
        .route("/v1.43/containers/{name}/start", post(start))
        .route("/v1.43/containers/{name}/stop", post(stop))
        .route("/v1.43/containers/{name}/kill", post(kill))
        .route("/v1.43/containers/{name}/exec", post(exec_create))
        .route("/v1.43/containers/{name}", delete(remove))
        .route("/v1.43/exec/{id}/start", post(exec_start))
        .route("/v1.43/exec/{id}/json", get(exec_inspect))
        .with_state(state)
}

async fn list(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let all = query.get("all").is_some_and(|v| v == "true");
    let filters: Value = query
        .get("filters")
        .map_or(Value::Null, |f| serde_json::from_str(f).unwrap());
    let needle = filters["name"][0].as_str().unwrap_or_default().to_owned();

    let state = state.lock().unwrap();
    let entries: Vec<Value> = state
        .containers
        .iter()
        .filter(|&(name, c)| name.contains(&needle) && (all || c.running))
        .map(|(name, c)| {
            let status = match (c.running, c.health) {
                (false, _) => "Exited (0) 1 second ago".to_owned(),
                (true, None) => "Up 1 second".to_owned(),
                (true, Some(health)) => format!("Up 1 second ({health})"),
            };
            json!({
                "Id": c.id,
                "Names": [format!("/{name}")],
                "State": if c.running { "running" } else { "exited" },
                "Status": status,
            })
        })
        .collect();
    Json(entries).into_response()
}

async fn create(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let name = query.get("name").cloned().unwrap_or_default();
    let mut state = state.lock().unwrap();
    if state.containers.contains_key(&name) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "message": format!("Conflict. The container name \"/{name}\" is already in use") })),
        )
            .into_response();
    }
    let id = state.next_id("c");
    state.containers.insert(
        name,
        MockContainer {
            id: id.clone(),
            running: false,
            health: None,
            create_body: body,
        },
    );
    (StatusCode::CREATED, Json(json!({ "Id": id, "Warnings": [] }))).into_response()
}

async fn inspect(State(state): State<Shared>, Path(name): Path<String>) -> Response {
    let state = state.lock().unwrap();
    let Some(c) = state.containers.get(&name) else {
        return no_such_container(&name);
    };
    let mut container_state = json!({ "Running": c.running });
    if let Some(health) = c.health {
        container_state["Health"] = json!({ "Status": health });
    }
    Json(json!({ "Id": c.id, "State": container_state })).into_response()
}

async fn start(State(state): State<Shared>, Path(name): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    let start_health = state.start_health;
    let Some(c) = state.containers.get_mut(&name) else {
        return no_such_container(&name);
    };
    if c.running {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    c.running = true;
    if !c.create_body.is_null() {
        c.health = start_health;
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn stop(State(state): State<Shared>, Path(name): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    let Some(c) = state.containers.get_mut(&name) else {
        return no_such_container(&name);
    };
    if !c.running {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    c.running = false;
    StatusCode::NO_CONTENT.into_response()
}

async fn kill(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !state.containers.contains_key(&name) {
        return no_such_container(&name);
    }
    let signal = query.get("signal").cloned().unwrap_or_else(|| "SIGKILL".to_owned());
    state.signals.push((name, signal));
    StatusCode::NO_CONTENT.into_response()
}

async fn remove(State(state): State<Shared>, Path(name): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    match state.containers.remove(&name) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => no_such_container(&name),
    }
}

async fn exec_create(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !state.containers.contains_key(&name) {
        return no_such_container(&name);
    }
    let cmd = body["Cmd"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();
    let id = state.next_id("e");
    state.execs.insert(id.clone(), (name, cmd));
    (StatusCode::CREATED, Json(json!({ "Id": id }))).into_response()
}

async fn exec_start(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let state = state.lock().unwrap();
    if !state.execs.contains_key(&id) {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "No such exec instance" })))
            .into_response();
    }
    let payload = b"reloaded\n";
    let mut frame = vec![1_u8, 0, 0, 0];
    frame.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_be_bytes());
    frame.extend_from_slice(payload);
    (StatusCode::OK, frame).into_response()
}

async fn exec_inspect(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let state = state.lock().unwrap();
    if !state.execs.contains_key(&id) {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "No such exec instance" })))
            .into_response();
    }
    Json(json!({ "ID": id, "Running": false, "ExitCode": state.exec_exit_code })).into_response()
}
