//! End-to-end tests of the control API against the mocked container runtime.

use core::time::Duration;
use std::{fs, os::unix::fs::PermissionsExt as _, path::Path};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::json;
use tokio::time;
use tower::ServiceExt as _;

use tenantgate_coordinator::app::TenantStatus;

use crate::common::{CONTROL_KEY, POOL_CONTAINER, Tenant, TestEnv, send};

const TENANT: &str = "proj_alpha";
const GATEWAY: &str = "postgrest_proj_alpha";

#[tokio::test]
async fn healthz_needs_no_key() {
    let env = TestEnv::new(&[]).await;
    let (status, body) = send(&env.app, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn control_routes_require_the_key() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;

    let (status, body) = send(&env.app, Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, body) = send(&env.app, Method::GET, "/", Some("wrong-key"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // A rejected spawn must not reach the runtime
    let (status, _) = send(
        &env.app,
        Method::POST,
        "/spawn",
        Some("wrong-key"),
        Some(json!({ "tenantId": TENANT })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(env.docker.container(GATEWAY).is_none(), "no container for a rejected request");

    let (status, _) = send(&env.app, Method::GET, "/", Some(CONTROL_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bearer_token_is_accepted() {
    let env = TestEnv::new(&[]).await;
    let request = Request::builder()
        .uri("/")
        .header("authorization", format!("Bearer {CONTROL_KEY}"))
        .body(Body::empty())
        .unwrap();
    let response = env.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn spawn_provisions_a_gateway() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;

    let (status, body) = env.spawn(TENANT).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "running");
    assert_eq!(body["tenantId"], TENANT);
    assert_eq!(body["containerName"], GATEWAY);
    let hash = body["configHash"].as_str().unwrap();
    assert_eq!(hash.len(), 64, "sha256 hex digest");

    let container = env.docker.container(GATEWAY).unwrap();
    assert!(container.running, "gateway should be started");
    let created = &container.create_body;
    assert_eq!(created["Image"], "postgrest/postgrest:v12.2.3");
    assert!(
        created["Env"]
            .as_array()
            .unwrap()
            .contains(&json!(format!("TENANT_ID={TENANT}"))),
        "tenant id passed as env: {created}"
    );
    assert_eq!(created["Labels"]["tenantgate.managed"], "true");
    assert_eq!(created["HostConfig"]["NetworkMode"], "tenants");
    assert_eq!(created["HostConfig"]["RestartPolicy"]["Name"], "unless-stopped");
    let bind = created["HostConfig"]["Binds"][0].as_str().unwrap();
    let (host_dir, mount) = bind.split_once(':').unwrap();
    assert_eq!(mount, "/etc/postgrest:ro", "read-only config dir mount: {bind}");
    assert_eq!(
        Path::new(host_dir).join(format!("{TENANT}.conf")),
        env.config_path(TENANT),
        "the mounted dir holds the written config"
    );
    let in_container = format!("/etc/postgrest/{TENANT}.conf");
    assert_eq!(created["Cmd"], json!(["postgrest", in_container]));
    assert_eq!(
        created["Healthcheck"]["Test"],
        json!(["CMD", "postgrest", "--ready", in_container]),
        "the gateway image has no shell"
    );

    let config = env.config_path(TENANT);
    let text = fs::read_to_string(&config).unwrap();
    assert!(text.contains("@pgbouncer:6432/"), "connects through the pool: {text}");
    let mode = fs::metadata(&config).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600, "config must be owner only");

    assert!(
        env.ini().contains("proj_alpha = host=postgres port=5432 dbname=proj_alpha"),
        "{}",
        env.ini()
    );
    assert!(env.userlist().contains("\"proj_alpha\" \"s3cret-db-password\""));
    assert!(env.userlist().contains("\"admin\" \"admin\""), "other users kept");

    let execs = env.docker.exec_commands();
    assert_eq!(execs.len(), 1, "one pool reload: {execs:?}");
    assert_eq!(execs[0].0, POOL_CONTAINER);
    assert_eq!(execs[0].1, ["sh", "-c", "kill -HUP 1"]);
}

#[tokio::test]
async fn repeated_spawn_is_a_no_op() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;
    let (_, first) = env.spawn(TENANT).await;
    let ini_before = env.ini();

    let (status, second) = env.spawn(TENANT).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "already_running");
    assert_eq!(second["configHash"], first["configHash"]);
    assert_eq!(env.ini(), ini_before, "registry untouched");
    assert_eq!(env.docker.exec_commands().len(), 1, "no second pool reload");
    assert!(env.docker.signals().is_empty(), "no gateway reload");
}

#[tokio::test]
async fn changed_config_reloads_the_running_gateway() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;
    env.spawn(TENANT).await;
    fs::write(env.config_path(TENANT), "stale\n").unwrap();
    // What a single-file bind mount would keep seeing: the old inode
    let pinned = env.dir.path().join("pinned.conf");
    fs::hard_link(env.config_path(TENANT), &pinned).unwrap();

    let (status, body) = env.spawn(TENANT).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "reloaded");
    assert_eq!(
        env.docker.signals(),
        [(GATEWAY.to_owned(), "SIGHUP".to_owned())]
    );

    let created = env.docker.container(GATEWAY).unwrap().create_body;
    let bind = created["HostConfig"]["Binds"][0].as_str().unwrap();
    let host_dir = bind.split_once(':').unwrap().0;
    let seen_by_gateway = Path::new(host_dir).join(format!("{TENANT}.conf"));
    let text = fs::read_to_string(seen_by_gateway).unwrap();
    assert_ne!(text, "stale\n");
    assert!(text.contains("@pgbouncer:6432/"), "{text}");
    assert_eq!(
        fs::read_to_string(&pinned).unwrap(),
        "stale\n",
        "rewrites replace the inode, so only a directory mount sees them"
    );
}

#[tokio::test]
async fn abandoned_spawn_still_completes() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;
    env.docker.state.lock().unwrap().start_health = Some("starting");

    let abandoned = time::timeout(Duration::from_millis(300), env.spawn(TENANT)).await;
    assert!(abandoned.is_err(), "request should still be waiting for health");

    let mut started = false;
    for _ in 0..100 {
        if env.docker.container(GATEWAY).is_some_and(|c| c.running) {
            started = true;
            break;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    assert!(started, "the gateway is started after the caller left");
    env.docker.set_health(GATEWAY, "healthy");

    let mut outcome = None;
    for _ in 0..100 {
        let (_, body) = env.call(Method::GET, "/", None).await;
        if let Some(entry) = body["containers"].as_array().and_then(|c| c.first())
            && !entry["lastOperation"].is_null()
        {
            outcome = Some(entry["lastOperation"]["outcome"].clone());
            break;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(outcome, Some(json!("running")), "the spawn ran to completion");
}

#[tokio::test]
async fn stopped_gateway_is_replaced() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;
    env.spawn(TENANT).await;
    let old_id = env.docker.container(GATEWAY).unwrap().id;
    env.docker.set_running(GATEWAY, false);

    let (status, body) = env.spawn(TENANT).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let container = env.docker.container(GATEWAY).unwrap();
    assert_ne!(container.id, old_id, "a fresh container");
    assert!(container.running);
}

#[tokio::test]
async fn spawn_rejects_bad_requests() {
    let env = TestEnv::new(&[Tenant {
        id: "proj_frozen",
        status: TenantStatus::Suspended,
        password: "pw",
    }])
    .await;

    let (status, body) = env.spawn("Proj-Alpha").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_tenant_id");

    let (status, body) = env.call(Method::POST, "/spawn", Some(json!({ "tenant": TENANT }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = env.spawn("proj_missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "project_not_found");

    let (status, body) = env.spawn("proj_frozen").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "project_not_active");

    assert!(env.docker.exec_commands().is_empty(), "registry never touched");
    assert!(!env.ini().contains("proj_"), "{}", env.ini());
}

#[tokio::test]
async fn gateway_that_never_gets_healthy_times_out() {
    let env = TestEnv::with_health_timeout(&[Tenant::active(TENANT)], Duration::from_millis(300)).await;
    env.docker.state.lock().unwrap().start_health = Some("starting");

    let (status, body) = env.spawn(TENANT).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "health_timeout");
    assert!(
        env.docker.container(GATEWAY).is_some(),
        "started container is left for inspection"
    );
}

#[tokio::test]
async fn unhealthy_gateway_is_reported() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;
    env.docker.state.lock().unwrap().start_health = Some("unhealthy");

    let (status, body) = env.spawn(TENANT).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "gateway_unhealthy");
}

#[tokio::test]
async fn failed_pool_reload_stops_the_spawn() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;
    env.docker.state.lock().unwrap().exec_exit_code = 1;

    let (status, body) = env.spawn(TENANT).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "pgbouncer_add_failed");
    assert!(env.docker.container(GATEWAY).is_none(), "no gateway without a pool entry");
}

#[tokio::test]
async fn destroy_removes_everything() {
    let env = TestEnv::new(&[Tenant::active(TENANT), Tenant::active("proj_alphabet")]).await;
    env.spawn(TENANT).await;
    env.spawn("proj_alphabet").await;

    let (status, body) = env.call(Method::DELETE, &format!("/{TENANT}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "stopped", "tenantId": TENANT }));

    assert!(env.docker.container(GATEWAY).is_none());
    assert!(!env.config_path(TENANT).exists(), "config deleted");
    let ini = env.ini();
    assert!(!ini.contains("proj_alpha ="), "{ini}");
    assert!(ini.contains("proj_alphabet ="), "neighbour kept: {ini}");
    assert!(!env.userlist().contains("\"proj_alpha\""));
    assert!(env.userlist().contains("\"proj_alphabet\""));
    assert_eq!(
        env.docker.exec_commands().len(),
        3,
        "one pool reload per spawn and a single one for the destroy"
    );

    let (status, body) = env.call(Method::DELETE, &format!("/{TENANT}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cleaned_up");
}

#[tokio::test]
async fn restart_signals_a_running_gateway() {
    let env = TestEnv::new(&[Tenant::active(TENANT)]).await;

    let (status, body) = env.call(Method::POST, &format!("/{TENANT}/restart"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    env.spawn(TENANT).await;
    let (status, body) = env.call(Method::POST, &format!("/{TENANT}/restart"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "reloaded", "tenantId": TENANT }));
    assert_eq!(
        env.docker.signals(),
        [(GATEWAY.to_owned(), "SIGHUP".to_owned())]
    );
}

#[tokio::test]
async fn list_shows_running_gateways_with_their_last_operation() {
    let env = TestEnv::new(&[Tenant::active(TENANT), Tenant::active("proj_beta")]).await;
    env.spawn(TENANT).await;
    env.spawn("proj_beta").await;
    env.docker.set_running("postgrest_proj_beta", false);

    let (status, body) = env.call(Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    let containers = body["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 1, "only running gateways, never the pool: {body}");
    let entry = &containers[0];
    assert_eq!(entry["tenantId"], TENANT);
    assert_eq!(entry["containerName"], GATEWAY);
    assert_eq!(entry["lastOperation"]["action"], "spawn");
    assert_eq!(entry["lastOperation"]["outcome"], "running");
}

#[tokio::test]
async fn unknown_routes_get_a_json_404() {
    let env = TestEnv::new(&[]).await;
    let (status, body) = env.call(Method::GET, "/nope/nope/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
