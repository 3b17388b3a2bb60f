use std::time::Duration;

use clap::CommandFactory;
use fieldsync_core::{Engine, EngineConfig, ReqwestClient, SyncMetadata, SyncStatus};
use http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::cli::{Cli, CompletionShell};
use crate::commands::common::{require_credentials, resolve_config, CliEngine};
use crate::commands::completions::render_completions;
use crate::commands::pair::{run_pair, run_unpair};
use crate::commands::request::{build_request, response_text};
use crate::commands::serve::serve_on;
use crate::commands::status::collect_status;
use crate::commands::sync::describe_sync;
use crate::commands::telemetry::build_report;
use crate::commands::upload::{capture_file, run_upload_deliver, run_upload_remove};
use crate::error::CliError;

async fn open_temp_engine(dir: &tempfile::TempDir) -> CliEngine {
    let config = EngineConfig::with_data_dir(dir.path());
    let client = ReqwestClient::new(Duration::from_secs(5)).unwrap();
    Engine::open(&config, client).await.unwrap()
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn completions_use_the_binary_name() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("fieldsync"));
}

#[test]
fn data_dir_flag_overrides_environment() {
    let config = resolve_config(Some("/tmp/fieldsync-test".into())).unwrap();
    assert_eq!(config.data_dir, std::path::PathBuf::from("/tmp/fieldsync-test"));
}

#[test]
fn build_request_normalizes_method_and_sets_content_type() {
    let request = build_request(
        " put ",
        "/config/theme",
        Some(b"{}".to_vec()),
        Some("application/json"),
    )
    .unwrap();
    assert_eq!(request.method(), Method::PUT);
    assert_eq!(request.uri().path(), "/config/theme");
    assert_eq!(request.headers()["content-type"], "application/json");
    assert_eq!(request.body(), b"{}");
}

#[test]
fn build_request_rejects_bad_input() {
    assert!(matches!(
        build_request("GET", "  ", None, None),
        Err(CliError::InvalidArgument(_))
    ));
    assert!(matches!(
        build_request("G E T", "/config/x", None, None),
        Err(CliError::InvalidArgument(_))
    ));
}

#[test]
fn describe_sync_mentions_remaining_records() {
    let metadata = SyncMetadata {
        status: SyncStatus::Success { timestamp: 1 },
        remaining: 70,
        ..SyncMetadata::default()
    };
    assert!(describe_sync(&metadata).contains("70 records remaining"));
    assert_eq!(describe_sync(&SyncMetadata::default()), "Never synced");
}

#[tokio::test(flavor = "multi_thread")]
async fn pair_status_and_unpair_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_temp_engine(&dir).await;

    let status = collect_status(&engine).await.unwrap();
    assert!(!status.paired);
    assert_eq!(status.sync, SyncMetadata::default());
    assert!(!dir.path().join("store.db").exists());

    run_pair(
        &engine,
        "https://records.example.org/".into(),
        "access".into(),
        "refresh".into(),
    )
    .await
    .unwrap();
    let status = collect_status(&engine).await.unwrap();
    assert!(status.paired);
    assert_eq!(
        status.backend_url.as_deref(),
        Some("https://records.example.org")
    );

    run_unpair(&engine).await.unwrap();
    assert!(matches!(
        require_credentials(&engine).await,
        Err(CliError::NotPaired)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn captured_files_get_sequential_urls_and_guessed_types() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_temp_engine(&dir).await;
    let photo = dir.path().join("leaf.jpg");
    std::fs::write(&photo, b"jpeg bytes").unwrap();

    let first = capture_file(&engine, &photo, None).await.unwrap();
    let second = capture_file(&engine, &photo, Some("image/png".into()))
        .await
        .unwrap();
    assert_eq!(first, "/cache-upload/images/0");
    assert_eq!(second, "/cache-upload/images/1");

    let pending = engine.uploads().pending(&first).await.unwrap().unwrap();
    assert_eq!(pending.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(collect_status(&engine).await.unwrap().pending_uploads, 2);

    assert!(matches!(
        run_upload_deliver(&engine, &first).await,
        Err(CliError::NotPaired)
    ));
    run_upload_remove(&engine, &first).await.unwrap();
    assert!(matches!(
        run_upload_remove(&engine, &first).await,
        Err(CliError::UploadNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn request_command_serves_config_locally() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_temp_engine(&dir).await;
    let worker = engine.worker();

    let put = build_request(
        "PUT",
        "/config/theme",
        Some(br#"{"mode":"dark"}"#.to_vec()),
        Some("application/json"),
    )
    .unwrap();
    assert_eq!(worker.fetch(put).await.status(), StatusCode::CREATED);

    let get = build_request("GET", "/config/theme", None, None).unwrap();
    let response = worker.fetch(get).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&response_text(&response)).unwrap();
    assert_eq!(body, json!({"mode": "dark"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_routes_requests_and_messages_through_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_temp_engine(&dir).await;
    let orchestrator = engine.orchestrator();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    let shutdown = async move {
        stopped.await.ok();
    };

    let client_side = async move {
        let http = reqwest::Client::new();

        let health = http.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(health.status().as_u16(), 200);

        let put = http
            .put(format!("{base}/config/theme"))
            .header("content-type", "application/json")
            .body(r#"{"mode":"light"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(put.status().as_u16(), 201);

        let get = http.get(format!("{base}/config/theme")).send().await.unwrap();
        assert_eq!(get.status().as_u16(), 200);
        assert_eq!(
            get.json::<Value>().await.unwrap(),
            json!({"mode": "light"})
        );

        let nodes = http
            .get(format!("{base}/nodes/person?offset=0&range=10"))
            .send()
            .await
            .unwrap();
        assert_eq!(
            nodes.json::<Value>().await.unwrap(),
            json!({"offset": 0, "count": 0, "data": []})
        );

        let message = http
            .post(format!("{base}/worker/messages"))
            .json(&json!({"tag": "SyncData"}))
            .send()
            .await
            .unwrap();
        assert_eq!(message.status().as_u16(), 202);

        stop.send(()).ok();
    };

    let (served, ()) = tokio::join!(serve_on(engine, listener, shutdown), client_side);
    served.unwrap();

    let metadata = orchestrator.metadata().await.unwrap();
    assert!(matches!(metadata.status, SyncStatus::NoCredentials { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn error_reports_are_rebased_on_the_paired_backend() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_temp_engine(&dir).await;
    assert!(matches!(
        build_report(&engine, "POST", "/api/errors", "{}".into()).await,
        Err(CliError::NotPaired)
    ));

    run_pair(
        &engine,
        "https://records.example.org".into(),
        "access".into(),
        "refresh".into(),
    )
    .await
    .unwrap();
    let report = build_report(&engine, "POST", "/api/errors", r#"{"msg":"boom"}"#.into())
        .await
        .unwrap();
    assert_eq!(report.url, "https://records.example.org/api/errors");
    assert_eq!(report.access_token, "access");

    assert!(matches!(
        build_report(&engine, "POST", "/api/errors", "not json".into()).await,
        Err(CliError::Serialization(_))
    ));
}
