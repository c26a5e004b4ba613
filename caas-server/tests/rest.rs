//! End-to-end REST control-plane scenarios

mod common;

use caas_core::domain::log::LogRecord;
use caas_core::dto::{CommandDetail, CommandList, CreatedResponse, ExecResponse};
use common::{start_server, test_config, wait_for};
use std::time::Duration;

fn http() -> reqwest::Client {
    reqwest::Client::new()
}

async fn exec_script(server: &common::TestServer, id: &str, script: &str) -> ExecResponse {
    http()
        .post(format!("{}/exec", server.http_url()))
        .json(&serde_json::json!({ "id": id, "script": script }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_banner() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    let banner: serde_json::Value = http()
        .get(server.http_url())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(banner["title"], "caas agent");
    assert!(banner["version"].is_string());
    assert!(banner["running_at"].is_string());
    assert_eq!(banner["state"]["command"]["total"], 0);
}

#[tokio::test]
async fn test_exec_is_synchronous() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    let response = exec_script(&server, "sync-1", "echo hi").await;
    assert_eq!(response.id, "sync-1");
    // Trailing newline is trimmed.
    assert_eq!(response.log, "hi");

    // The job is already terminal when /exec answers.
    let detail: CommandDetail = http()
        .get(format!("{}/commands/sync-1", server.http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(detail.is_completed);

    // Metadata landed on disk.
    let metadata_dir = server.state.config.metadata_dir.join("sync-1");
    assert_eq!(
        std::fs::read_to_string(metadata_dir.join("script")).unwrap(),
        "echo hi"
    );
    assert_eq!(
        std::fs::read_to_string(metadata_dir.join("status")).unwrap(),
        "success"
    );
    assert!(metadata_dir.join("succeed_at").exists());
    assert_eq!(
        std::fs::read_to_string(metadata_dir.join("log")).unwrap(),
        "hi\n"
    );
}

#[tokio::test]
async fn test_create_is_asynchronous() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    let created: CreatedResponse = http()
        .post(format!("{}/commands", server.http_url()))
        .json(&serde_json::json!({ "script": "sleep 0.2 && echo done" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!created.id.is_empty());

    // It answers before the job terminates, then the job finishes.
    let state = server.state.clone();
    let id = created.id.clone();
    assert!(
        wait_for(Duration::from_secs(5), || {
            state
                .registry
                .get(&id)
                .is_some_and(|job| !job.is_running())
        })
        .await
    );

    let detail: CommandDetail = http()
        .get(format!("{}/commands/{}", server.http_url(), created.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(detail.is_completed);
    assert!(detail.log.iter().any(|record| record.log.contains("done")));
}

#[tokio::test]
async fn test_validation_and_missing_jobs() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    // Missing script.
    let response = http()
        .post(format!("{}/commands", server.http_url()))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // Unknown id.
    let response = http()
        .get(format!("{}/commands/ghost", server.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = http()
        .post(format!("{}/commands/ghost/cancel", server.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_list_ordering_and_latest() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    exec_script(&server, "a", "true").await;
    exec_script(&server, "b", "true").await;
    exec_script(&server, "c", "true").await;

    let list: CommandList = http()
        .get(format!("{}/commands", server.http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(list.total, 3);
    let ids: Vec<&str> = list.commands.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "a"]);

    // Nothing is running.
    let response = http()
        .get(format!("{}/commands/latest", server.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "no commands running");

    // Start one asynchronously; it becomes the latest.
    let created: CreatedResponse = http()
        .post(format!("{}/commands", server.http_url()))
        .json(&serde_json::json!({ "id": "d", "script": "sleep 5" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created.id, "d");

    let state = server.state.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            state
                .registry
                .get("d")
                .is_some_and(|job| job.status().to_string() == "running")
        })
        .await
    );

    let latest: CommandDetail = http()
        .get(format!("{}/commands/latest", server.http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest.id, "d");

    // REST cancel brings it down.
    let response = http()
        .post(format!("{}/commands/d/cancel", server.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    assert!(
        wait_for(Duration::from_secs(2), || {
            state.registry.get("d").is_some_and(|job| !job.is_running())
        })
        .await
    );
    assert_eq!(
        server.state.registry.get("d").unwrap().status().to_string(),
        "cancelled"
    );
}

#[tokio::test]
async fn test_log_snapshot_is_non_destructive() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    exec_script(&server, "logs", "echo one && echo two").await;

    let url = format!("{}/commands/logs/log", server.http_url());
    let first: Vec<LogRecord> = http().get(&url).send().await.unwrap().json().await.unwrap();
    let second: Vec<LogRecord> = http().get(&url).send().await.unwrap().json().await.unwrap();

    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    // Records come back in strictly increasing seq order.
    for pair in first.windows(2) {
        assert!(pair[0].id < pair[1].id);
    }
}

#[tokio::test]
async fn test_log_sse_drains_ring() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    exec_script(&server, "sse", "echo streamed").await;

    // The job is terminal, so the stream drains the ring and completes.
    let body = http()
        .get(format!("{}/commands/sse/log/sse", server.http_url()))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("streamed"));

    // The SSE consumer popped everything; the snapshot is now empty.
    let records: Vec<LogRecord> = http()
        .get(format!("{}/commands/sse/log", server.http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_basic_auth_gate() {
    let (mut config, dirs) = test_config();
    config.client_id = "id".to_string();
    config.client_secret = "secret".to_string();
    let server = start_server(config, dirs).await;

    // The banner stays open.
    let response = http().get(server.http_url()).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let commands_url = format!("{}/commands", server.http_url());
    let response = http().get(&commands_url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = http()
        .get(&commands_url)
        .basic_auth("id", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = http()
        .get(&commands_url)
        .basic_auth("id", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = http()
        .post(format!("{}/exec", server.http_url()))
        .json(&serde_json::json!({ "script": "true" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn test_create_with_id_in_path() {
    let (config, dirs) = test_config();
    let server = start_server(config, dirs).await;

    let created: CreatedResponse = http()
        .post(format!("{}/commands/named/create", server.http_url()))
        .json(&serde_json::json!({ "script": "true" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created.id, "named");

    let state = server.state.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            state
                .registry
                .get("named")
                .is_some_and(|job| !job.is_running())
        })
        .await
    );
}
