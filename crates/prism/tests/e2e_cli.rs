use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serial_test::serial;
use testkit::export_request_json;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_prism")
}

fn spawn_server(temp: &Path, archive: bool) -> (Child, String) {
    let http_port = free_port();
    let grpc_port = free_port();

    let mut cmd = Command::new(bin());
    cmd.arg("run")
        .arg("--http-addr")
        .arg(format!("127.0.0.1:{http_port}"))
        .arg("--grpc-addr")
        .arg(format!("127.0.0.1:{grpc_port}"))
        .arg("--db-path")
        .arg(temp.join("prism.duckdb"))
        .env("PRISM_CONFIG", temp.join("missing.toml"))
        .env("PRISM_COMPLETION_IDLE", "300ms")
        .env("PRISM_COMPLETION_TICK", "50ms")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if !archive {
        cmd.arg("--no-archive");
    }

    (cmd.spawn().unwrap(), format!("http://127.0.0.1:{http_port}"))
}

fn prism(hub: &str, args: &[&str]) -> std::process::Output {
    Command::new(bin())
        .arg("--hub")
        .arg(hub)
        .args(args)
        .env("PRISM_CONFIG", "/nonexistent/prism.toml")
        .output()
        .unwrap()
}

async fn wait_ready(hub: &str, child: &mut Child) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        assert!(child.try_wait().unwrap().is_none(), "prism exited early");
        if client.get(format!("{hub}/status")).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("prism http endpoint not ready");
}

async fn export_checkout(hub: &str) {
    let body = export_request_json(
        "checkout",
        TRACE_ID,
        &[
            ("00f067aa0ba902b7", None, 1_000_000, 9_000_000, 0),
            ("00f067aa0ba902b8", Some("00f067aa0ba902b7"), 2_000_000, 4_000_000, 2),
        ],
    );
    let response = reqwest::Client::new()
        .post(format!("{hub}/v1/traces"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
}

async fn wait_archived(hub: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        let response = client
            .get(format!("{hub}/traces/{TRACE_ID}"))
            .send()
            .await
            .unwrap();
        if response.status().is_success() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("trace never reached the archive");
}

#[tokio::test]
#[serial]
async fn e2e_archive_listing_and_trace_waterfall() {
    let temp = tempfile::tempdir().unwrap();
    let (mut child, hub) = spawn_server(temp.path(), true);
    wait_ready(&hub, &mut child).await;

    export_checkout(&hub).await;
    wait_archived(&hub).await;

    let traces = prism(&hub, &["traces"]);
    let stdout = String::from_utf8_lossy(&traces.stdout);
    assert!(traces.status.success(), "{stdout}");
    assert!(stdout.contains(&format!("trace={TRACE_ID}")));
    assert!(stdout.contains("spans=2 errors=1"));
    assert!(stdout.contains("-- 1 traces --"));

    let trace = prism(&hub, &["trace", TRACE_ID]);
    let stdout = String::from_utf8_lossy(&trace.stdout);
    assert!(stdout.starts_with(&format!("TRACE {TRACE_ID} spans=2 errors=1 duration=8ms")));
    assert!(stdout.contains("SERVICES"));
    assert!(stdout.contains(" ERR"));

    let status = prism(&hub, &["--json", "status"]);
    let value: serde_json::Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(value["spans_count"], 2);
    assert_eq!(value["traces_count"], 1);

    let missing = prism(&hub, &["trace", "does-not-exist"]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("trace not found"));

    let _ = child.kill();
    let _ = child.wait();
}

#[tokio::test]
#[serial]
async fn e2e_watch_follows_trace_to_completion() {
    let temp = tempfile::tempdir().unwrap();
    let (mut child, hub) = spawn_server(temp.path(), false);
    wait_ready(&hub, &mut child).await;

    export_checkout(&hub).await;

    let watch = prism(&hub, &["--json", "watch", TRACE_ID]);
    assert!(watch.status.success());
    let stdout = String::from_utf8_lossy(&watch.stdout);
    let last: serde_json::Value =
        serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(last["status"], "complete");
    assert_eq!(last["view"]["trace_id"], TRACE_ID);
    assert_eq!(last["view"]["spans"].as_array().unwrap().len(), 2);
    assert_eq!(last["view"]["spans"][1]["depth"], 1);
    assert_eq!(last["view"]["graph"]["nodes"][0]["service_name"], "checkout");

    let archive = prism(&hub, &["traces"]);
    assert!(!archive.status.success());
    assert!(String::from_utf8_lossy(&archive.stderr).contains("archive disabled"));

    let _ = child.kill();
    let _ = child.wait();
}
