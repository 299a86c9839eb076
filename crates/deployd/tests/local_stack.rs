//! Full local stack: API → queue → executor → in-memory cluster →
//! reconciliation → tracker.

use std::io::Write;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use deployd::Daemon;
use deployd_core::DeploydConfig;

fn fast_config() -> DeploydConfig {
    DeploydConfig::from_toml(
        r#"
[cluster]
namespace = "apps"
ready_delay = "20ms"

[reconcile]
threadiness = 2
cache_sync_timeout = "5s"
"#,
    )
    .unwrap()
}

fn fragment(request_id: &str, app: &str) -> serde_json::Value {
    serde_json::json!({
        "request_id": request_id,
        "fragment_id": "frag-1",
        "app_instance_id": app,
        "stages": [
            {
                "stage_id": "stage-1",
                "services": [
                    { "service_id": "svc-db", "name": "db", "image": "postgres:16" }
                ]
            },
            {
                "stage_id": "stage-2",
                "services": [
                    {
                        "service_id": "svc-api",
                        "name": "api",
                        "image": "registry/api:1",
                        "replicas": 2,
                        "exposed_ports": [{ "name": "http", "port": 8080, "public": true }]
                    }
                ]
            }
        ]
    })
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submitted_fragment_converges() {
    let daemon = Daemon::local(fast_config()).unwrap();
    let background = daemon.start().unwrap();
    let router = daemon.router();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/fragments")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&fragment("req-1", "shop")).unwrap()))
        .unwrap();
    let (status, _) = send(&router, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // db: workload + service; api: workload + service + ingress.
    let summary = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (status, body) = send(&router, get("/api/v1/apps/shop/status")).await;
            if status == StatusCode::OK && body["data"]["converged"] == true {
                return body["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("fragment did not converge");
    assert_eq!(summary["total"], 5);
    assert_eq!(summary["running"], 5);

    let (_, body) = send(&router, get("/api/v1/resources?app_instance_id=shop")).await;
    let endpoints: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["endpoint"].as_str())
        .collect();
    assert_eq!(endpoints, vec!["api.shop.local"]);

    let (_, body) = send(&router, get("/api/v1/fragments")).await;
    assert_eq!(body["data"]["outcomes"][0]["succeeded"], true);
    assert_eq!(body["data"]["outcomes"][0]["completed_stages"], 2);

    background.stop().await;
    assert!(daemon.executor().queue().is_closed());
}

#[tokio::test]
async fn daemon_loads_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nport = 7070\n\n[cluster]\nnamespace = \"staging\"").unwrap();

    let config = DeploydConfig::from_file(file.path()).unwrap();
    assert_eq!(config.server.port, 7070);

    let daemon = Daemon::local(config).unwrap();
    assert_eq!(daemon.cluster().namespace(), "staging");
    assert!(daemon.tracker().is_empty());
}

#[tokio::test]
async fn non_local_cluster_is_rejected() {
    let mut config = DeploydConfig::default();
    config.cluster.local = false;
    assert!(Daemon::local(config).is_err());
}
