//! Delivery tests for the HTTP ingestion client against a local endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use discovery_core::{Defaults, Entity, IpAddress};
use discovery_ingest::{HttpIngestClient, IngestClient, IngestConfig, IngestError};

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    keys: Arc<Mutex<Vec<String>>>,
}

async fn spawn_endpoint(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/ingest")
}

fn client_for(target: String) -> HttpIngestClient {
    HttpIngestClient::new(&IngestConfig {
        target,
        api_key: "secret".to_string(),
        app_name: "network-discovery".to_string(),
        app_version: "1.2.3".to_string(),
        ..IngestConfig::default()
    })
    .unwrap()
}

fn sample_batch() -> Vec<Entity> {
    let defaults = Defaults {
        description: Some("lab".to_string()),
        comments: None,
        tags: vec!["sweep".to_string()],
    };
    vec![
        IpAddress::host("10.0.0.1".parse().unwrap())
            .with_defaults(&defaults)
            .into(),
        IpAddress::host("10.0.0.2".parse().unwrap())
            .with_defaults(&defaults)
            .into(),
    ]
}

#[tokio::test]
async fn delivers_whole_batch_in_one_request() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/ingest",
            post(
                |State(c): State<Captured>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    let key = headers
                        .get("diode-api-key")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    c.keys.lock().unwrap().push(key);
                    c.bodies.lock().unwrap().push(body);
                    Json(serde_json::json!({}))
                },
            ),
        )
        .with_state(captured.clone());

    let client = client_for(spawn_endpoint(app).await);
    let resp = client.ingest(sample_batch()).await.unwrap();
    assert!(resp.is_accepted());

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["producer_app_name"], "network-discovery");
    assert_eq!(body["producer_app_version"], "1.2.3");
    assert_eq!(body["entities"].as_array().unwrap().len(), 2);
    assert_eq!(body["entities"][1]["address"], "10.0.0.2/32");
    assert_eq!(body["entities"][1]["description"], "lab");
    assert_eq!(captured.keys.lock().unwrap()[0], "secret");
}

#[tokio::test]
async fn per_item_errors_come_back_in_response() {
    let app = Router::new().route(
        "/ingest",
        post(|| async { Json(serde_json::json!({"errors": ["fail1", "fail2"]})) }),
    );

    let client = client_for(spawn_endpoint(app).await);
    let resp = client.ingest(sample_batch()).await.unwrap();
    assert_eq!(resp.errors, vec!["fail1", "fail2"]);
}

#[tokio::test]
async fn empty_body_is_accepted() {
    let app = Router::new().route("/ingest", post(|| async { StatusCode::OK }));

    let client = client_for(spawn_endpoint(app).await);
    let resp = client.ingest(sample_batch()).await.unwrap();
    assert!(resp.is_accepted());
}

#[tokio::test]
async fn non_success_status_is_a_transport_failure() {
    let app = Router::new().route(
        "/ingest",
        post(|| async { (StatusCode::UNAUTHORIZED, "bad api key") }),
    );

    let client = client_for(spawn_endpoint(app).await);
    let err = client.ingest(sample_batch()).await.unwrap_err();
    match err {
        IngestError::Status { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad api key");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(format!("http://{addr}/ingest"));
    let err = client.ingest(sample_batch()).await.unwrap_err();
    assert!(matches!(err, IngestError::Transport(_)));
}

#[tokio::test]
async fn silent_upstream_times_out() {
    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = HttpIngestClient::new(&IngestConfig {
        target: format!("http://{addr}/ingest"),
        timeout: Duration::from_millis(200),
        ..IngestConfig::default()
    })
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), client.ingest(sample_batch()))
        .await
        .expect("ingest should give up on its own");
    match result {
        Err(IngestError::Transport(e)) => assert!(e.is_timeout(), "{e}"),
        other => panic!("expected a timeout, got {other:?}"),
    }
}
