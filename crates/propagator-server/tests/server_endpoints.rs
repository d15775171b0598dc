use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use propagator_core::events::{AuditEvent, EventBroadcaster, ObjectReference};
use propagator_core::propagation::FINALIZER;
use propagator_db_memory::InMemoryStore;
use propagator_server::{
    AppConfig, AppState, AuditLog, Controller, Reconciler, ReconcilerSettings, Recorder, WorkQueue,
    build_app,
};
use propagator_storage::{DynStore, EventedStore, ObjectStore};
use serde_json::{Value, json};
use tower::ServiceExt;

struct TestApp {
    app: Router,
    store: DynStore,
    queue: Arc<WorkQueue>,
    audit: AuditLog,
    broadcaster: Arc<EventBroadcaster>,
}

fn test_app() -> TestApp {
    let cfg = AppConfig::default();
    let broadcaster = EventBroadcaster::new_shared();
    let store: DynStore = Arc::new(EventedStore::new(InMemoryStore::new(), broadcaster.clone()));
    let queue = Arc::new(WorkQueue::new(
        cfg.controller.backoff_base(),
        cfg.controller.backoff_max(),
    ));
    let audit = AuditLog::new(16);
    let state = AppState {
        store: store.clone(),
        queue: queue.clone(),
        audit: audit.clone(),
        metrics_enabled: false,
    };
    TestApp {
        app: build_app(state, &cfg),
        store,
        queue,
        audit,
        broadcaster,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn seed(app: &Router) {
    for ns in ["default", "team-a"] {
        let (status, _) = send(app, Method::PUT, &format!("/api/namespaces/{ns}"), Some(json!({"metadata": {}}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = send(
        app,
        Method::PUT,
        "/api/namespaces/default/configmaps/app-config",
        Some(json!({"metadata": {}, "data": {"k1": "v1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn propagation_body() -> Value {
    json!({
        "metadata": {},
        "spec": {
            "source": {"name": "app-config"},
            "targets": [{"namespace": "team-a"}]
        }
    })
}

#[test]
fn health_endpoints_work() {
    let t = test_app();
    tokio_test::block_on(async {
        let (status, body) = send(&t.app, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&t.app, Method::GET, "/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["backend"], "memory");

        let (status, body) = send(&t.app, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "Status");
    });
}

#[tokio::test]
async fn namespace_and_config_map_crud() {
    let t = test_app();
    seed(&t.app).await;

    let (status, _) = send(&t.app, Method::PUT, "/api/namespaces/team-a", Some(json!({"metadata": {"labels": {"env": "prod"}}}))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&t.app, Method::GET, "/api/namespaces/team-a", None).await;
    assert_eq!(body["metadata"]["labels"]["env"], "prod");

    let (status, body) = send(&t.app, Method::GET, "/api/namespaces", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "NamespaceList");
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let (status, body) = send(&t.app, Method::GET, "/api/namespaces/default/configmaps/app-config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["namespace"], "default");
    assert_eq!(body["data"]["k1"], "v1");

    let (status, body) = send(
        &t.app,
        Method::PUT,
        "/api/namespaces/default/configmaps/app-config",
        Some(json!({"metadata": {"name": "other"}, "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "BadRequest");

    let (status, _) = send(
        &t.app,
        Method::PUT,
        "/api/namespaces/nowhere/configmaps/app-config",
        Some(json!({"metadata": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&t.app, Method::GET, "/api/namespaces/default/configmaps", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, _) = send(&t.app, Method::DELETE, "/api/namespaces/default/configmaps/app-config", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&t.app, Method::GET, "/api/namespaces/default/configmaps/app-config", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);

    let (status, _) = send(&t.app, Method::DELETE, "/api/namespaces/team-a", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, Method::GET, "/api/namespaces/team-a", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn propagation_put_preserves_finalizers_and_delete_waits_for_them() {
    let t = test_app();
    seed(&t.app).await;
    let uri = "/api/namespaces/default/propagations/shared";

    let (status, body) = send(&t.app, Method::PUT, uri, Some(propagation_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["metadata"]["generation"], 1);

    let mut stored = t.store.get_propagation("default", "shared").await.unwrap().unwrap();
    stored.metadata.add_finalizer(FINALIZER);
    t.store.update_propagation(&stored).await.unwrap();

    let mut edited = propagation_body();
    edited["spec"]["targets"] = json!([{"namespace": "team-a"}, {"namespace": "team-b"}]);
    edited["status"] = json!({"syncedGeneration": 99});
    let (status, body) = send(&t.app, Method::PUT, uri, Some(edited)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["generation"], 2);
    assert_eq!(body["metadata"]["finalizers"], json!([FINALIZER]));
    assert!(body["status"].get("syncedGeneration").is_none());

    let (status, body) = send(&t.app, Method::GET, "/api/namespaces/default/propagations", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "ConfigMapPropagationList");

    let (status, body) = send(&t.app, Method::DELETE, uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["metadata"]["deletionTimestamp"].is_string());
    let (status, _) = send(&t.app, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::OK, "still held by its finalizer");
}

#[tokio::test]
async fn reconcile_request_enqueues_existing_propagations_only() {
    let t = test_app();
    seed(&t.app).await;
    send(&t.app, Method::PUT, "/api/namespaces/default/propagations/shared", Some(propagation_body())).await;

    let (status, body) = send(&t.app, Method::POST, "/api/namespaces/default/propagations/shared/reconcile", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(t.queue.len(), 1);

    let (status, _) = send(&t.app, Method::POST, "/api/namespaces/default/propagations/ghost/reconcile", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(t.queue.len(), 1);
}

#[tokio::test]
async fn events_endpoint_returns_newest_first() {
    let t = test_app();
    for reason in ["Created", "Updated", "Deleted"] {
        t.audit.push(AuditEvent::normal(
            ObjectReference::new("ConfigMapPropagation", "default", "shared"),
            reason,
            "ok",
        ));
    }
    let (status, body) = send(&t.app, Method::GET, "/api/events?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let reasons: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["reason"].as_str().unwrap())
        .collect();
    assert_eq!(reasons, vec!["Deleted", "Updated"]);
}

#[tokio::test]
async fn controller_propagates_and_cleans_up_through_the_api() {
    let t = test_app();
    let cfg = AppConfig::default();
    let reconciler = Arc::new(Reconciler::new(
        t.store.clone(),
        Recorder::new(t.broadcaster.clone()),
        ReconcilerSettings::default(),
    ));
    let controller = Controller::new(reconciler, t.broadcaster.clone(), &cfg.controller)
        .spawn()
        .await
        .unwrap();
    let _collector = t.audit.spawn_collector(&t.broadcaster);

    seed(&t.app).await;
    let uri = "/api/namespaces/default/propagations/shared";
    let (status, _) = send(&t.app, Method::PUT, uri, Some(propagation_body())).await;
    assert_eq!(status, StatusCode::CREATED);

    let target = "/api/namespaces/team-a/configmaps/app-config";
    eventually("target creation", || async {
        send(&t.app, Method::GET, target, None).await.0 == StatusCode::OK
    })
    .await;
    let (_, body) = send(&t.app, Method::GET, target, None).await;
    assert_eq!(body["data"]["k1"], "v1");
    eventually("ready status", || async {
        let (_, p) = send(&t.app, Method::GET, uri, None).await;
        p["status"]["conditions"][0]["status"] == "True"
    })
    .await;

    let (status, _) = send(&t.app, Method::DELETE, uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    eventually("propagation removal", || async {
        send(&t.app, Method::GET, uri, None).await.0 == StatusCode::NOT_FOUND
    })
    .await;
    let (status, _) = send(&t.app, Method::GET, target, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, events) = send(&t.app, Method::GET, "/api/events", None).await;
    let reasons: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["reason"].as_str().unwrap())
        .collect();
    assert!(reasons.contains(&"Created"));
    assert!(reasons.contains(&"Deleted"));

    controller.shutdown().await;
}
