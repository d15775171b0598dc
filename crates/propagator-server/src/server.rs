use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use propagator_core::events::EventBroadcaster;
use propagator_db_memory::InMemoryStore;
use propagator_storage::{DynStore, EventedStore};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::controller::{Controller, ControllerHandle, WorkQueue};
use crate::handlers;
use crate::manifest::{apply_manifest, load_manifest};
use crate::reconcile::{Reconciler, Recorder};

#[derive(Clone)]
pub struct AppState {
    pub store: DynStore,
    pub queue: Arc<WorkQueue>,
    pub audit: AuditLog,
    pub metrics_enabled: bool,
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .route("/api/events", get(handlers::list_events))
        .route("/api/namespaces", get(handlers::list_namespaces))
        .route(
            "/api/namespaces/{namespace}",
            get(handlers::get_namespace)
                .put(handlers::put_namespace)
                .delete(handlers::delete_namespace),
        )
        .route(
            "/api/namespaces/{namespace}/configmaps",
            get(handlers::list_config_maps),
        )
        .route(
            "/api/namespaces/{namespace}/configmaps/{name}",
            get(handlers::get_config_map)
                .put(handlers::put_config_map)
                .delete(handlers::delete_config_map),
        )
        .route(
            "/api/namespaces/{namespace}/propagations",
            get(handlers::list_propagations),
        )
        .route(
            "/api/namespaces/{namespace}/propagations/{name}",
            get(handlers::get_propagation)
                .put(handlers::put_propagation)
                .delete(handlers::delete_propagation),
        )
        .route(
            "/api/namespaces/{namespace}/propagations/{name}/reconcile",
            post(handlers::reconcile_propagation),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &axum::http::Request<_>| {
                        use tracing::field::Empty;
                        tracing::info_span!(
                            "http.request",
                            http.method = %req.method(),
                            http.target = %req.uri(),
                            http.status_code = Empty,
                        )
                    })
                    .on_response(
                        |res: &axum::http::Response<_>,
                         latency: std::time::Duration,
                         span: &tracing::Span| {
                            span.record(
                                "http.status_code",
                                tracing::field::display(res.status().as_u16()),
                            );
                            tracing::info!(
                                http.status = %res.status().as_u16(),
                                elapsed_ms = %latency.as_millis(),
                                "request handled"
                            );
                        },
                    ),
            ),
        )
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct PropagatorServer {
    addr: SocketAddr,
    app: Router,
    controller: ControllerHandle,
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Seeds the store, starts the audit collector and the controller, and
    /// assembles the router.
    pub async fn build(self) -> anyhow::Result<PropagatorServer> {
        let cfg = self.config;
        let broadcaster = EventBroadcaster::new_shared();
        let store: DynStore = Arc::new(EventedStore::new(
            InMemoryStore::new(),
            Arc::clone(&broadcaster),
        ));

        let audit = AuditLog::new(cfg.controller.audit_buffer);
        audit.spawn_collector(&broadcaster);

        if let Some(path) = &cfg.bootstrap.manifest {
            let manifest = load_manifest(path)?;
            apply_manifest(store.as_ref(), &manifest).await?;
        }

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Recorder::new(Arc::clone(&broadcaster)),
            cfg.reconciler_settings(),
        ));
        let controller = Controller::new(reconciler, broadcaster, &cfg.controller)
            .spawn()
            .await?;

        let state = AppState {
            store,
            queue: controller.queue(),
            audit,
            metrics_enabled: cfg.metrics.enabled,
        };
        Ok(PropagatorServer {
            addr: cfg.addr(),
            app: build_app(state, &cfg),
            controller,
        })
    }
}

impl PropagatorServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.controller.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
