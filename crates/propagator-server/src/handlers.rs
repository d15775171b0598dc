use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use propagator_api::{ApiError, ApiResult};
use propagator_core::events::AuditEvent;
use propagator_core::{ConfigMap, ConfigMapPropagation, Namespace, ObjectMeta, Selector};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::controller::ObjectKey;
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "backend": state.store.backend_name(),
            "queueDepth": state.queue.len(),
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    if !state.metrics_enabled {
        return Err(ApiError::not_found("metrics are disabled"));
    }
    let body = crate::metrics::render_metrics()
        .ok_or_else(|| ApiError::unavailable("metrics recorder is not installed"))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Fills in the identity from the path, rejecting bodies that disagree.
fn bind_identity(meta: &mut ObjectMeta, namespace: &str, name: &str) -> ApiResult<()> {
    if meta.name.is_empty() {
        meta.name = name.to_string();
    } else if meta.name != name {
        return Err(ApiError::bad_request(format!(
            "metadata.name '{}' does not match path '{name}'",
            meta.name
        )));
    }
    if meta.namespace.is_empty() {
        meta.namespace = namespace.to_string();
    } else if meta.namespace != namespace {
        return Err(ApiError::bad_request(format!(
            "metadata.namespace '{}' does not match path '{namespace}'",
            meta.namespace
        )));
    }
    Ok(())
}

fn list_body<T: Serialize>(kind: &str, items: Vec<T>) -> Json<serde_json::Value> {
    Json(json!({ "kind": kind, "items": items }))
}

fn written<T>(created: bool, object: T) -> (StatusCode, Json<T>) {
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(object))
}

// ---- Namespaces ----

pub async fn list_namespaces(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let items = state.store.list_namespaces(&Selector::everything()).await?;
    Ok(list_body("NamespaceList", items))
}

pub async fn get_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<Namespace>> {
    state
        .store
        .get_namespace(&namespace)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Namespace not found: {namespace}")))
}

pub async fn put_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Json(mut body): Json<Namespace>,
) -> ApiResult<impl IntoResponse> {
    bind_identity(&mut body.metadata, "", &namespace)?;
    let exists = state.store.get_namespace(&namespace).await?.is_some();
    let stored = if exists {
        state.store.update_namespace(&body).await?
    } else {
        state.store.create_namespace(&body).await?
    };
    Ok(written(!exists, stored))
}

pub async fn delete_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<Namespace>> {
    Ok(Json(state.store.delete_namespace(&namespace).await?))
}

// ---- ConfigMaps ----

pub async fn list_config_maps(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let items = state
        .store
        .list_config_maps(Some(&namespace), &Selector::everything())
        .await?;
    Ok(list_body("ConfigMapList", items))
}

pub async fn get_config_map(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ConfigMap>> {
    state
        .store
        .get_config_map(&namespace, &name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("ConfigMap not found: {namespace}/{name}")))
}

pub async fn put_config_map(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(mut body): Json<ConfigMap>,
) -> ApiResult<impl IntoResponse> {
    bind_identity(&mut body.metadata, &namespace, &name)?;
    let exists = state.store.get_config_map(&namespace, &name).await?.is_some();
    let stored = if exists {
        state.store.update_config_map(&body).await?
    } else {
        state.store.create_config_map(&body).await?
    };
    Ok(written(!exists, stored))
}

pub async fn delete_config_map(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ConfigMap>> {
    Ok(Json(
        state.store.delete_config_map(&namespace, &name, None).await?,
    ))
}

// ---- ConfigMapPropagations ----

pub async fn list_propagations(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let items = state
        .store
        .list_propagations(Some(&namespace), &Selector::everything())
        .await?;
    Ok(list_body("ConfigMapPropagationList", items))
}

pub async fn get_propagation(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ConfigMapPropagation>> {
    state
        .store
        .get_propagation(&namespace, &name)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(format!("ConfigMapPropagation not found: {namespace}/{name}"))
        })
}

pub async fn put_propagation(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(mut body): Json<ConfigMapPropagation>,
) -> ApiResult<impl IntoResponse> {
    bind_identity(&mut body.metadata, &namespace, &name)?;
    // Status is written by the reconciler only.
    body.status = Default::default();

    let existing = state.store.get_propagation(&namespace, &name).await?;
    let created = existing.is_none();
    let stored = match existing {
        Some(existing) => {
            body.metadata.finalizers = existing.metadata.finalizers;
            state.store.update_propagation(&body).await?
        }
        None => state.store.create_propagation(&body).await?,
    };
    Ok(written(created, stored))
}

/// 202 while finalizers hold the propagation, 200 once it is gone.
pub async fn delete_propagation(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let result = state.store.delete_propagation(&namespace, &name).await?;
    let status = if result.metadata.finalizers.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(result)))
}

pub async fn reconcile_propagation(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_propagation(&namespace, &name).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "ConfigMapPropagation not found: {namespace}/{name}"
        )));
    }
    state.queue.add(ObjectKey::new(&namespace, &name));
    tracing::info!(propagation = %format!("{namespace}/{name}"), "reconcile requested");
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
}

// ---- Audit events ----

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: usize,
}

fn default_events_limit() -> usize {
    50
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<AuditEvent>> {
    Json(state.audit.recent(query.limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_filled_from_path() {
        let mut meta = ObjectMeta::default();
        bind_identity(&mut meta, "team-a", "app").unwrap();
        assert_eq!(meta.namespace, "team-a");
        assert_eq!(meta.name, "app");
    }

    #[test]
    fn mismatched_identity_is_rejected() {
        let mut meta = ObjectMeta::new("team-a", "other");
        let err = bind_identity(&mut meta, "team-a", "app").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let mut meta = ObjectMeta::new("team-b", "app");
        assert!(bind_identity(&mut meta, "team-a", "app").is_err());
    }
}
