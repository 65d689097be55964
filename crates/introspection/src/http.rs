//! Read-only HTTP surface over the variable registry.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use haptic_primitives::JsonPath;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::vars::{VarError, VarRegistry};

/// Builds the introspection router. The binary may merge extra routes (for
/// example a heap-profile endpoint) before serving.
pub fn router(registry: Arc<VarRegistry>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/vars", get(vars_index))
        .route("/vars/all", get(vars_all))
        .route("/vars/{*name}", get(var_value))
        .with_state(registry)
}

/// Serves the router until cancellation.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "introspection endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn vars_index(State(registry): State<Arc<VarRegistry>>) -> Json<serde_json::Value> {
    let names = registry.names();
    Json(json!({"count": names.len(), "paths": names}))
}

/// Full dump. Large; `/vars/{name}` is the intended access path.
async fn vars_all(State(registry): State<Arc<VarRegistry>>) -> Json<serde_json::Value> {
    Json(registry.all())
}

async fn var_value(
    State(registry): State<Arc<VarRegistry>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let value = match registry.get(&name) {
        Ok(value) => value,
        Err(err @ VarError::Unknown(_)) => return error(StatusCode::NOT_FOUND, &err.to_string()),
        Err(err @ VarError::NotReady) => {
            return error(StatusCode::SERVICE_UNAVAILABLE, &err.to_string());
        }
    };

    match params.get("field") {
        None => Json(value).into_response(),
        Some(expression) => {
            let path = match JsonPath::parse(expression) {
                Ok(path) => path,
                Err(err) => return error(StatusCode::BAD_REQUEST, &err.to_string()),
            };
            match path.evaluate(&value) {
                Ok(selected) => Json(selected).into_response(),
                Err(err) => error(StatusCode::NOT_FOUND, &err.to_string()),
            }
        }
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<VarRegistry> {
        let registry = Arc::new(VarRegistry::new());
        registry.register(
            "config",
            Arc::new(|| Ok(json!({"deployment": {"max_parallel": 4}, "names": ["a", "b"]}))),
        );
        registry.register("pending", Arc::new(|| Err(VarError::NotReady)));
        registry.register("webhook/server", Arc::new(|| Ok(json!({"port": 9443}))));
        registry
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn field(expression: &str) -> Query<HashMap<String, String>> {
        Query(HashMap::from([("field".to_owned(), expression.to_owned())]))
    }

    #[tokio::test]
    async fn index_lists_sorted_paths_with_count() {
        let response = vars_index(State(registry())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 3);
        assert_eq!(body["paths"], json!(["config", "pending", "webhook/server"]));
    }

    #[tokio::test]
    async fn all_inlines_errors_for_unready_variables() {
        let response = vars_all(State(registry())).await.into_response();
        let body = body_json(response).await;
        assert_eq!(body["pending"], json!({"error": "not ready"}));
        assert_eq!(body["webhook/server"], json!({"port": 9443}));
    }

    #[tokio::test]
    async fn full_value_without_field() {
        let response = var_value(
            State(registry()),
            Path("config".into()),
            Query(HashMap::new()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["deployment"]["max_parallel"], 4);
    }

    #[tokio::test]
    async fn field_selection_extracts_subvalue() {
        let response = var_value(
            State(registry()),
            Path("config".into()),
            field("{.deployment.max_parallel}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!(4));
    }

    #[tokio::test]
    async fn empty_braces_return_the_full_value() {
        let response = var_value(State(registry()), Path("config".into()), field("{}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["names"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn slash_in_variable_names_is_supported() {
        let response = var_value(
            State(registry()),
            Path("webhook/server".into()),
            Query(HashMap::new()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"port": 9443}));
    }

    #[tokio::test]
    async fn error_shapes() {
        let unknown = var_value(
            State(registry()),
            Path("nope".into()),
            Query(HashMap::new()),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        assert!(body_json(unknown).await["error"].is_string());

        let not_ready = var_value(
            State(registry()),
            Path("pending".into()),
            Query(HashMap::new()),
        )
        .await;
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bad_path = var_value(State(registry()), Path("config".into()), field("nope")).await;
        assert_eq!(bad_path.status(), StatusCode::BAD_REQUEST);

        let missing_field = var_value(
            State(registry()),
            Path("config".into()),
            field("{.missing}"),
        )
        .await;
        assert_eq!(missing_field.status(), StatusCode::NOT_FOUND);
    }
}
