//! `/debug/pprof/heap` via jemalloc, merged into the introspection router
//! when the `jemalloc-prof` feature is enabled.

use axum::Router;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use axum::routing::get;

pub(crate) fn router() -> Router {
    Router::new().route("/debug/pprof/heap", get(heap))
}

async fn heap() -> Response<Body> {
    match dump().await {
        Ok(profile) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_ENCODING, "gzip")
            .header(
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"heap.pb.gz\"",
            )
            .body(Body::from(profile))
            .expect("static response"),
        Err((status, message)) => Response::builder()
            .status(status)
            .body(Body::from(message))
            .expect("static response"),
    }
}

/// Gzipped pprof-format heap profile, or why one is unavailable.
async fn dump() -> Result<Vec<u8>, (StatusCode, String)> {
    let controller = jemalloc_pprof::PROF_CTL.as_ref().ok_or((
        StatusCode::INTERNAL_SERVER_ERROR,
        "heap profiling not enabled".to_owned(),
    ))?;
    let mut controller = controller.lock().await;
    if !controller.activated() {
        return Err((
            StatusCode::FORBIDDEN,
            "heap profiling not activated; start with MALLOC_CONF=prof:true".to_owned(),
        ));
    }
    controller.dump_pprof().map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("heap profile dump failed: {err}"),
        )
    })
}
