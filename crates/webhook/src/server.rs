//! HTTPS admission server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;

use crate::registry::{HandlerRegistry, KindResolver, Verdict};
use crate::review::AdmissionReview;
use crate::stats::WebhookStats;

struct Inner {
    handlers: HandlerRegistry,
    resolver: KindResolver,
    stats: Arc<WebhookStats>,
}

/// The admission endpoint: decode, resolve kind, dispatch to the registered
/// validation function, respond. Always answers within the webhook timeout
/// and never panics; anything unexpected denies.
pub struct WebhookServer {
    inner: Arc<Inner>,
    path: String,
}

impl WebhookServer {
    pub fn new(
        handlers: HandlerRegistry,
        resolver: KindResolver,
        stats: Arc<WebhookStats>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers,
                resolver,
                stats,
            }),
            path: path.into(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.path, post(review_handler))
            .with_state(Arc::clone(&self.inner))
    }

    /// Binds and serves until cancellation. Fails immediately when the TLS
    /// config is unusable or the address is taken.
    pub async fn serve(
        &self,
        addr: SocketAddr,
        tls: Arc<ServerConfig>,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, tls, cancel).await
    }

    /// Serves on an already-bound listener (lets tests bind port zero).
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        tls: Arc<ServerConfig>,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            path = %self.path,
            "admission webhook listening"
        );
        let listener = TlsListener::new(listener, TlsAcceptor::from(tls));
        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
    }
}

async fn review_handler(
    State(inner): State<Arc<Inner>>,
    Json(review): Json<AdmissionReview>,
) -> Response {
    inner.stats.record_request();
    let Some(request) = review.request else {
        inner.stats.record_error();
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "admission review carries no request"})),
        )
            .into_response();
    };

    let resource = &request.resource;
    let verdict = match inner
        .resolver
        .resolve(&resource.group, &resource.version, &resource.resource)
        .and_then(|gvk| inner.handlers.get(&gvk).map(|handler| (gvk, handler)))
    {
        Some((gvk, handler)) => {
            let verdict = handler.review(&gvk, &request).await;
            tracing::info!(
                %gvk,
                namespace = %request.namespace,
                name = %request.name,
                operation = %request.operation,
                allowed = verdict.allowed,
                "admission reviewed"
            );
            verdict
        }
        None if inner.handlers.allow_unregistered() => Verdict::allow(),
        None => Verdict::deny("no validation registered for this resource"),
    };

    if verdict.allowed {
        inner.stats.record_allowed();
    } else {
        inner.stats.record_denied();
    }
    let code = if verdict.allowed { 200 } else { 403 };
    Json(AdmissionReview::response(
        request.uid,
        verdict.allowed,
        verdict.reason,
        code,
    ))
    .into_response()
}

/// A TLS-terminating [`axum::serve::Listener`]. Handshake failures are
/// logged and the listener moves on to the next connection.
pub struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub fn new(inner: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self { inner, acceptor }
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "tcp accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            match self.acceptor.accept(stream).await {
                Ok(tls) => return (tls, addr),
                Err(err) => {
                    tracing::warn!(%addr, error = %err, "tls handshake failed");
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
