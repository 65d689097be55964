//! Admission webhook adapter.
//!
//! An HTTPS endpoint the API server consults before persisting changes to
//! watched objects. Validation reuses the same validators as the config
//! pipeline through a synchronous scatter-gather over the bus: admission is
//! a blocking call with a deadline, so the request timeout (≤5s) is the
//! fail-closed safety valve — any internal error or missing responder
//! denies the request.

mod registry;
mod review;
mod server;
mod stats;
mod tls;

pub use registry::{
    AdmissionHandler, HandlerRegistry, KindResolver, ScatterGatherValidation, Verdict,
};
pub use review::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, GroupVersionResource, ResponseStatus,
};
pub use server::{TlsListener, WebhookServer};
pub use stats::WebhookStats;
pub use tls::{TlsError, load_server_config};
