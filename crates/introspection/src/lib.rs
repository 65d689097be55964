//! State cache and read-only introspection endpoint.
//!
//! The state cache is one more bus subscriber: it folds the full event
//! stream into a last-write-wins projection and registers named variables
//! over it. The HTTP server exposes those variables as JSON, with optional
//! kubectl-style JSONPath field selection.

mod cache;
mod http;
mod vars;

pub use cache::{DEFAULT_EVENT_HISTORY, StateCache};
pub use http::{router, serve};
pub use vars::{VarError, VarRegistry, VarSource};
