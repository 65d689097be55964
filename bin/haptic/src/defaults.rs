//! Default listen addresses and identities.

pub const INTROSPECTION_LISTEN: &str = "0.0.0.0:8080";
pub const WEBHOOK_LISTEN: &str = "0.0.0.0:9443";
pub const WEBHOOK_PATH: &str = "/validate";
pub const LEASE_NAME: &str = "haptic-leader";
pub const NAMESPACE: &str = "ingress";
