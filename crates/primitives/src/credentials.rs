//! Data-plane credentials with redacted debug/serialize surfaces.

use serde::ser::SerializeStruct as _;
use serde::{Serialize, Serializer};

/// Credentials extracted from the controller's Secret.
///
/// The serialized projection (what the introspection endpoint exposes) is
/// exactly `{version, has_dataplane_creds}`; raw material is reachable only
/// through the explicit accessors.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    version: String,
    dataplane: Option<BasicAuth>,
}

impl Credentials {
    pub fn new(version: impl Into<String>, dataplane: Option<BasicAuth>) -> Self {
        Self {
            version: version.into(),
            dataplane,
        }
    }

    /// The secret's resource version these credentials were extracted from.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn has_dataplane_creds(&self) -> bool {
        self.dataplane.is_some()
    }

    pub fn dataplane(&self) -> Option<&BasicAuth> {
        self.dataplane.as_ref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("version", &self.version)
            .field("has_dataplane_creds", &self.has_dataplane_creds())
            .finish()
    }
}

impl Serialize for Credentials {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Credentials", 2)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("has_dataplane_creds", &self.has_dataplane_creds())?;
        state.end()
    }
}

/// A username/password pair. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}
