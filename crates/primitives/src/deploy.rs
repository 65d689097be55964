//! Deployment targets and rendered artifacts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One reachable data-plane target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Pod name.
    pub name: String,
    pub namespace: String,
    /// Base URL of the instance's data-plane API.
    pub url: String,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            url: url.into(),
        }
    }

    /// A record the deployer can act on. Malformed entries are skipped with
    /// an error event rather than failing the whole deployment.
    pub fn is_wellformed(&self) -> bool {
        !self.name.is_empty() && !self.url.is_empty()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.namespace, self.name, self.url)
    }
}

/// Auxiliary artifacts referenced by the rendered main config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxFiles {
    #[serde(default)]
    pub maps: BTreeMap<String, String>,
    #[serde(default)]
    pub certificates: BTreeMap<String, String>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl AuxFiles {
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty() && self.certificates.is_empty() && self.files.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.maps.len() + self.certificates.len() + self.files.len()
    }

    pub fn byte_size(&self) -> usize {
        self.maps
            .values()
            .chain(self.certificates.values())
            .chain(self.files.values())
            .map(String::len)
            .sum()
    }
}

/// Output of one template render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedOutput {
    /// The main `haproxy.cfg` text.
    pub main: String,
    pub aux: AuxFiles,
}

impl RenderedOutput {
    pub fn byte_size(&self) -> usize {
        self.main.len() + self.aux.byte_size()
    }
}
