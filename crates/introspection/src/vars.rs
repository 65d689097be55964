//! Named introspection variables.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

/// Why a variable could not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VarError {
    /// The backing state has not been populated yet. A variable never
    /// returns a zero value masquerading as real data.
    #[error("not ready")]
    NotReady,
    #[error("unknown variable {0:?}")]
    Unknown(String),
}

/// Produces the current value of one variable.
pub trait VarSource: Send + Sync {
    fn value(&self) -> Result<Value, VarError>;
}

impl<F> VarSource for F
where
    F: Fn() -> Result<Value, VarError> + Send + Sync,
{
    fn value(&self) -> Result<Value, VarError> {
        self()
    }
}

/// Instance-owned registry of variables. Owned by the controller iteration
/// and dropped with it; nothing here is global.
#[derive(Default)]
pub struct VarRegistry {
    vars: RwLock<IndexMap<String, Arc<dyn VarSource>>>,
}

impl VarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a variable.
    pub fn register(&self, name: impl Into<String>, source: Arc<dyn VarSource>) {
        self.vars.write().insert(name.into(), source);
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Result<Value, VarError> {
        let source = self
            .vars
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VarError::Unknown(name.to_owned()))?;
        source.value()
    }

    /// Every variable at once. Not-ready variables surface their error text
    /// instead of a value.
    pub fn all(&self) -> Value {
        let sources: Vec<(String, Arc<dyn VarSource>)> = self
            .vars
            .read()
            .iter()
            .map(|(name, source)| (name.clone(), Arc::clone(source)))
            .collect();
        let mut map = serde_json::Map::new();
        for (name, source) in sources {
            let entry = match source.value() {
                Ok(value) => value,
                Err(err) => serde_json::json!({"error": err.to_string()}),
            };
            map.insert(name, entry);
        }
        Value::Object(map)
    }
}
