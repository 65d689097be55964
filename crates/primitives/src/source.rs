//! Extraction of typed inputs from watcher-supplied source objects.
//!
//! The resource watcher hands the core opaque manifests (ConfigMap- and
//! Secret-shaped JSON). These helpers pull out the pieces the loaders need.
//! Extraction never panics: any malformed manifest becomes a [`SourceError`]
//! which the loaders turn into `config.invalid` / `credentials.invalid`
//! events.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

/// Errors while extracting data from a source object.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source object is not a JSON object")]
    NotAnObject,
    #[error("missing or non-string field {0}")]
    MissingField(&'static str),
    #[error("secret value {key:?} is not valid base64: {source}")]
    Base64 {
        key: String,
        source: base64::DecodeError,
    },
}

/// The controller's ConfigMap, reduced to what the config loader consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub name: String,
    pub namespace: String,
    /// `metadata.resourceVersion`.
    pub version: String,
    /// The TOML configuration document from `data.config`.
    pub document: String,
}

/// The controller's Secret, reduced to decoded key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSource {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl SecretSource {
    /// Returns a decoded value as UTF-8, if present and valid.
    pub fn utf8(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|raw| std::str::from_utf8(raw).ok())
    }
}

/// Best-effort resource version, for error events about unparseable objects.
pub fn source_version(object: &Value) -> Option<String> {
    object
        .pointer("/metadata/resourceVersion")?
        .as_str()
        .map(str::to_owned)
}

fn string_field(object: &Value, pointer: &str, name: &'static str) -> Result<String, SourceError> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(SourceError::MissingField(name))
}

/// Extracts the config document from a ConfigMap-shaped object.
pub fn parse_config_source(object: &Value) -> Result<ConfigSource, SourceError> {
    if !object.is_object() {
        return Err(SourceError::NotAnObject);
    }
    Ok(ConfigSource {
        name: string_field(object, "/metadata/name", "metadata.name")?,
        namespace: string_field(object, "/metadata/namespace", "metadata.namespace")?,
        version: string_field(object, "/metadata/resourceVersion", "metadata.resourceVersion")?,
        document: string_field(object, "/data/config", "data.config")?,
    })
}

/// Extracts and base64-decodes the data of a Secret-shaped object.
pub fn parse_secret_source(object: &Value) -> Result<SecretSource, SourceError> {
    if !object.is_object() {
        return Err(SourceError::NotAnObject);
    }
    let mut data = BTreeMap::new();
    if let Some(map) = object.pointer("/data").and_then(Value::as_object) {
        for (key, value) in map {
            let encoded = value.as_str().unwrap_or_default();
            let decoded = BASE64
                .decode(encoded)
                .map_err(|source| SourceError::Base64 {
                    key: key.clone(),
                    source,
                })?;
            data.insert(key.clone(), decoded);
        }
    }
    Ok(SecretSource {
        name: string_field(object, "/metadata/name", "metadata.name")?,
        namespace: string_field(object, "/metadata/namespace", "metadata.namespace")?,
        version: string_field(object, "/metadata/resourceVersion", "metadata.resourceVersion")?,
        data,
    })
}
