//! Declarative tree documents
//!
//! A document has two sections: `types` with custom type specifications and
//! `nodes` with the node hierarchy. YAML and JSON are supported as textual
//! encodings. Mappings keep their order and duplicate keys, so the builder can
//! report duplicates instead of silently keeping the last entry.

use indexmap::IndexMap;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Unknown file suffix: {0}")]
    UnknownFormat(PathBuf),
}

/// Ordered mapping that keeps duplicate keys
///
/// `null` deserializes as an empty mapping and `null` values as `T::default()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entries<T>(Vec<(String, T)>);

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Entries<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    /// First entry stored under `key`
    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> FromIterator<(String, T)> for Entries<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

struct EntriesVisitor<T>(PhantomData<T>);

impl<'de, T> Visitor<'de> for EntriesVisitor<T>
where
    T: Deserialize<'de> + Default,
{
    type Value = Entries<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a mapping")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Entries::default())
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Entries::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Option<T>>()? {
            entries.push((key, value.unwrap_or_default()));
        }
        Ok(Entries(entries))
    }
}

impl<'de, T> Deserialize<'de> for Entries<T>
where
    T: Deserialize<'de> + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EntriesVisitor(PhantomData))
    }
}

/// Signal declared for a property node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SignalSetting {
    /// `true` for the default `chng` signal, `false` for none
    Enabled(bool),
    /// Custom signal name
    Named(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub nodes: Entries<NodeSpec>,
    #[serde(default)]
    pub methods: Entries<MethodSpec>,
    /// Type name that turns the node into a property node
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub readonly: Option<bool>,
    #[serde(default)]
    pub signal: Option<SignalSetting>,
    #[serde(default)]
    pub description: Option<String>,
    /// Keys not recognized above, reported by the builder
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MethodSpec {
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub flags: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

/// Parsed but not yet interpreted tree document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Document {
    /// Custom type specifications, interpreted by the types loader
    #[serde(default)]
    pub types: Entries<serde_json::Value>,
    #[serde(default)]
    pub nodes: Entries<NodeSpec>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl Document {
    pub fn from_yaml(content: &str) -> Result<Self, DocumentError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a document, picking the format from the file suffix
    pub fn from_file(path: &Path) -> Result<Self, DocumentError> {
        let suffix = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loading tree document");
        match suffix.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            _ => Err(DocumentError::UnknownFormat(path.to_path_buf())),
        }
    }
}
