//! Wire types for archive.org API responses.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Response body of `GET /metadata/<identifier>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveMetadata {
    /// The raw `metadata` object. Values are strings or arrays of strings.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub files: Vec<ArchiveFile>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub item_size: Option<u64>,
    #[serde(default)]
    pub is_dark: bool,
}

impl ArchiveMetadata {
    /// First string value of a metadata field, if present.
    pub fn first(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(values) => values.iter().find_map(Value::as_str),
            _ => None,
        }
    }

    /// All string values of a metadata field (a lone string becomes one entry).
    pub fn all(&self, key: &str) -> Vec<&str> {
        match self.metadata.get(key) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// One entry of the `files` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveFile {
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
}

/// Response body of `GET /advancedsearch.php?...&output=json`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchResponse {
    pub response: SearchBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchBody {
    #[serde(default, rename = "numFound")]
    pub num_found: u64,
    #[serde(default)]
    pub docs: Vec<SearchDoc>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchDoc {
    pub identifier: String,
}

/// archive.org reports sizes as either numbers or numeric strings.
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
