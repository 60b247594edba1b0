//! Log actions and the version-file payload codec.
//!
//! A version file is a UTF-8 JSON array of action objects, each tagged by a `"type"`
//! discriminator. Parsing is strict about the discriminator (an unknown type fails) but
//! lenient about fields (unknown fields are ignored), so older readers keep working as
//! writers grow the schema.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DeltaResult;

/// One entry in a version file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Add(AddFile),
    Remove(RemoveFile),
    CommitInfo(CommitInfo),
}

impl Action {
    /// The file path this action is about, if it is about one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::Add(add) => Some(&add.path),
            Action::Remove(remove) => Some(&remove.path),
            Action::CommitInfo(_) => None,
        }
    }
}

/// A data file joining the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFile {
    /// Path relative to the table root.
    pub path: String,
    /// Size of the file in bytes.
    pub size: u64,
    /// When the file was written, in milliseconds since the epoch.
    pub modification_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_change: Option<bool>,
    /// Opaque pass-through metadata; preserved on rewrite, never interpreted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
}

impl AddFile {
    pub fn new(path: impl Into<String>, size: u64, modification_time: u64) -> Self {
        Self {
            path: path.into(),
            size,
            modification_time,
            partition_values: None,
            data_change: None,
            tags: None,
            stats: None,
        }
    }
}

/// A data file leaving the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFile {
    /// Path relative to the table root.
    pub path: String,
    /// When the removal was committed, in milliseconds since the epoch.
    pub deletion_timestamp: u64,
}

/// Provenance record appended to every commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub operation: String,
    #[serde(default)]
    pub parameters: IndexMap<String, String>,
    /// Commit time in milliseconds since the epoch.
    pub timestamp: u64,
}

/// Serialize one version's actions into the version-file payload.
pub fn encode(actions: &[Action]) -> DeltaResult<Bytes> {
    Ok(serde_json::to_vec(actions)?.into())
}

/// Parse a version-file payload back into its actions.
pub fn decode(data: &[u8]) -> DeltaResult<Vec<Action>> {
    Ok(serde_json::from_slice(data)?)
}
