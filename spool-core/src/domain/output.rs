//! Output descriptors
//!
//! Jobs never store media, only references to it.

use serde::{Deserialize, Serialize};

/// Status of a single output produced by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Pending,
    Running,
    Done,
    Error,
}

/// Reference to one generated artifact
///
/// Keyed by `id`, which the caller (or executor) supplies. Re-reporting the
/// same id replaces the previous descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub id: String,
    #[serde(default)]
    pub content_hash: Option<String>,
    pub status: OutputStatus,
    #[serde(default)]
    pub url: Option<String>,
}

impl OutputDescriptor {
    pub fn done(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_hash: None,
            status: OutputStatus::Done,
            url: Some(url.into()),
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

/// Upsert `incoming` into `outputs` by id
///
/// Existing entries are replaced in place so first-insertion order is kept;
/// new ids are appended.
pub fn merge_outputs(outputs: &mut Vec<OutputDescriptor>, incoming: Vec<OutputDescriptor>) {
    for output in incoming {
        match outputs.iter_mut().find(|existing| existing.id == output.id) {
            Some(existing) => *existing = output,
            None => outputs.push(output),
        }
    }
}
