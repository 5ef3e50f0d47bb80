//! Job metadata
//!
//! Metadata is an opaque key/value bag fixed at submission. The only keys a
//! worker may add later are the provider-resolved ones in [`RESOLVED_KEYS`].

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::domain::job::JobKind;

pub type Metadata = BTreeMap<String, JsonValue>;

/// Aesthetic preset used to pick a default model
pub const STYLE_KEY: &str = "style";
/// Explicit model override supplied by the caller
pub const MODEL_KEY: &str = "model";

pub const RESOLVED_MODEL_KEY: &str = "resolved_model";
pub const RESOLVED_PROVIDER_KEY: &str = "resolved_provider";
pub const BINDING_SOURCE_KEY: &str = "binding_source";

/// Keys written by workers after creation
pub const RESOLVED_KEYS: [&str; 3] = [RESOLVED_MODEL_KEY, RESOLVED_PROVIDER_KEY, BINDING_SOURCE_KEY];

/// Why submitted metadata was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("'{field}' is required for {kind} jobs")]
    Missing { kind: JobKind, field: &'static str },

    #[error("'{field}' must not be empty")]
    Empty { field: String },

    #[error("'{field}' must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("'{field}' is set by workers and cannot be submitted")]
    Reserved { field: String },
}

enum Shape {
    Text,
    List,
}

fn required_field(kind: JobKind) -> (&'static str, Shape) {
    match kind {
        JobKind::Tts => ("text", Shape::Text),
        JobKind::RenderBatch => ("prompts", Shape::List),
        JobKind::Compose => ("clips", Shape::List),
        JobKind::QuickCreateUniverse => ("prompt", Shape::Text),
    }
}

/// Name of the field every job of `kind` must carry
pub fn required_field_name(kind: JobKind) -> &'static str {
    required_field(kind).0
}

/// Validate metadata submitted for a new job of `kind`
pub fn validate_metadata(kind: JobKind, metadata: &Metadata) -> Result<(), MetadataError> {
    if let Some(reserved) = RESOLVED_KEYS.iter().find(|key| metadata.contains_key(**key)) {
        return Err(MetadataError::Reserved {
            field: reserved.to_string(),
        });
    }

    let (field, shape) = required_field(kind);
    let value = metadata
        .get(field)
        .ok_or(MetadataError::Missing { kind, field })?;

    match shape {
        Shape::Text => {
            let text = value.as_str().ok_or(MetadataError::WrongType {
                field: field.to_string(),
                expected: "a string",
            })?;
            if text.trim().is_empty() {
                return Err(MetadataError::Empty {
                    field: field.to_string(),
                });
            }
        }
        Shape::List => {
            let items = value.as_array().ok_or(MetadataError::WrongType {
                field: field.to_string(),
                expected: "an array",
            })?;
            if items.is_empty() {
                return Err(MetadataError::Empty {
                    field: field.to_string(),
                });
            }
        }
    }

    for key in [STYLE_KEY, MODEL_KEY] {
        if let Some(value) = metadata.get(key) {
            if !value.is_string() {
                return Err(MetadataError::WrongType {
                    field: key.to_string(),
                    expected: "a string",
                });
            }
        }
    }

    Ok(())
}
