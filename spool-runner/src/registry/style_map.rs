//! Style to model mapping
//!
//! Pure data: which model a style prefers for each job kind, per-kind
//! defaults and one global default. Adding a style is an entry in the JSON
//! file, not a code change.

use serde::{Deserialize, Serialize};
use spool_core::domain::job::JobKind;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Models a style prefers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleModels {
    /// One model for every kind
    Any(String),
    /// Per-kind preferences; kinds not listed fall through to the defaults
    PerKind(HashMap<JobKind, String>),
}

impl StyleModels {
    fn model_for(&self, kind: JobKind) -> Option<&str> {
        match self {
            StyleModels::Any(model) => Some(model),
            StyleModels::PerKind(models) => models.get(&kind).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleMap {
    #[serde(default)]
    pub styles: HashMap<String, StyleModels>,
    #[serde(default)]
    pub defaults: HashMap<JobKind, String>,
    pub global_default: String,
}

/// Which rule produced a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    Override,
    Style,
    KindDefault,
    GlobalDefault,
}

impl BindingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingSource::Override => "override",
            BindingSource::Style => "style",
            BindingSource::KindDefault => "kind_default",
            BindingSource::GlobalDefault => "global_default",
        }
    }
}

impl fmt::Display for BindingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StyleMap {
    /// Map used when no file is configured
    pub fn builtin() -> Self {
        let styles = HashMap::from([
            (
                "cinematic".to_string(),
                StyleModels::PerKind(HashMap::from([
                    (JobKind::RenderBatch, "image-cinematic-xl".to_string()),
                    (JobKind::QuickCreateUniverse, "universe-cinematic".to_string()),
                    (JobKind::Tts, "voice-narrator-deep".to_string()),
                ])),
            ),
            (
                "anime".to_string(),
                StyleModels::PerKind(HashMap::from([
                    (JobKind::RenderBatch, "image-anime-v3".to_string()),
                    (JobKind::QuickCreateUniverse, "universe-anime".to_string()),
                ])),
            ),
            (
                "photoreal".to_string(),
                StyleModels::PerKind(HashMap::from([(
                    JobKind::RenderBatch,
                    "image-photoreal-xl".to_string(),
                )])),
            ),
        ]);

        let defaults = HashMap::from([
            (JobKind::Tts, "voice-standard".to_string()),
            (JobKind::RenderBatch, "image-general".to_string()),
            (JobKind::Compose, "compose-ffmpeg".to_string()),
            (JobKind::QuickCreateUniverse, "universe-standard".to_string()),
        ]);

        Self {
            styles,
            defaults,
            global_default: "general".to_string(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read style map {}", path.display()))?;
        let map = Self::from_json(&raw)
            .with_context(|| format!("Failed to parse style map {}", path.display()))?;
        map.validate()?;
        Ok(map)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.global_default.trim().is_empty() {
            anyhow::bail!("style map global_default cannot be empty");
        }
        Ok(())
    }

    /// Pick a model: explicit override, then the style's preference for the
    /// kind, then the kind default, then the global default
    ///
    /// Blank strings count as absent, so the result is always a model.
    pub fn resolve(
        &self,
        kind: JobKind,
        style_key: Option<&str>,
        explicit_override: Option<&str>,
    ) -> (String, BindingSource) {
        if let Some(model) = non_blank(explicit_override) {
            return (model.to_string(), BindingSource::Override);
        }

        let styled = non_blank(style_key)
            .and_then(|key| self.styles.get(key))
            .and_then(|models| non_blank(models.model_for(kind)));
        if let Some(model) = styled {
            return (model.to_string(), BindingSource::Style);
        }

        if let Some(model) = non_blank(self.defaults.get(&kind).map(String::as_str)) {
            return (model.to_string(), BindingSource::KindDefault);
        }

        (self.global_default.clone(), BindingSource::GlobalDefault)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> StyleMap {
        StyleMap::from_json(
            r#"{
                "styles": {
                    "noir": {"render_batch": "image-noir", "tts": "voice-gravel"},
                    "sketch": "sketch-all"
                },
                "defaults": {"render_batch": "image-general"},
                "global_default": "general"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_precedence() {
        let map = map();

        assert_eq!(
            map.resolve(JobKind::RenderBatch, Some("noir"), Some("image-custom")),
            ("image-custom".to_string(), BindingSource::Override)
        );
        assert_eq!(
            map.resolve(JobKind::RenderBatch, Some("noir"), None),
            ("image-noir".to_string(), BindingSource::Style)
        );
        assert_eq!(
            map.resolve(JobKind::RenderBatch, None, None),
            ("image-general".to_string(), BindingSource::KindDefault)
        );
        assert_eq!(
            map.resolve(JobKind::Compose, None, None),
            ("general".to_string(), BindingSource::GlobalDefault)
        );
    }

    #[test]
    fn test_unknown_or_partial_style_falls_through() {
        let map = map();

        assert_eq!(
            map.resolve(JobKind::RenderBatch, Some("vaporwave"), None).1,
            BindingSource::KindDefault
        );
        // noir has no compose preference
        assert_eq!(
            map.resolve(JobKind::Compose, Some("noir"), None),
            ("general".to_string(), BindingSource::GlobalDefault)
        );
        assert_eq!(
            map.resolve(JobKind::Compose, Some("sketch"), None),
            ("sketch-all".to_string(), BindingSource::Style)
        );
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let map = map();
        assert_eq!(
            map.resolve(JobKind::Tts, Some("noir"), Some("  ")),
            ("voice-gravel".to_string(), BindingSource::Style)
        );
        assert_eq!(
            map.resolve(JobKind::Tts, Some(""), None).1,
            BindingSource::GlobalDefault
        );
    }

    #[test]
    fn test_resolution_is_total_and_deterministic() {
        let map = StyleMap::builtin();
        let styles = [None, Some("cinematic"), Some("anime"), Some("unknown")];
        let overrides = [None, Some("forced-model")];

        for kind in JobKind::ALL {
            for style in styles {
                for explicit in overrides {
                    let first = map.resolve(kind, style, explicit);
                    assert!(!first.0.is_empty());
                    assert_eq!(first, map.resolve(kind, style, explicit));
                    if explicit.is_some() {
                        assert_eq!(first, ("forced-model".to_string(), BindingSource::Override));
                    }
                }
            }
        }
    }

    #[test]
    fn test_validation() {
        assert!(StyleMap::builtin().validate().is_ok());
        assert!(StyleMap::from_json(r#"{"global_default": " "}"#).unwrap().validate().is_err());
        assert!(StyleMap::from_json(r#"{"styles": {}}"#).is_err());
    }
}
