//! Stage executor registry
//!
//! Resolves a job to an [`ExecutorBinding`] (kind, model, provider and the
//! rule that picked the model) and hands execution to the executor bound to
//! the job's kind. Resolution is total: unmapped styles and kinds fall
//! through to defaults, and kinds without a dedicated executor use the
//! fallback one.

pub mod style_map;

pub use style_map::{BindingSource, StyleMap};

use serde::{Deserialize, Serialize};
use spool_core::domain::job::{Job, JobKind};
use spool_core::domain::metadata::{
    BINDING_SOURCE_KEY, MODEL_KEY, Metadata, RESOLVED_MODEL_KEY, RESOLVED_PROVIDER_KEY, STYLE_KEY,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::executor::{ExecutorError, ProgressSender, StageExecutor, StageInput, StageOutput};

/// The concrete executor and model a job runs with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorBinding {
    pub kind: JobKind,
    pub model: String,
    pub provider: String,
    pub source: BindingSource,
}

impl ExecutorBinding {
    /// Provider-resolved metadata recorded on the job
    pub fn resolved_metadata(&self) -> Metadata {
        Metadata::from([
            (RESOLVED_MODEL_KEY.to_string(), self.model.clone().into()),
            (RESOLVED_PROVIDER_KEY.to_string(), self.provider.clone().into()),
            (BINDING_SOURCE_KEY.to_string(), self.source.as_str().into()),
        ])
    }
}

pub struct ExecutorRegistry {
    style_map: StyleMap,
    executors: HashMap<JobKind, Arc<dyn StageExecutor>>,
    fallback: Arc<dyn StageExecutor>,
}

impl ExecutorRegistry {
    pub fn new(style_map: StyleMap, fallback: Arc<dyn StageExecutor>) -> Self {
        Self {
            style_map,
            executors: HashMap::new(),
            fallback,
        }
    }

    /// Route one kind to a dedicated executor
    pub fn with_executor(mut self, kind: JobKind, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    fn executor_for(&self, kind: JobKind) -> &Arc<dyn StageExecutor> {
        self.executors.get(&kind).unwrap_or(&self.fallback)
    }

    pub fn resolve(
        &self,
        kind: JobKind,
        style_key: Option<&str>,
        explicit_override: Option<&str>,
    ) -> ExecutorBinding {
        let (model, source) = self.style_map.resolve(kind, style_key, explicit_override);

        ExecutorBinding {
            kind,
            model,
            provider: self.executor_for(kind).provider().to_string(),
            source,
        }
    }

    /// Resolve using the job's `style` and `model` metadata
    pub fn resolve_for(&self, job: &Job) -> ExecutorBinding {
        self.resolve(job.kind, job.metadata_str(STYLE_KEY), job.metadata_str(MODEL_KEY))
    }

    /// Run one attempt; retrying is up to the caller
    pub async fn execute(
        &self,
        binding: &ExecutorBinding,
        input: &StageInput,
        progress: ProgressSender,
    ) -> Result<StageOutput, ExecutorError> {
        self.executor_for(binding.kind)
            .execute(binding, input, progress)
            .await
    }
}
