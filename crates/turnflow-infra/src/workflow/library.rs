//! Directory-backed workflow library.
//!
//! Loads every workflow document under a directory (`{data_dir}/workflows`
//! by default) and serves them by id. A turn selects a stored workflow by
//! setting `extra.workflow` in its execution config; turns that select none
//! fall through to another source, normally the pattern source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use turnflow_core::workflow::definition::{WorkflowDocumentError, discover_workflows};
use turnflow_core::workflow::{SourceError, WorkflowSource};
use turnflow_types::plan::ExecutionConfig;
use turnflow_types::workflow::WorkflowDefinition;

/// Execution config key naming a stored workflow.
pub const WORKFLOW_SELECTOR_KEY: &str = "workflow";

/// Default workflow directory under the data dir.
pub fn workflows_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("workflows")
}

#[derive(Default)]
pub struct WorkflowLibrary {
    workflows: HashMap<String, WorkflowDefinition>,
    fallback: Option<Arc<dyn WorkflowSource>>,
}

impl WorkflowLibrary {
    /// Load every parseable workflow file under `dir`. A missing directory
    /// yields an empty library. The first file (in path order) wins when two
    /// declare the same `workflow_id`.
    pub fn load(dir: &Path) -> Result<Self, WorkflowDocumentError> {
        let mut library = Self::default();
        for (path, definition) in discover_workflows(dir)? {
            library.insert_from(&path, definition);
        }
        tracing::info!(dir = %dir.display(), count = library.len(), "workflow library loaded");
        Ok(library)
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn WorkflowSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Add a definition; returns false if the id was already taken.
    pub fn insert(&mut self, definition: WorkflowDefinition) -> bool {
        if self.workflows.contains_key(&definition.workflow_id) {
            return false;
        }
        self.workflows.insert(definition.workflow_id.clone(), definition);
        true
    }

    fn insert_from(&mut self, path: &Path, definition: WorkflowDefinition) {
        let workflow_id = definition.workflow_id.clone();
        if !self.insert(definition) {
            tracing::warn!(path = %path.display(), %workflow_id, "duplicate workflow id; keeping the first");
        }
    }

    pub fn get(&self, workflow_id: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(workflow_id)
    }

    /// Stored workflow ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl WorkflowSource for WorkflowLibrary {
    fn definition_for(&self, workflow_id: &str, config: &ExecutionConfig) -> Result<WorkflowDefinition, SourceError> {
        let selected = config
            .extra
            .get(WORKFLOW_SELECTOR_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(name) = selected {
            return match self.workflows.get(name) {
                Some(definition) => {
                    tracing::debug!(workflow = name, "using stored workflow");
                    Ok(definition.clone())
                }
                None => Err(SourceError::NotFound(name.to_string())),
            };
        }

        match &self.fallback {
            Some(fallback) => fallback.definition_for(workflow_id, config),
            None => Err(SourceError::NotFound(workflow_id.to_string())),
        }
    }
}
