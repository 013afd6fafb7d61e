//! Workflow document import/export and filesystem discovery.
//!
//! A workflow document is a self-describing wrapper around a
//! `WorkflowDefinition`:
//!
//! ```yaml
//! format: turnflow.workflow
//! format_version: 1
//! exported_at: 2026-01-01T00:00:00Z
//! definition: { workflow_id: ..., nodes: [...], edges: [...] }
//! ```
//!
//! Import also accepts a bare definition so hand-written YAML files load
//! without the wrapper. Structural validation is the compiler's job.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use turnflow_types::workflow::WorkflowDefinition;

pub const DOCUMENT_FORMAT: &str = "turnflow.workflow";
pub const DOCUMENT_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkflowDocumentError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported document format '{0}'")]
    UnsupportedFormat(String),

    #[error("unsupported document version {found} (max {max})")]
    UnsupportedVersion { found: u32, max: u32 },

    #[error("unknown file extension: {0}")]
    UnknownExtension(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEncoding {
    Json,
    Yaml,
}

impl DocumentEncoding {
    /// Pick an encoding from a file extension (`json`, `yaml`, `yml`).
    pub fn from_path(path: &Path) -> Result<Self, WorkflowDocumentError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(DocumentEncoding::Json),
            "yaml" | "yml" => Ok(DocumentEncoding::Yaml),
            other => Err(WorkflowDocumentError::UnknownExtension(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub format: String,
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub definition: WorkflowDefinition,
}

impl WorkflowDocument {
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            format: DOCUMENT_FORMAT.to_string(),
            format_version: DOCUMENT_FORMAT_VERSION,
            exported_at: Utc::now(),
            definition,
        }
    }
}

/// Serialize `definition` as a workflow document.
pub fn export_document(
    definition: &WorkflowDefinition,
    encoding: DocumentEncoding,
) -> Result<String, WorkflowDocumentError> {
    let doc = WorkflowDocument::new(definition.clone());
    match encoding {
        DocumentEncoding::Json => {
            serde_json::to_string_pretty(&doc).map_err(|e| WorkflowDocumentError::Parse(e.to_string()))
        }
        DocumentEncoding::Yaml => {
            serde_yaml_ng::to_string(&doc).map_err(|e| WorkflowDocumentError::Parse(e.to_string()))
        }
    }
}

/// Parse a workflow document (or a bare definition).
pub fn import_document(
    text: &str,
    encoding: DocumentEncoding,
) -> Result<WorkflowDefinition, WorkflowDocumentError> {
    let raw: Value = match encoding {
        DocumentEncoding::Json => {
            serde_json::from_str(text).map_err(|e| WorkflowDocumentError::Parse(e.to_string()))?
        }
        DocumentEncoding::Yaml => {
            serde_yaml_ng::from_str(text).map_err(|e| WorkflowDocumentError::Parse(e.to_string()))?
        }
    };

    let Some(format) = raw.get("format") else {
        return serde_json::from_value(raw).map_err(|e| WorkflowDocumentError::Parse(e.to_string()));
    };
    if format.as_str() != Some(DOCUMENT_FORMAT) {
        return Err(WorkflowDocumentError::UnsupportedFormat(
            format.as_str().map_or_else(|| format.to_string(), str::to_string),
        ));
    }

    let doc: WorkflowDocument =
        serde_json::from_value(raw).map_err(|e| WorkflowDocumentError::Parse(e.to_string()))?;
    if doc.format_version > DOCUMENT_FORMAT_VERSION {
        return Err(WorkflowDocumentError::UnsupportedVersion {
            found: doc.format_version,
            max: DOCUMENT_FORMAT_VERSION,
        });
    }
    Ok(doc.definition)
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow from a `.json`, `.yaml` or `.yml` file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowDocumentError> {
    let encoding = DocumentEncoding::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    import_document(&content, encoding)
}

/// Export a workflow document to `path`, creating parent directories.
pub fn save_workflow_file(path: &Path, definition: &WorkflowDefinition) -> Result<(), WorkflowDocumentError> {
    let encoding = DocumentEncoding::from_path(path)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, export_document(definition, encoding)?)?;
    Ok(())
}

/// Discover all workflow files under `base_dir`, recursively.
///
/// Files that fail to parse are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowDocumentError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowDocumentError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if DocumentEncoding::from_path(&path).is_ok() {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => tracing::warn!(?path, error = %e, "skipping unparseable workflow file"),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use turnflow_types::workflow::{EdgeDef, NodeConfig};

    fn sample() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("wf-doc", "refiner")
            .with_node(NodeConfig::agent("refiner", "refiner"))
            .with_node(NodeConfig::agent("synthesis", "synthesis"))
            .with_edge(EdgeDef::sequential("refiner", "synthesis").with_metadata("label", json!("next")))
            .with_terminal("synthesis");
        def.tags = vec!["demo".to_string()];
        def
    }

    #[test]
    fn test_export_import_json_identical() {
        let text = export_document(&sample(), DocumentEncoding::Json).unwrap();
        assert!(text.contains("\"format\": \"turnflow.workflow\""));
        assert_eq!(import_document(&text, DocumentEncoding::Json).unwrap(), sample());
    }

    #[test]
    fn test_export_import_yaml_identical() {
        let text = export_document(&sample(), DocumentEncoding::Yaml).unwrap();
        assert!(text.contains("format: turnflow.workflow"));
        assert_eq!(import_document(&text, DocumentEncoding::Yaml).unwrap(), sample());
    }

    #[test]
    fn test_import_bare_definition() {
        let yaml = r#"
workflow_id: bare
entry_point: a
nodes:
  - node_id: a
    node_type: refiner
    category: base
"#;
        let def = import_document(yaml, DocumentEncoding::Yaml).unwrap();
        assert_eq!(def.workflow_id, "bare");
        assert_eq!(def.nodes.len(), 1);
    }

    #[test]
    fn test_import_rejects_foreign_format() {
        let err = import_document(r#"{"format": "other", "definition": {}}"#, DocumentEncoding::Json).unwrap_err();
        assert!(matches!(err, WorkflowDocumentError::UnsupportedFormat(f) if f == "other"));
    }

    #[test]
    fn test_import_rejects_future_version() {
        let mut doc = serde_json::to_value(WorkflowDocument::new(sample())).unwrap();
        doc["format_version"] = json!(99);
        let err = import_document(&doc.to_string(), DocumentEncoding::Json).unwrap_err();
        assert!(matches!(err, WorkflowDocumentError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn test_encoding_from_path() {
        assert_eq!(DocumentEncoding::from_path(Path::new("a.YML")).unwrap(), DocumentEncoding::Yaml);
        assert_eq!(DocumentEncoding::from_path(Path::new("a.json")).unwrap(), DocumentEncoding::Json);
        assert!(DocumentEncoding::from_path(Path::new("a.txt")).is_err());
    }

    #[test]
    fn test_save_and_load_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows/test.yaml");
        save_workflow_file(&path, &sample()).unwrap();
        assert_eq!(load_workflow_file(&path).unwrap(), sample());
    }

    #[test]
    fn test_discover_workflows_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        save_workflow_file(&dir.path().join("one.yaml"), &sample()).unwrap();
        save_workflow_file(&dir.path().join("sub/two.json"), &sample()).unwrap();
        std::fs::write(dir.path().join("not-a-workflow.yaml"), "key: value").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let found = discover_workflows(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_discover_nonexistent_dir() {
        assert!(discover_workflows(Path::new("/nonexistent/path")).unwrap().is_empty());
    }
}
