//! Workflow storage backed by the filesystem.

pub mod library;

pub use library::{WORKFLOW_SELECTOR_KEY, WorkflowLibrary, workflows_dir};
