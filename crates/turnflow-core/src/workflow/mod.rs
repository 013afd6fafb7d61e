//! Workflow engine core: definition documents, compilation, and execution.
//!
//! - `definition` -- workflow document import/export, filesystem load/save
//! - `source` -- builds the definition a turn runs from its graph pattern
//! - `compiler` -- validation and node construction
//! - `dag` -- cycle detection, topological waves, reachability
//! - `nodes` -- agent, decision, aggregator, validator and terminator nodes
//! - `expression` -- JEXL evaluator for conditional edges
//! - `executor` -- wave-based parallel graph runner
//! - `checkpoint` -- per-thread checkpoints with rollback
//! - `codec` -- tagged encoding used for checkpoint payloads

pub mod checkpoint;
pub mod codec;
pub mod compiler;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod nodes;
pub mod source;

pub use checkpoint::{CheckpointError, CheckpointManager, Rollback};
pub use compiler::{CompileError, CompiledGraph, CompositionError, ValidationError, WorkflowCompiler};
pub use executor::{NodeTiming, RunOptions, WorkflowResult, WorkflowRunner};
pub use source::{PatternWorkflowSource, SourceError, WorkflowSource};
