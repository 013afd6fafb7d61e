//! Turn orchestration and workflow execution for turnflow.
//!
//! This crate defines the ports (agent, collaborator and conversation store
//! traits) that the infrastructure layer implements, plus the engine that
//! drives them: the turn pipeline, the workflow compiler and executor,
//! checkpoints, and the pending-action wizard protocol. It depends only on
//! `turnflow-types`, never on `turnflow-infra` or any database crate.

pub mod agent;
pub mod event;
pub mod pipeline;
pub mod wizard;
pub mod workflow;
