//! Per-turn orchestration.
//!
//! The pipeline sits between an incoming user turn and the workflow
//! executor. Collaborators (normalizer, classifier, planner, conversation
//! store) are ports implemented outside this module; see
//! [`collaborator`] and [`store`].

pub mod collaborator;
pub mod route;
pub mod snapshot;
pub mod store;
pub mod turn;

pub use collaborator::{
    Classification, Classifier, ConfigPlanner, NormalizerOutcome, PassthroughClassifier, PassthroughNormalizer,
    Planner, TurnNormalizer,
};
pub use store::{ConversationStateStore, InMemoryConversationStore};
pub use turn::{PipelineError, TurnPipeline};
