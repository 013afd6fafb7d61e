//! Pending-action protocol: multi-turn wizard flows.

pub mod flow;
pub mod normalizer;

pub use flow::{
    Acceptance, CancelReason, TransitionStatus, WizardFlow, WizardRegistry, WizardStep, WizardTransition,
    channel_key, is_cancel,
};
pub use normalizer::PendingActionNormalizer;
