//! Wizard flows available to `tflow turn`.

use turnflow_core::wizard::{Acceptance, WizardFlow, WizardRegistry, WizardStep};

pub const CONFIRM_TABLE_FLOW: &str = "confirm_table";

/// A two-step confirmation: pick a table name, then confirm it.
pub fn demo_wizards() -> WizardRegistry {
    let name_step = Acceptance::pattern(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap_or(Acceptance::AnyText);
    WizardRegistry::new().with_flow(
        WizardFlow::new(CONFIRM_TABLE_FLOW)
            .step(WizardStep::new("name", "What should the table be called?", name_step).then("confirm"))
            .step(WizardStep::new(
                "confirm",
                "Create it? (yes/no)",
                Acceptance::exact(["yes", "no"]),
            ))
            .completion_message("Got it. The table request is recorded."),
    )
}
