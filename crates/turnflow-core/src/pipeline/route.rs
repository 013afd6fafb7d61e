//! Plan application and route fix-up.
//!
//! `route` in the execution state is always a contract pattern name. Agents
//! and planners may write other values there; after the run such values are
//! moved to `next_node` and the route is forced back to the contract route.

use serde_json::Value;
use turnflow_types::plan::{ExecutionConfig, ExecutionPlan, GraphPattern};
use turnflow_types::state::{ExecutionState, keys};

/// Apply a plan to the turn config and state.
///
/// `route_locked` is only ever raised here, never cleared.
pub fn apply_plan(config: &mut ExecutionConfig, state: &mut ExecutionState, plan: &ExecutionPlan) {
    config.graph_pattern = Some(plan.pattern);
    if let Some(variant) = plan.compile_variant {
        config.compile_variant = variant;
    }
    if let Some(entry) = plan.entry_point.as_deref().filter(|e| !e.is_empty()) {
        config.entry_point = Some(entry.to_string());
    }
    if !plan.agents.is_empty() {
        config.agents = plan.agents.clone();
    }

    let route = plan
        .route
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(plan.pattern.as_str())
        .to_string();
    config.route = route.clone();
    state.set_route(route);
    if plan.route_locked {
        state.insert(keys::ROUTE_LOCKED, Value::Bool(true));
    }
}

/// The contract route for this turn: the route the state carried before the
/// plan was applied when that is a contract pattern, else the config's graph
/// pattern, else `standard`.
pub fn contract_route(pre_plan_route: Option<&str>, config: &ExecutionConfig) -> GraphPattern {
    pre_plan_route
        .and_then(GraphPattern::parse_contract)
        .or(config.graph_pattern)
        .unwrap_or_default()
}

/// Force `state.route` to `contract`. A differing route, whether a node id
/// or another pattern name, is kept as `next_node`.
pub fn fix_up_route(state: &mut ExecutionState, contract: GraphPattern) {
    let contract = contract.as_str();
    if let Some(route) = state.route().map(str::to_string) {
        if route != contract && !route.trim().is_empty() {
            tracing::debug!(%route, contract, "route moved to next_node");
            state.set_str(keys::NEXT_NODE, route);
        }
    }
    state.set_route(contract);
}
