//! Role dispatch.
//!
//! The configured role tag is an opaque string ("MASTER", "SLAVE", ...)
//! bound to a closure name via `ClosureRegistry::bind_role`. A node with
//! a runnable role spawns that body at startup; a node with no role, or
//! a role nothing is bound to, idles and serves inbound requests - the
//! usual "worker awaits instructions" arrangement.

use crate::node::NodeShared;
use skein_core::{Closure, Pid};
use std::sync::Arc;

/// Spawns the body bound to the configured role, if there is one.
pub(crate) fn dispatch(shared: &Arc<NodeShared>) -> Option<Pid> {
    let role = shared.config.role.trim();
    if role.is_empty() {
        return None;
    }
    let Some(name) = shared.closures.role_target(role) else {
        tracing::info!(role, "role has no bound closure; idling");
        return None;
    };
    let closure = Closure::nullary(name);
    match shared.closures.instantiate(&closure) {
        Ok(body) => Some(shared.spawn_body(body)),
        Err(fault) => {
            tracing::warn!(role, ?fault, "role closure failed to materialize; idling");
            None
        }
    }
}
