//! Closure registry: names that can be spawned remotely.
//!
//! A [`ClosureRegistry`] maps agreed string names to argument decoders
//! and body constructors. It is populated before the node starts and
//! frozen from then on - `Node::start` takes it by value. A spawn request
//! naming an unregistered closure, or carrying arguments its decoder
//! rejects, produces an error reply without spawning anything.

use crate::context::Context;
use crate::proto::SpawnFault;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use skein_core::{Closure, DecodeError, Envelope, Pid, Wire};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Name of the built-in echo closure registered on every node.
pub const ECHO_CLOSURE: &str = "skein.echo";

/// A materialized process body, ready to spawn.
pub(crate) type ProcessBody = Box<dyn FnOnce(Context) -> BoxFuture<'static, ()> + Send>;

struct ClosureEntry {
    arg_tag: &'static str,
    construct: Box<dyn Fn(&Envelope) -> Result<ProcessBody, DecodeError> + Send + Sync>,
}

/// The node-wide table of spawnable names, plus role bindings.
#[derive(Default)]
pub struct ClosureRegistry {
    bodies: HashMap<String, ClosureEntry>,
    roles: HashMap<String, String>,
}

impl ClosureRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `body` under `name`.
    ///
    /// The body receives the decoded argument and an explicit process
    /// context. Registering the same name again replaces the earlier
    /// entry; registration is only possible before the node starts.
    pub fn register<A, F, Fut>(&mut self, name: &str, body: F)
    where
        A: Wire,
        F: Fn(A, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let body = Arc::new(body);
        self.bodies.insert(
            name.to_string(),
            ClosureEntry {
                arg_tag: A::type_tag(),
                construct: Box::new(move |args| {
                    let decoded: A = args.open()?;
                    let body = body.clone();
                    Ok(Box::new(move |ctx: Context| {
                        Box::pin((*body)(decoded, ctx)) as BoxFuture<'static, ()>
                    }) as ProcessBody)
                }),
            },
        );
    }

    /// Binds a role tag to a registered closure name.
    ///
    /// The role body is spawned with no arguments, so the bound closure
    /// must take `()`.
    pub fn bind_role(&mut self, role: &str, closure_name: &str) {
        self.roles
            .insert(role.to_string(), closure_name.to_string());
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// Registered names, unordered.
    pub fn names(&self) -> Vec<&str> {
        self.bodies.keys().map(|k| k.as_str()).collect()
    }

    /// The argument tag a registered name expects.
    pub fn arg_tag(&self, name: &str) -> Option<&'static str> {
        self.bodies.get(name).map(|e| e.arg_tag)
    }

    /// The closure name bound to a role tag, if any.
    pub(crate) fn role_target(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|s| s.as_str())
    }

    /// Builds the process body for a closure reference.
    pub(crate) fn instantiate(&self, closure: &Closure) -> Result<ProcessBody, SpawnFault> {
        let entry = self
            .bodies
            .get(closure.name())
            .ok_or_else(|| SpawnFault::UnknownClosure(closure.name().to_string()))?;
        (entry.construct)(closure.args())
            .map_err(|err| SpawnFault::BadArgument(err.to_string()))
    }

    /// Registers the bodies every node carries, leaving user entries
    /// untouched.
    pub(crate) fn install_builtins(&mut self) {
        if !self.contains(ECHO_CLOSURE) {
            self.register(ECHO_CLOSURE, echo_body);
        }
    }
}

impl std::fmt::Debug for ClosureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureRegistry")
            .field("closures", &self.bodies.len())
            .field("roles", &self.roles.len())
            .finish()
    }
}

/// Request understood by the built-in [`ECHO_CLOSURE`] body: the sealed
/// payload is sent back, unopened, to `reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoRequest {
    /// Where to send the payload back.
    pub reply_to: Pid,
    /// The payload to bounce.
    pub env: Envelope,
}

async fn echo_body(_: (), ctx: Context) {
    while let Ok(req) = ctx.receive::<EchoRequest>().await {
        ctx.send_raw(&req.reply_to, req.env).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_faults() {
        let registry = ClosureRegistry::new();
        let fault = registry
            .instantiate(&Closure::nullary("missing"))
            .err()
            .unwrap();
        assert!(matches!(fault, SpawnFault::UnknownClosure(ref n) if n == "missing"));
    }

    #[test]
    fn bad_argument_faults_before_spawning() {
        let mut registry = ClosureRegistry::new();
        registry.register("takes.pair", |_: (u32, u32), _ctx| async {});

        // Hand it a closure sealed over a different argument type.
        let closure = Closure::new("takes.pair", &"wrong".to_string()).unwrap();
        let fault = registry.instantiate(&closure).err().unwrap();
        assert!(matches!(fault, SpawnFault::BadArgument(_)));
    }

    #[test]
    fn roles_resolve_to_names() {
        let mut registry = ClosureRegistry::new();
        registry.register("app.master", |_: (), _ctx| async {});
        registry.bind_role("MASTER", "app.master");

        assert_eq!(registry.role_target("MASTER"), Some("app.master"));
        assert_eq!(registry.role_target("SLAVE"), None);
    }

    #[test]
    fn builtins_do_not_clobber_user_entries() {
        let mut registry = ClosureRegistry::new();
        registry.register(ECHO_CLOSURE, |_: (), _ctx| async {});
        let before = registry.arg_tag(ECHO_CLOSURE);
        registry.install_builtins();
        assert_eq!(registry.arg_tag(ECHO_CLOSURE), before);
        assert!(registry.contains(ECHO_CLOSURE));
    }

    #[test]
    fn arg_tags_are_recorded() {
        let mut registry = ClosureRegistry::new();
        registry.register("takes.u64", |_: u64, _ctx| async {});
        assert_eq!(registry.arg_tag("takes.u64"), Some(u64::type_tag()));
    }
}
