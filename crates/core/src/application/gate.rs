// Permission Gate (§4.3) — per-method allow/deny rule evaluation against
// caller identity. Purely functional: it reads no state once installed, so
// it is evaluated without locking (an `Arc<PermissionGate>` is shared freely
// across RPC handler tasks).
//
// Shaped after the rule-list/tagged-enum style used throughout `core::port`
// (trait objects behind `Arc<dyn Fn...>`), per DESIGN NOTES §9 "per-method
// allow/deny rule lists (originally functions or identity arrays)".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A permission tag: one of the four roles, or a method name used as its own
/// tag (§4.3: "a set of permission tags drawn from {admin, manager, creator,
/// worker} plus its own method name").
pub type Tag = String;

pub mod tag {
    pub const ADMIN: &str = "admin";
    pub const MANAGER: &str = "manager";
    pub const CREATOR: &str = "creator";
    pub const WORKER: &str = "worker";
}

/// Caller id used for calls originating from the server itself. These
/// bypass the gate entirely (§4.3: "Server-originated calls bypass the gate
/// entirely").
pub const SERVER_CALLER: &str = "__server__";

type Predicate = Arc<dyn Fn(&str, &str, &serde_json::Value) -> bool + Send + Sync>;

/// A single allow/deny rule: either a fixed set of caller identities, or an
/// arbitrary predicate over `(callerId, methodName, params)`.
#[derive(Clone)]
pub enum Rule {
    Identity(HashSet<String>),
    Predicate(Predicate),
}

impl Rule {
    pub fn identities<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rule::Identity(ids.into_iter().map(Into::into).collect())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str, &str, &serde_json::Value) -> bool + Send + Sync + 'static,
    {
        Rule::Predicate(Arc::new(f))
    }

    fn matches(&self, caller_id: &str, method: &str, params: &serde_json::Value) -> bool {
        match self {
            Rule::Identity(ids) => ids.contains(caller_id),
            Rule::Predicate(f) => f(caller_id, method, params),
        }
    }
}

/// A call is authorised iff no deny rule matches, and at least one allow
/// rule matches, for any of the method's tags (§4.3).
#[derive(Default, Clone)]
pub struct PermissionGate {
    allow: HashMap<Tag, Vec<Rule>>,
    deny: HashMap<Tag, Vec<Rule>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, tag: impl Into<String>, rule: Rule) -> &mut Self {
        self.allow.entry(tag.into()).or_default().push(rule);
        self
    }

    pub fn deny(&mut self, tag: impl Into<String>, rule: Rule) -> &mut Self {
        self.deny.entry(tag.into()).or_default().push(rule);
        self
    }

    /// Evaluate the gate for a call tagged with `tags` (the method's role
    /// tags plus its own name). Server-originated calls always pass.
    pub fn is_authorised(
        &self,
        caller_id: &str,
        method: &str,
        params: &serde_json::Value,
        tags: &[&str],
    ) -> bool {
        if caller_id == SERVER_CALLER {
            return true;
        }

        for tag in tags {
            if let Some(rules) = self.deny.get(*tag) {
                if rules.iter().any(|r| r.matches(caller_id, method, params)) {
                    return false;
                }
            }
        }

        for tag in tags {
            if let Some(rules) = self.allow.get(*tag) {
                if rules.iter().any(|r| r.matches(caller_id, method, params)) {
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_params() -> serde_json::Value {
        serde_json::json!({})
    }

    #[test]
    fn denies_by_default() {
        let gate = PermissionGate::new();
        assert!(!gate.is_authorised("alice", "jobSave", &no_params(), &[tag::ADMIN, "jobSave"]));
    }

    #[test]
    fn allow_by_identity() {
        let mut gate = PermissionGate::new();
        gate.allow(tag::CREATOR, Rule::identities(["alice"]));
        assert!(gate.is_authorised("alice", "jobSave", &no_params(), &[tag::ADMIN, tag::CREATOR, "jobSave"]));
        assert!(!gate.is_authorised("bob", "jobSave", &no_params(), &[tag::ADMIN, tag::CREATOR, "jobSave"]));
    }

    #[test]
    fn deny_beats_allow() {
        let mut gate = PermissionGate::new();
        gate.allow(tag::CREATOR, Rule::identities(["alice"]));
        gate.deny("jobSave", Rule::identities(["alice"]));
        assert!(!gate.is_authorised("alice", "jobSave", &no_params(), &[tag::CREATOR, "jobSave"]));
    }

    #[test]
    fn predicate_rule() {
        let mut gate = PermissionGate::new();
        gate.allow(
            tag::WORKER,
            Rule::predicate(|caller, _method, _params| caller.starts_with("worker-")),
        );
        assert!(gate.is_authorised("worker-1", "getWork", &no_params(), &[tag::WORKER]));
        assert!(!gate.is_authorised("alice", "getWork", &no_params(), &[tag::WORKER]));
    }

    #[test]
    fn server_calls_bypass_gate() {
        let gate = PermissionGate::new();
        assert!(gate.is_authorised(SERVER_CALLER, "jobRemove", &no_params(), &[tag::ADMIN]));
    }

    #[test]
    fn matches_any_of_multiple_tags() {
        let mut gate = PermissionGate::new();
        gate.allow("getJob", Rule::identities(["alice"]));
        assert!(gate.is_authorised(
            "alice",
            "getJob",
            &no_params(),
            &[tag::ADMIN, tag::WORKER, "getJob"]
        ));
    }
}
