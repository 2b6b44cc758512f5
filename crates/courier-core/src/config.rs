//! Configuration loading
//!
//! Router and policy sections are tagged JSON objects — `{"Router":
//! "default", …}` and `{"Policy": "poll", …}` — dispatched through an
//! explicit [`Registry`] of constructors. Embedders extend the registry
//! with their own kinds; there is no process-global table.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CourierError, Result};
use crate::node::Node;
use crate::policy::{Policy, PollPolicy};
use crate::router::{DefaultRouter, Router, RouterFlags};
use crate::transport::Transport;

// ----------------------------------------------------------------------------
// Typed Sections
// ----------------------------------------------------------------------------

/// The `{"Policy":"poll", …}` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Sleep between rounds, in milliseconds.
    #[serde(rename = "Interval")]
    pub interval: u64,
    /// Start cursors at 0 (pull history) instead of −1.
    #[serde(rename = "SyncBacklog", default)]
    pub sync_backlog: bool,
    /// Peer group this policy polls; empty is the default group.
    #[serde(rename = "Group", default)]
    pub group: String,
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

type RouterCtor = fn(&Value) -> Result<Arc<dyn Router>>;
type PolicyCtor = fn(&Value, Arc<dyn Transport>, &Arc<Node>) -> Result<Arc<dyn Policy>>;

/// Maps config tags to constructors for routers and policies.
pub struct Registry {
    routers: HashMap<String, RouterCtor>,
    policies: HashMap<String, PolicyCtor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            routers: HashMap::new(),
            policies: HashMap::new(),
        }
    }

    /// A registry with the built-in kinds: router `"default"`, policy
    /// `"poll"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_router("default", default_router_ctor);
        registry.register_policy("poll", poll_policy_ctor);
        registry
    }

    pub fn register_router(&mut self, tag: &str, ctor: RouterCtor) {
        self.routers.insert(tag.to_string(), ctor);
    }

    pub fn register_policy(&mut self, tag: &str, ctor: PolicyCtor) {
        self.policies.insert(tag.to_string(), ctor);
    }

    /// Build a router from its tagged config object.
    pub fn router(&self, value: &Value) -> Result<Arc<dyn Router>> {
        let tag = section_tag(value, "Router")?;
        let ctor = self
            .routers
            .get(tag)
            .ok_or_else(|| CourierError::config(format!("unknown router kind {tag:?}")))?;
        ctor(value)
    }

    /// Build a policy from its tagged config object, binding it to a
    /// transport and node.
    pub fn policy(
        &self,
        value: &Value,
        transport: Arc<dyn Transport>,
        node: &Arc<Node>,
    ) -> Result<Arc<dyn Policy>> {
        let tag = section_tag(value, "Policy")?;
        let ctor = self
            .policies
            .get(tag)
            .ok_or_else(|| CourierError::config(format!("unknown policy kind {tag:?}")))?;
        ctor(value, transport, node)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn section_tag<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CourierError::config(format!("section is missing its {key:?} tag")))
}

fn default_router_ctor(value: &Value) -> Result<Arc<dyn Router>> {
    let flags: RouterFlags = serde_json::from_value(value.clone())?;
    Ok(Arc::new(DefaultRouter::with_flags(flags)))
}

fn poll_policy_ctor(
    value: &Value,
    transport: Arc<dyn Transport>,
    node: &Arc<Node>,
) -> Result<Arc<dyn Policy>> {
    let config: PollConfig = serde_json::from_value(value.clone())?;
    Ok(PollPolicy::new(
        transport,
        node,
        config.interval,
        config.sync_backlog,
        config.group,
    ))
}

// ----------------------------------------------------------------------------
// Serialization of the Built-in Router
// ----------------------------------------------------------------------------

/// Render a [`DefaultRouter`]'s live configuration, patches included, as
/// its tagged config object.
pub fn default_router_to_value(router: &DefaultRouter) -> Result<Value> {
    let mut flags = router.flags().clone();
    flags.patches = router.patches();
    let mut value = serde_json::to_value(&flags)?;
    value
        .as_object_mut()
        .expect("router flags serialize to an object")
        .insert("Router".to_string(), Value::String("default".to_string()));
    Ok(value)
}
