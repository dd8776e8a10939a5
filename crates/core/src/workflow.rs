//! Workflow: a tree of [`Module`]s stored as JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::WorkflowId;

/// A rule for producing a Node input value from the Execution Context.
///
/// Deliberately kept as a raw JSON value rather than a Rust enum: the
/// dispatch on shape (`{"type": "static", ...}` vs. `{"type": "javascript",
/// ...}` vs. an untagged mapping vs. a scalar) is exactly the Workflow
/// Executor's `transform_input` logic (§4.5), not a structural property we
/// can usefully enforce at parse time — a Node-supplied default, say, is a
/// perfectly legal `Transform` with no `type` key at all.
pub type Transform = Value;

/// `{exponential: {attempts, multiplier, seconds}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub exponential: ExponentialBackoff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Total attempts, indexed 0..attempts-1. Must be >= 1.
    pub attempts: u32,
    /// Multiplier `k` in `seconds * k^(i-1)`.
    pub multiplier: f64,
    /// Base delay `s` in seconds.
    pub seconds: f64,
}

/// One branch of a `branchone` module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub expr: String,
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// One branch of a `branchall` module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutBranch {
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// The tagged union of module behaviours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModuleValue {
    /// Executes a Node. `path` is of the form `node/<n>_node_id`.
    Script {
        path: String,
        #[serde(default)]
        input_transforms: BTreeMap<String, Transform>,
    },
    /// Executes the first branch whose `expr` evaluates truthy, else `default`.
    Branchone {
        #[serde(default)]
        branches: Vec<ConditionalBranch>,
        #[serde(default)]
        default: Vec<Module>,
    },
    /// Executes every sub-module of every branch, concurrently or in order.
    Branchall {
        #[serde(default)]
        branches: Vec<FanOutBranch>,
        #[serde(default)]
        parallel: bool,
    },
}

/// One node in the workflow's module tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub value: ModuleValue,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

/// Root shape `{value: {modules: [Module, ...]}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTree {
    pub modules: Vec<Module>,
}

/// A tree of Modules orchestrating Nodes with control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    #[serde(default)]
    pub name: Option<String>,
    pub value: ModuleTree,
    /// The Nodes a `script` module's `node/<n>_node_id` path can reference,
    /// indexed by `n`. A UUID-typed `NodeId` has no natural integer form, so
    /// `n` addresses this list rather than the Node directly.
    #[serde(default)]
    pub node_refs: Vec<crate::id::NodeId>,
}

impl Workflow {
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.value.modules
    }

    /// Resolves a `script` module's `n` (parsed from `node/<n>_node_id`) to
    /// the `NodeId` it addresses in [`Workflow::node_refs`].
    #[must_use]
    pub fn resolve_node_ref(&self, n: usize) -> Option<crate::id::NodeId> {
        self.node_refs.get(n).copied()
    }
}
