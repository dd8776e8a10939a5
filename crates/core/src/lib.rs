//! Domain model for the apiflow workflow engine.
//!
//! Connectors, Nodes, Workflows and Jobs as plain, serializable data — no
//! execution logic lives here. See `apiflow-node` and `apiflow-workflow`
//! for the executors that operate on these types.

mod connector;
mod id;
mod job;
mod node;
mod workflow;

pub use connector::{Connector, HttpMethod};
pub use id::{ConnectorId, JobId, NodeId, UuidParseError, WorkflowId};
pub use job::{InvalidTransition, Job, JobStatus, can_transition, validate_transition};
pub use node::{InputDef, InputType, Node, OutputDef};
pub use workflow::{
    ConditionalBranch, ExponentialBackoff, FanOutBranch, Module, ModuleTree, ModuleValue,
    RetryPolicy, Transform, Workflow,
};
