//! Node: a typed wrapper around a [`Connector`](crate::connector::Connector).

use std::collections::HashSet;

use apiflow_error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{ConnectorId, NodeId};

/// The declared type of a [`InputDef`], used to drive coercion of
/// string-typed provided input (see the Node Executor's input-preparation
/// step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Integer,
    Number,
    Boolean,
    Any,
}

/// Declares one named input a [`Node`] accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDef {
    pub name: String,
    #[serde(default = "default_input_type")]
    pub r#type: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_input_type() -> InputType {
    InputType::String
}

/// Declares one named output a [`Node`] extracts from its response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDef {
    pub name: String,
    /// Dot-path into the parsed response body. Defaults to `name` when absent.
    #[serde(default)]
    pub mapping: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
}

impl OutputDef {
    /// The dot-path to walk, falling back to `name` per §4.4 step 6.
    #[must_use]
    pub fn mapping_or_name(&self) -> &str {
        self.mapping.as_deref().unwrap_or(&self.name)
    }
}

/// A typed wrapper around exactly one [`Connector`](crate::connector::Connector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub connector_id: ConnectorId,
    /// Suffix appended to the connector's `base_url` with exactly one `/`
    /// separator. May be empty.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub input: Vec<InputDef>,
    #[serde(default)]
    pub output: Vec<OutputDef>,
    /// Overrides the connector's `body` for this node when present.
    #[serde(default)]
    pub body_template: Option<Value>,
}

impl Node {
    /// Input names must be unique within a Node, and so must output names —
    /// a duplicate silently loses an entry when prepared input or extracted
    /// output is assembled into a map.
    pub fn validate(&self) -> Result<(), EngineError> {
        check_unique("input", self.input.iter().map(|i| i.name.as_str()))?;
        check_unique("output", self.output.iter().map(|o| o.name.as_str()))
    }
}

fn check_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(EngineError::Validation(format!(
                "duplicate {kind} name {name:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(input: Vec<InputDef>, output: Vec<OutputDef>) -> Node {
        Node {
            id: NodeId::v4(),
            connector_id: ConnectorId::v4(),
            path: String::new(),
            input,
            output,
            body_template: None,
        }
    }

    fn input_def(name: &str) -> InputDef {
        InputDef { name: name.into(), r#type: InputType::String, required: false, default: None }
    }

    fn output_def(name: &str) -> OutputDef {
        OutputDef { name: name.into(), mapping: None, default: None }
    }

    #[test]
    fn unique_names_are_valid() {
        let n = node(vec![input_def("a"), input_def("b")], vec![output_def("x"), output_def("y")]);
        assert!(n.validate().is_ok());
    }

    #[test]
    fn duplicate_input_names_are_rejected() {
        let n = node(vec![input_def("a"), input_def("a")], vec![]);
        assert!(matches!(n.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn duplicate_output_names_are_rejected() {
        let n = node(vec![], vec![output_def("x"), output_def("x")]);
        assert!(matches!(n.validate(), Err(EngineError::Validation(_))));
    }
}
