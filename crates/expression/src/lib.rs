//! Template substitution and restricted expression evaluation over JSON.
//!
//! Two independent pieces, both pure functions of `(input, context)`:
//!
//! - [`render`]/[`render_deep`]: the Template Engine (spec C1), `$IDENT.path`
//!   / `${IDENT.path}` substitution with type preservation on whole-string
//!   matches.
//! - [`evaluate`]/[`evaluate_bool`]: the Expression Evaluator (spec C2), a
//!   restricted grammar over `flow_input` and `results`.
//!
//! Both take the same context shape: a JSON object with `flow_input` and
//! `results` keys. [`context`] builds one.

mod eval;
mod template;
mod value_utils;

pub use eval::{evaluate, evaluate_bool, EvalError};
pub use template::{render, render_deep};
pub use value_utils::{is_truthy, to_boolean, to_float, to_integer};

use serde_json::Value;

/// Builds the `{flow_input, results}` context shared by the template engine
/// and the expression evaluator.
#[must_use]
pub fn context(flow_input: &Value, results: &Value) -> Value {
    serde_json::json!({
        "flow_input": flow_input,
        "results": results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_shape() {
        let ctx = context(&json!({"a": 1}), &json!({"b": 2}));
        assert_eq!(ctx, json!({"flow_input": {"a": 1}, "results": {"b": 2}}));
    }
}
