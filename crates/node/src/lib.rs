//! Node Executor (spec C4): turns a [`Node`] and its caller-provided input
//! into an HTTP request, dispatches it, and extracts the declared outputs
//! from the response.
//!
//! The steps, in order:
//!
//! 1. [`prepare_input`] — merge provided input with declared defaults,
//!    coercing string-typed values to their declared [`InputType`].
//! 2. [`build_request_url`] — join the connector's `base_url` with the
//!    node's `path`.
//! 3. Header and body templates are rendered against the prepared input
//!    itself as context — `$name` resolves `prepared_input["name"]`.
//! 4. The request is dispatched; a status `>= 400` or a transport failure
//!    surfaces as an [`EngineError`] without reaching output extraction.
//! 5. [`extract_output`] walks each declared output's dot-path through the
//!    response body.

use std::collections::BTreeMap;

use apiflow_core::{Connector, HttpMethod, InputDef, InputType, Node, OutputDef};
use apiflow_error::EngineError;
use apiflow_expression::is_truthy;
use apiflow_http::Dispatcher;
use serde_json::Value;

/// Runs the full Node Executor pipeline for one invocation.
pub async fn execute(
    node: &Node,
    connector: &Connector,
    provided_input: &Value,
    dispatcher: &Dispatcher,
) -> Result<Value, EngineError> {
    let prepared = prepare_input(node, provided_input)?;
    let url = build_request_url(&connector.base_url, &node.path);

    let header_template = Value::Object(connector.header.clone().into_iter().collect());
    let rendered_headers = apiflow_expression::render_deep(&header_template, &prepared);
    let headers: BTreeMap<String, Value> = match rendered_headers {
        Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    };

    let method = connector.method;
    let body = if method.can_have_body() {
        let template = node.body_template.as_ref().or(connector.body.as_ref());
        Some(match template {
            Some(t) => apiflow_expression::render_deep(t, &prepared),
            None => prepared.clone(),
        })
    } else {
        None
    };

    tracing::info!(node_id = %node.id, %url, %method, "dispatching node request");
    let response = dispatcher.dispatch(method, &url, &headers, body.as_ref()).await?;
    Ok(extract_output(&node.output, &response))
}

/// Merges `provided` with each declared [`InputDef`] (spec §4.4 step 1).
///
/// A value that is present and not the empty string is coerced (for
/// `boolean`/`integer`/`number`) or used verbatim (`string`/`any`). Coercion
/// is best-effort: an unparseable `integer`/`number` string is left as-is
/// rather than rejected. A value that is absent (or is the empty string)
/// falls back to the default; absent *and* required with no default is the
/// only case that fails.
pub fn prepare_input(node: &Node, provided: &Value) -> Result<Value, EngineError> {
    let source = provided.as_object();
    let mut result = serde_json::Map::new();

    for def in &node.input {
        let present = match source.and_then(|o| o.get(&def.name)) {
            Some(Value::String(s)) if s.is_empty() => None,
            Some(v) => Some(v),
            None => None,
        };

        match present {
            Some(raw) => {
                result.insert(def.name.clone(), coerce(raw, def.r#type));
            }
            None => match &def.default {
                Some(default) => {
                    result.insert(def.name.clone(), default.clone());
                }
                None if def.required => {
                    return Err(EngineError::Validation(format!(
                        "missing required input '{}'",
                        def.name
                    )));
                }
                None => {}
            },
        }
    }

    Ok(Value::Object(result))
}

fn coerce(value: &Value, target: InputType) -> Value {
    match target {
        InputType::Any | InputType::String => value.clone(),
        InputType::Boolean => Value::Bool(coerce_boolean(value)),
        InputType::Integer => coerce_integer(value),
        InputType::Number => coerce_number(value),
    }
}

fn coerce_boolean(value: &Value) -> bool {
    match value {
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        other => is_truthy(other),
    }
}

/// Digit-only strings parse; anything else (including negative numbers) is
/// left untouched.
fn coerce_integer(value: &Value) -> Value {
    match value {
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => s
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

fn coerce_number(value: &Value) -> Value {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

/// Joins `base_url` and `path` with exactly one `/` separator.
///
/// An empty `path` (the node default) leaves `base_url` untouched past
/// trimming its trailing slashes. A `path` of exactly `/` produces
/// `base_url` with a single trailing slash.
#[must_use]
pub fn build_request_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path == "/" {
        return format!("{base}/");
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Walks each declared output's dot-path through `response`. A node with no
/// declared outputs passes the whole response through untouched.
#[must_use]
pub fn extract_output(outputs: &[OutputDef], response: &Value) -> Value {
    if outputs.is_empty() {
        return response.clone();
    }

    let mut obj = serde_json::Map::new();
    for def in outputs {
        let mut current = Some(response);
        for segment in def.mapping_or_name().split('.') {
            current = current.and_then(|v| v.get(segment));
        }
        let value = current
            .cloned()
            .or_else(|| def.default.clone())
            .unwrap_or(Value::Null);
        obj.insert(def.name.clone(), value);
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiflow_core::{ConnectorId, NodeId};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

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

    #[test]
    fn build_request_url_joins_with_one_slash() {
        assert_eq!(build_request_url("https://api.example.com/", "/users"), "https://api.example.com/users");
        assert_eq!(build_request_url("https://api.example.com", "users"), "https://api.example.com/users");
        assert_eq!(build_request_url("https://api.example.com/", ""), "https://api.example.com");
        assert_eq!(build_request_url("https://api.example.com/", "/"), "https://api.example.com/");
    }

    #[test]
    fn prepare_input_applies_defaults_and_coerces_types() {
        let n = node(
            vec![
                InputDef { name: "limit".into(), r#type: InputType::Integer, required: false, default: Some(json!(10)) },
                InputDef { name: "active".into(), r#type: InputType::Boolean, required: false, default: None },
            ],
            vec![],
        );
        let result = prepare_input(&n, &json!({"active": "true"})).unwrap();
        assert_eq!(result, json!({"limit": 10, "active": true}));
    }

    #[test]
    fn prepare_input_errors_on_missing_required_with_no_default() {
        let n = node(
            vec![InputDef { name: "user_id".into(), r#type: InputType::String, required: true, default: None }],
            vec![],
        );
        let err = prepare_input(&n, &json!({})).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn prepare_input_treats_empty_string_as_absent() {
        let n = node(
            vec![InputDef { name: "limit".into(), r#type: InputType::Integer, required: false, default: Some(json!(10)) }],
            vec![],
        );
        let result = prepare_input(&n, &json!({"limit": ""})).unwrap();
        assert_eq!(result, json!({"limit": 10}));
    }

    #[test]
    fn prepare_input_leaves_unparseable_numbers_as_is() {
        let n = node(
            vec![
                InputDef { name: "limit".into(), r#type: InputType::Integer, required: false, default: None },
                InputDef { name: "score".into(), r#type: InputType::Number, required: false, default: None },
            ],
            vec![],
        );
        let result = prepare_input(&n, &json!({"limit": "not-a-number", "score": "also-not"})).unwrap();
        assert_eq!(result, json!({"limit": "not-a-number", "score": "also-not"}));
    }

    #[test]
    fn extract_output_walks_dot_paths_with_default_fallback() {
        let outputs = vec![
            OutputDef { name: "user_id".into(), mapping: Some("data.id".into()), default: None },
            OutputDef { name: "status".into(), mapping: None, default: Some(json!("unknown")) },
        ];
        let response = json!({"data": {"id": 42}});
        assert_eq!(
            extract_output(&outputs, &response),
            json!({"user_id": 42, "status": "unknown"})
        );
    }

    #[test]
    fn extract_output_passes_through_when_no_outputs_declared() {
        let response = json!({"data": {"id": 42}});
        assert_eq!(extract_output(&[], &response), response);
    }

    #[tokio::test]
    async fn execute_dispatches_and_extracts_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "name": "ada"})))
            .mount(&server)
            .await;

        let connector = Connector {
            id: ConnectorId::v4(),
            base_url: server.uri(),
            method: HttpMethod::Get,
            header: BTreeMap::new(),
            body: None,
        };
        let n = Node {
            id: NodeId::v4(),
            connector_id: connector.id,
            path: "/users/42".into(),
            input: vec![],
            output: vec![OutputDef { name: "name".into(), mapping: None, default: None }],
            body_template: None,
        };

        let dispatcher = Dispatcher::new();
        let result = execute(&n, &connector, &json!({}), &dispatcher).await.unwrap();
        assert_eq!(result, json!({"name": "ada"}));
    }

    #[tokio::test]
    async fn execute_renders_headers_against_prepared_input_directly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/widgets"))
            .and(wiremock::matchers::header("x-user-id", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let mut header = BTreeMap::new();
        header.insert("x-user-id".to_string(), json!("$user_id"));

        let connector = Connector {
            id: ConnectorId::v4(),
            base_url: server.uri(),
            method: HttpMethod::Get,
            header,
            body: None,
        };
        let n = Node {
            id: NodeId::v4(),
            connector_id: connector.id,
            path: "/widgets".into(),
            input: vec![InputDef { name: "user_id".into(), r#type: InputType::Integer, required: true, default: None }],
            output: vec![],
            body_template: None,
        };

        let dispatcher = Dispatcher::new();
        let result = execute(&n, &connector, &json!({"user_id": "7"}), &dispatcher).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }
}
