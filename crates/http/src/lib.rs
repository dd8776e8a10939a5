//! HTTP Dispatcher (spec C3): sends the request a Node Executor built and
//! classifies the outcome into the engine's unified error taxonomy.
//!
//! A response with status `< 400` is returned as its parsed JSON body (or
//! `{}` for an empty body). A body that is present but fails to parse as
//! JSON, regardless of status, becomes [`EngineError::Http`] carrying the
//! status and a truncated raw-text prefix; a request that never produced a
//! response (DNS failure, connection refused, the 300s timeout) is
//! [`EngineError::Transport`].

use std::collections::BTreeMap;
use std::time::Duration;

use apiflow_core::HttpMethod;
use apiflow_error::EngineError;
use reqwest::Client as ReqwestClient;
use serde_json::Value;

/// Every dispatch honours this timeout regardless of caller configuration —
/// there is no per-request override (spec §4.3).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Truncate an unparseable response body to this many bytes before carrying
/// it in [`EngineError::Http`].
const MAX_RAW_BODY_BYTES: usize = 1024;

/// Sends a request over HTTP. Pure wrapper around a shared `reqwest::Client`
/// — cheap to construct, holds only a connection pool handle.
#[derive(Clone)]
pub struct Dispatcher {
    client: ReqwestClient,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Builds a dispatcher with the default engine-wide timeout
    /// ([`REQUEST_TIMEOUT`]). Most callers should use [`Dispatcher::with_timeout`]
    /// with the configured `node_http_timeout_seconds` instead.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Builds a dispatcher honouring the given per-request timeout — the
    /// caller threads this down from `EngineConfig::node_http_timeout_seconds`
    /// rather than this crate reading it from anywhere global.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client with static configuration always builds");
        Self { client }
    }

    /// Sends `method url` with `headers` and (for methods that can carry
    /// one) `body`, returning the parsed JSON response body on success.
    #[tracing::instrument(skip(self, headers, body), fields(method = %method, url))]
    pub async fn dispatch(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &BTreeMap<String, Value>,
        body: Option<&Value>,
    ) -> Result<Value, EngineError> {
        let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .expect("apiflow_core::HttpMethod variants are all valid HTTP methods");

        let mut request = self.client.request(reqwest_method, url);
        for (key, value) in headers {
            let value_str = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            request = request.header(key, value_str);
        }
        if method.can_have_body() {
            if let Some(body) = body {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(|err| {
            tracing::warn!(error = %err, "http transport failure");
            EngineError::Transport(err.to_string())
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| {
            EngineError::Transport(format!("failed to read response body: {err}"))
        })?;

        tracing::debug!(status = status.as_u16(), bytes = bytes.len(), "http dispatch completed");

        if status.as_u16() >= 400 {
            let body = parse_or_truncate(&bytes);
            return Err(EngineError::Http {
                status: status.as_u16(),
                body,
            });
        }

        if bytes.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(&bytes).map_err(|_| EngineError::Http {
            status: status.as_u16(),
            body: parse_or_truncate(&bytes),
        })
    }
}

fn parse_or_truncate(bytes: &[u8]) -> Value {
    if let Ok(json) = serde_json::from_slice::<Value>(bytes) {
        return json;
    }
    let truncated = &bytes[..bytes.len().min(MAX_RAW_BODY_BYTES)];
    Value::String(String::from_utf8_lossy(truncated).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_get_returns_parsed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .dispatch(
                HttpMethod::Get,
                &format!("{}/users/1", server.uri()),
                &BTreeMap::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"id": 1}));
    }

    #[tokio::test]
    async fn status_4xx_becomes_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .dispatch(
                HttpMethod::Get,
                &format!("{}/missing", server.uri()),
                &BTreeMap::new(),
                None,
            )
            .await
            .unwrap_err();

        match err {
            EngineError::Http { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, json!({"error": "not found"}));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"created": true})))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let body = json!({"name": "widget"});
        let result = dispatcher
            .dispatch(
                HttpMethod::Post,
                &format!("{}/items", server.uri()),
                &BTreeMap::new(),
                Some(&body),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"created": true}));
    }

    #[tokio::test]
    async fn empty_body_becomes_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .dispatch(
                HttpMethod::Get,
                &format!("{}/empty", server.uri()),
                &BTreeMap::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn unparseable_success_body_becomes_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "text/plain"))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .dispatch(
                HttpMethod::Get,
                &format!("{}/garbled", server.uri()),
                &BTreeMap::new(),
                None,
            )
            .await
            .unwrap_err();

        match err {
            EngineError::Http { status, body } => {
                assert_eq!(status, 200);
                assert_eq!(body, json!("not json"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_on_unreachable_host() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .dispatch(
                HttpMethod::Get,
                "http://127.0.0.1:1",
                &BTreeMap::new(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Transport(_)));
    }
}
