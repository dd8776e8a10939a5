//! Connector: a reusable HTTP endpoint description.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ConnectorId;

/// HTTP methods a [`Connector`] may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// `POST`/`PUT`/`PATCH` are the only methods that ever carry a body.
    #[must_use]
    pub fn can_have_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reusable HTTP endpoint description.
///
/// `header` and `body` may contain template variables resolved against a
/// Node's prepared input by the Template Engine before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub base_url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub header: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
}
