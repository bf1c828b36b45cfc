//! Core types for the admission engine

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// The kind of mutation being checked.
///
/// Tags compare case-insensitively: `"CREATE"` and `"create"` are the same
/// operation. Unknown tags are kept (lowercased) in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Other(String),
}

impl Operation {
    /// The canonical lowercase tag
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for Operation {
    fn from(tag: &str) -> Self {
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Other(tag),
        }
    }
}

impl From<String> for Operation {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl From<Operation> for String {
    fn from(operation: Operation) -> Self {
        operation.as_str().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate mutation, as sent to webhook servers.
///
/// `object`, `old_object` and `options` are opaque to the engine; they are
/// forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub operation: Operation,

    #[serde(default)]
    pub resource: String,

    /// Identifier of the instance; empty on create
    #[serde(rename = "name", default)]
    pub resource_name: String,

    #[serde(default)]
    pub sub_resource: String,

    #[serde(default)]
    pub version: String,

    /// Proposed state
    #[serde(default)]
    pub object: Value,

    /// Previous state, `null` on create
    #[serde(default)]
    pub old_object: Value,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, Value>,
}

impl Request {
    /// Create a request for `operation` on the `resource` collection
    pub fn new(operation: impl Into<Operation>, resource: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            resource: resource.into(),
            resource_name: String::new(),
            sub_resource: String::new(),
            version: String::new(),
            object: Value::Null,
            old_object: Value::Null,
            options: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = name.into();
        self
    }

    pub fn with_sub_resource(mut self, sub_resource: impl Into<String>) -> Self {
        self.sub_resource = sub_resource.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_object(mut self, object: Value) -> Self {
        self.object = object;
        self
    }

    pub fn with_old_object(mut self, old_object: Value) -> Self {
        self.old_object = old_object;
        self
    }

    /// Add a side-channel option
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Set the proposed state from any serializable domain value
    pub fn with_serialized_object<T: Serialize>(mut self, object: &T) -> serde_json::Result<Self> {
        self.object = serde_json::to_value(object)?;
        Ok(self)
    }

    /// Set the previous state from any serializable domain value
    pub fn with_serialized_old_object<T: Serialize>(
        mut self,
        old_object: &T,
    ) -> serde_json::Result<Self> {
        self.old_object = serde_json::to_value(old_object)?;
        Ok(self)
    }

    /// The resource identity rules match against: `resource`, or
    /// `resource/subResource` when a sub-resource is set.
    pub fn resource_path(&self) -> Cow<'_, str> {
        if self.sub_resource.is_empty() {
            Cow::Borrowed(&self.resource)
        } else {
            Cow::Owned(format!("{}/{}", self.resource, self.sub_resource))
        }
    }
}

/// A webhook's verdict.
///
/// `allowed` is `None` when the webhook omitted the field or sent `null`;
/// such a response carries no verdict at all and is treated as malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub allowed: Option<bool>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
}

impl Response {
    /// An allowing verdict
    pub fn allow() -> Self {
        Self {
            allowed: Some(true),
            result: String::new(),
        }
    }

    /// A denying verdict with a human-readable reason
    pub fn deny(result: impl Into<String>) -> Self {
        Self {
            allowed: Some(false),
            result: result.into(),
        }
    }

    /// Whether the response carries an explicit verdict
    pub fn is_well_formed(&self) -> bool {
        self.allowed.is_some()
    }
}
