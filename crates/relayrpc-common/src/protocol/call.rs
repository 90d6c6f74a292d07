use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type RequestId = String;
pub type Attachments = HashMap<String, Value>;

/// Generates a fresh, globally unique request id.
pub fn generate_request_id() -> RequestId {
    uuid::Uuid::new_v4().to_string()
}

/// A remote method invocation as carried in a REQUEST frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Call {
    pub request_id: RequestId,
    pub interface_name: String,
    pub method_name: String,
    /// Declared parameter type names, used for overload resolution on the server.
    pub param_types: Vec<String>,
    pub params: Vec<Value>,
    #[serde(default)]
    pub attachments: Attachments,
}

impl Call {
    pub fn new(
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        params: Vec<Param>,
    ) -> Self {
        let (param_types, params) = params
            .into_iter()
            .map(|p| (p.type_name, p.value))
            .unzip();

        Call {
            request_id: generate_request_id(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            param_types,
            params,
            attachments: HashMap::new(),
        }
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    /// Replaces the request id. Every attempt of an invocation gets its own id
    /// so a late reply to an abandoned attempt can never complete a newer one.
    pub fn renew_request_id(&mut self) {
        self.request_id = generate_request_id();
    }

    /// Key used for consistent-hash routing: the string form of the first
    /// parameter, or the empty string for parameterless calls.
    ///
    /// JSON strings are taken unquoted so `"alice"` and `alice` hash the same.
    pub fn hash_key(&self) -> String {
        match self.params.first() {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// A call argument together with its declared type name.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub type_name: String,
    pub value: Value,
}

impl Param {
    pub fn new(type_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Param {
            type_name: type_name.into(),
            value: value.into(),
        }
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::new("string", v)
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::new("string", v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::new("i64", v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::new("i32", v)
    }
}

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Param::new("u64", v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::new("f64", v)
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::new("bool", v)
    }
}
