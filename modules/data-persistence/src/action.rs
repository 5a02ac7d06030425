//! Actions carry a type tag. Everything else is payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A dispatched action, identified by its type tag.
pub trait Action: Clone + Send + Sync + 'static {
    /// The discriminator matched by [`of_type`](crate::of_type).
    fn action_type(&self) -> &str;
}

/// Dynamically-shaped action: a `type` tag plus arbitrary JSON fields.
///
/// Serializes flat, so `{"type": "GET_TODO", "id": 1}` round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AnyAction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Parse from a JSON value. Fails if `type` is missing.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        fields.insert("type".to_string(), Value::String(self.kind.clone()));
        Value::Object(fields)
    }
}

impl Action for AnyAction {
    fn action_type(&self) -> &str {
        &self.kind
    }
}
