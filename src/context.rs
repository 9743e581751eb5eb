//! Evaluation context
//!
//! Immutable key/value data supplied by the application to personalize flag decisions.
//! A context is shared by reference, so cloning a snapshot out of the state store is cheap.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ContextData {
    #[serde(default)]
    targeting_key: String,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
}

/// Immutable evaluation context.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    inner: Arc<ContextData>,
}

impl EvaluationContext {
    pub fn new(targeting_key: impl Into<String>) -> Self {
        Self::builder().targeting_key(targeting_key).build()
    }

    pub fn builder() -> EvaluationContextBuilder {
        EvaluationContextBuilder::default()
    }

    pub fn targeting_key(&self) -> &str {
        &self.inner.targeting_key
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.inner.attributes.get(key)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.inner.attributes
    }

    /// Returns a new context with `key` set, leaving `self` untouched.
    pub fn with_attribute(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut data = (*self.inner).clone();
        data.attributes.insert(key.into(), value.into());
        Self {
            inner: Arc::new(data),
        }
    }

    /// Whether two handles point at the same snapshot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Serialize for EvaluationContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EvaluationContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = ContextData::deserialize(deserializer)?;
        Ok(Self {
            inner: Arc::new(data),
        })
    }
}

/// Builder for [`EvaluationContext`].
#[derive(Debug, Clone, Default)]
pub struct EvaluationContextBuilder {
    targeting_key: String,
    attributes: BTreeMap<String, Value>,
}

impl EvaluationContextBuilder {
    pub fn targeting_key(mut self, targeting_key: impl Into<String>) -> Self {
        self.targeting_key = targeting_key.into();
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> EvaluationContext {
        EvaluationContext {
            inner: Arc::new(ContextData {
                targeting_key: self.targeting_key,
                attributes: self.attributes,
            }),
        }
    }
}
