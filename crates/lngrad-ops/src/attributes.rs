//! Node attributes available at kernel construction.

use std::collections::BTreeMap;
use std::fmt;

use lngrad_common::ConfigError;

/// A single attribute value attached to a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
}

impl AttributeValue {
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::String(_) => "string",
            AttributeValue::Ints(_) => "ints",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "int({v})"),
            AttributeValue::Float(v) => write!(f, "float({v})"),
            AttributeValue::String(v) => write!(f, "string({v:?})"),
            AttributeValue::Ints(v) => write!(f, "ints({v:?})"),
        }
    }
}

/// Construction-time attributes of a graph node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpKernelInfo {
    attributes: BTreeMap<String, AttributeValue>,
}

impl OpKernelInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute insertion.
    pub fn with_attr(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Required integer attribute.
    pub fn attr_i64(&self, name: &str) -> Result<i64, ConfigError> {
        match self.attributes.get(name) {
            Some(AttributeValue::Int(v)) => Ok(*v),
            Some(other) => Err(ConfigError::MalformedAttribute {
                name: name.to_string(),
                expected: "int",
                found: other.to_string(),
            }),
            None => Err(ConfigError::MissingAttribute { name: name.to_string() }),
        }
    }

    /// Optional integer attribute with a default.
    pub fn attr_i64_or(&self, name: &str, default: i64) -> Result<i64, ConfigError> {
        match self.attr_i64(name) {
            Err(ConfigError::MissingAttribute { .. }) => Ok(default),
            other => other,
        }
    }
}
