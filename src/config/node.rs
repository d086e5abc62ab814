//! Adapter over the parsed YAML document tree.
//!
//! A node is either a mapping whose `$type` field names its type, or a bare
//! URL string such as `ss://...@host:port`, which behaves like
//! `{ $type: ss, url: <the string> }`. Quoting a URL does not change the node.

use serde_yaml::Value;

use super::error::ConfigError;

pub const TYPE_KEY: &str = "$type";
pub const URL_KEY: &str = "url";

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigNode {
    value: Value,
}

impl ConfigNode {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Parses a YAML document. Anchors and aliases are expanded, so every use
    /// of a shared sub-config is an independent copy.
    pub fn parse_yaml(text: &str) -> Result<Self, ConfigError> {
        let value = serde_yaml::from_str::<Value>(text)
            .map_err(|e| ConfigError::Syntax(e.to_string()))?;
        Ok(Self::new(value))
    }

    pub fn value(&self) -> &Value {
        untag(&self.value)
    }

    pub fn is_null(&self) -> bool {
        self.value().is_null()
    }

    pub fn is_mapping(&self) -> bool {
        self.value().is_mapping()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value().as_str()
    }

    /// Returns the node's string if it is a bare URL.
    pub fn url(&self) -> Option<&str> {
        self.as_str().filter(|s| url_scheme(s).is_some())
    }

    /// Resolves the explicit `$type` of a mapping, or the scheme of a URL.
    pub fn type_tag(&self) -> Result<Option<&str>, ConfigError> {
        match self.value() {
            Value::Mapping(mapping) => match mapping.get(TYPE_KEY).map(untag) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(tag)) => Ok(Some(tag.as_str())),
                Some(_) => Err(ConfigError::invalid(
                    "config",
                    TYPE_KEY,
                    "expected a string",
                )),
            },
            Value::String(s) => Ok(url_scheme(s)),
            _ => Ok(None),
        }
    }

    pub fn get(&self, key: &str) -> Option<ConfigNode> {
        match self.value() {
            Value::Mapping(mapping) => mapping.get(key).map(|v| ConfigNode::new(v.clone())),
            Value::String(_) if key == URL_KEY && self.url().is_some() => Some(self.clone()),
            _ => None,
        }
    }

    /// Returns a sequence's elements. A single non-sequence value is treated
    /// as a sequence of one.
    pub fn as_sequence(&self) -> Vec<ConfigNode> {
        match self.value() {
            Value::Sequence(values) => values.iter().cloned().map(ConfigNode::new).collect(),
            Value::Null => vec![],
            _ => vec![self.clone()],
        }
    }

    /// Reads a scalar field as a string. Missing and null fields are `None`.
    pub fn get_string(&self, tag: &str, field: &str) -> Result<Option<String>, ConfigError> {
        let node = match self.get(field) {
            Some(node) => node,
            None => return Ok(None),
        };
        match node.value() {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            _ => Err(ConfigError::invalid(tag, field, "expected a scalar value")),
        }
    }

    pub fn require_string(&self, tag: &str, field: &str) -> Result<String, ConfigError> {
        self.get_string(tag, field)?
            .ok_or_else(|| ConfigError::missing(tag, field))
    }
}

fn untag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untag(&tagged.value),
        other => other,
    }
}

/// Returns the scheme of a `<scheme>://...` string.
fn url_scheme(s: &str) -> Option<&str> {
    let (scheme, _) = s.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}
