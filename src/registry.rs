//! Type-tag dispatch for config nodes.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::config::{ConfigError, ConfigNode};

/// Builds a `T` from a config node.
///
/// `ctx` is handed through to every constructor so nested sub-configs can be
/// parsed again, possibly into a different result type.
pub trait Constructor<T, Ctx: ?Sized>: Send + Sync {
    fn construct(&self, node: &ConfigNode, ctx: &Ctx) -> Result<T, ConfigError>;
}

impl<T, Ctx: ?Sized, F> Constructor<T, Ctx> for F
where
    F: Fn(&ConfigNode, &Ctx) -> Result<T, ConfigError> + Send + Sync,
{
    fn construct(&self, node: &ConfigNode, ctx: &Ctx) -> Result<T, ConfigError> {
        self(node, ctx)
    }
}

/// Maps type tags to constructors.
pub struct TypeRegistry<T, Ctx: ?Sized> {
    name: &'static str,
    constructors: HashMap<String, Arc<dyn Constructor<T, Ctx>>>,
    default_tag: Option<String>,
}

impl<T: 'static, Ctx: ?Sized + 'static> TypeRegistry<T, Ctx> {
    /// `name` identifies the registry in log messages.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            constructors: HashMap::new(),
            default_tag: None,
        }
    }

    /// Adds a constructor, failing if the tag is taken.
    pub fn register<F>(&mut self, tag: &str, constructor: F) -> Result<(), ConfigError>
    where
        F: Fn(&ConfigNode, &Ctx) -> Result<T, ConfigError> + Send + Sync + 'static,
    {
        self.register_constructor(tag, Arc::new(constructor))
    }

    pub fn register_constructor(
        &mut self,
        tag: &str,
        constructor: Arc<dyn Constructor<T, Ctx>>,
    ) -> Result<(), ConfigError> {
        if self.constructors.contains_key(tag) {
            return Err(ConfigError::DuplicateType(tag.to_string()));
        }
        self.constructors.insert(tag.to_string(), constructor);
        Ok(())
    }

    /// Adds a constructor, overriding any existing one for the tag.
    pub fn replace<F>(&mut self, tag: &str, constructor: F)
    where
        F: Fn(&ConfigNode, &Ctx) -> Result<T, ConfigError> + Send + Sync + 'static,
    {
        if self
            .constructors
            .insert(tag.to_string(), Arc::new(constructor))
            .is_some()
        {
            debug!("Replaced {} constructor for type {}", self.name, tag);
        }
    }

    /// Sets the tag used for mappings without an explicit `$type`.
    pub fn set_default_tag(&mut self, tag: &str) {
        self.default_tag = Some(tag.to_string());
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn parse(&self, node: &ConfigNode, ctx: &Ctx) -> Result<T, ConfigError> {
        let tag = match node.type_tag()? {
            Some(tag) => tag,
            None => match self.default_tag {
                Some(ref default_tag) if node.is_mapping() => default_tag.as_str(),
                _ => return Err(ConfigError::UnknownType { tag: None }),
            },
        };

        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownType {
                tag: Some(tag.to_string()),
            })?;

        debug!("Parsing {} config of type {}", self.name, tag);
        constructor.construct(node, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry<String, ()> {
        let mut registry = TypeRegistry::new("test");
        registry
            .register("echo", |node: &ConfigNode, _: &()| {
                node.require_string("echo", "value")
            })
            .unwrap();
        registry
            .register("ss", |_: &ConfigNode, _: &()| Ok("url".to_string()))
            .unwrap();
        registry
    }

    #[test]
    fn test_dispatch_by_explicit_tag() {
        let node = ConfigNode::parse_yaml("$type: echo\nvalue: hello").unwrap();
        assert_eq!(registry().parse(&node, &()).unwrap(), "hello");
    }

    #[test]
    fn test_dispatch_by_url_scheme() {
        let node = ConfigNode::parse_yaml("ss://aGVsbG8@example.com:1").unwrap();
        assert_eq!(registry().parse(&node, &()).unwrap(), "url");
    }

    #[test]
    fn test_unknown_tag_is_named() {
        let node = ConfigNode::parse_yaml("$type: vless").unwrap();
        match registry().parse(&node, &()) {
            Err(ConfigError::UnknownType { tag }) => assert_eq!(tag.as_deref(), Some("vless")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_untyped_node_without_default() {
        let node = ConfigNode::parse_yaml("value: hello").unwrap();
        assert!(matches!(
            registry().parse(&node, &()),
            Err(ConfigError::UnknownType { tag: None })
        ));
    }

    #[test]
    fn test_default_tag_applies_to_mappings_only() {
        let mut registry = registry();
        registry.set_default_tag("echo");
        let node = ConfigNode::parse_yaml("value: hello").unwrap();
        assert_eq!(registry.parse(&node, &()).unwrap(), "hello");

        let node = ConfigNode::parse_yaml("42").unwrap();
        assert!(matches!(
            registry.parse(&node, &()),
            Err(ConfigError::UnknownType { tag: None })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = registry();
        assert!(matches!(
            registry.register("echo", |_: &ConfigNode, _: &()| Ok(String::new())),
            Err(ConfigError::DuplicateType(tag)) if tag == "echo"
        ));

        registry.replace("echo", |_: &ConfigNode, _: &()| Ok("replaced".to_string()));
        let node = ConfigNode::parse_yaml("$type: echo").unwrap();
        assert_eq!(registry.parse(&node, &()).unwrap(), "replaced");
        assert_eq!(registry.tags(), vec!["echo", "ss"]);
    }
}
