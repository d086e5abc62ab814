//! Errors raised while loading and parsing transport configs.

/// Errors that can occur when turning a config document into transports.
///
/// Every variant carries the type tag and field it refers to, so messages
/// are enough to locate the problem in the document.
#[derive(Debug)]
pub enum ConfigError {
    /// The document is not well-formed YAML.
    Syntax(String),
    /// The config file could not be read.
    Io {
        path: String,
        source: std::io::Error,
    },
    /// No type tag could be resolved, or the tag has no registered constructor.
    UnknownType { tag: Option<String> },
    /// A constructor is already registered for the tag.
    DuplicateType(String),
    MissingField {
        tag: String,
        field: String,
    },
    InvalidField {
        tag: String,
        field: String,
        reason: String,
    },
    /// A nested sub-config failed to parse.
    Field {
        field: String,
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    pub fn missing(tag: &str, field: &str) -> Self {
        Self::MissingField {
            tag: tag.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid(tag: &str, field: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidField {
            tag: tag.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wraps this error with the name of the field holding the failed sub-config.
    pub fn in_field(self, field: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Strips all `Field` wrappers.
    pub fn root_cause(&self) -> &ConfigError {
        match self {
            Self::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "invalid config syntax: {}", e),
            Self::Io { path, source } => write!(f, "could not read config file {}: {}", path, source),
            Self::UnknownType { tag: Some(tag) } => write!(f, "unknown config type: {}", tag),
            Self::UnknownType { tag: None } => {
                write!(f, "config has no type (expected a $type field or a URL)")
            }
            Self::DuplicateType(tag) => write!(f, "config type {} is already registered", tag),
            Self::MissingField { tag, field } => write!(f, "{}: missing field '{}'", tag, field),
            Self::InvalidField { tag, field, reason } => {
                write!(f, "{}: invalid field '{}': {}", tag, field, reason)
            }
            Self::Field { field, source } => write!(f, "failed to parse '{}': {}", field, source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Field { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
