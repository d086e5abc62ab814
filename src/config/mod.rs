//! Configuration documents.
//!
//! - [`ConfigNode`]: the typed view over a parsed YAML document
//! - [`ConfigError`]: every parse-time failure
//! - [`load_config`]: reads and parses a config file

mod error;
mod node;

pub use error::ConfigError;
pub use node::{ConfigNode, TYPE_KEY, URL_KEY};

/// Loads a transport config file.
///
/// Reads the file, checks it is UTF-8 and parses it as YAML.
pub async fn load_config(config_filename: &str) -> Result<ConfigNode, ConfigError> {
    let config_bytes = match tokio::fs::read(config_filename).await {
        Ok(b) => b,
        Err(e) => {
            return Err(ConfigError::Io {
                path: config_filename.to_string(),
                source: e,
            });
        }
    };

    let config_str = match String::from_utf8(config_bytes) {
        Ok(s) => s,
        Err(e) => {
            return Err(ConfigError::Syntax(format!(
                "could not parse config file {config_filename} as UTF8: {e}"
            )));
        }
    };

    ConfigNode::parse_yaml(&config_str).map_err(|e| match e {
        ConfigError::Syntax(message) => {
            ConfigError::Syntax(format!("{config_filename}: {message}"))
        }
        other => other,
    })
}
