//! Executors shipped with the engine so graphs run without plugins.

pub mod condition;
pub mod state;
pub mod template;
pub mod text;
pub mod wait;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::types::Node;

/// Read a string field from a node's config.
fn config_str<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.config.get(key).and_then(|v| v.as_str())
}

/// Like [`config_str`], but the field is mandatory.
fn required_str<'a>(node: &'a Node, key: &str) -> Result<&'a str> {
    config_str(node, key).ok_or_else(|| NodeflowError::InvalidNodeConfig {
        node_id: node.id.clone(),
        message: format!("'{}' must be a string", key),
    })
}
