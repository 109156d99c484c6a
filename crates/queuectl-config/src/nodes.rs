// Helper functions for extracting values from KDL nodes

use crate::{ConfigError, ConfigResult};
use kdl::KdlNode;

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

/// Children of `node` as `(name, node)` pairs; empty if it has no block.
pub(crate) fn children(node: &KdlNode) -> Vec<(&str, &KdlNode)> {
    node.children()
        .map(|doc| {
            doc.nodes()
                .iter()
                .map(|child| (child.name().value(), child))
                .collect()
        })
        .unwrap_or_default()
}

/// A child setting like `data-dir ".queuectl"`, which must carry a string.
pub(crate) fn require_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::InvalidValue {
        field: field.to_string(),
        message: "expected a string".to_string(),
    })
}

/// A child setting like `max-connections 10`, which must carry a positive integer.
pub(crate) fn require_positive<T: TryFrom<i128>>(node: &KdlNode, field: &str) -> ConfigResult<T> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    };
    let value = get_first_integer_arg(node).ok_or_else(|| invalid("expected an integer"))?;
    if value <= 0 {
        return Err(invalid("must be greater than zero"));
    }
    T::try_from(value).map_err(|_| invalid("out of range"))
}
