//! Route pattern translation.
//!
//! Patterns are written in the colon/wildcard form (`/users/:id`,
//! `/static/*`) and compiled once at bind time into the engine's syntax.
//!
//! # Design Decisions
//! - Parameter order is pattern order; that order is the positional order
//!   `Request::param(i)` sees
//! - A trailing `*` matches the bare prefix too, and its capture is not a
//!   positional parameter
//! - Anything the engine would reject is rejected here, at setup

use crate::error::ServerError;

/// Name of the engine capture for a trailing `*`.
pub const WILDCARD_CAPTURE: &str = "__rest";

/// A pattern compiled for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPath {
    /// Pattern in the engine's syntax.
    pub pattern: String,
    /// For trailing-wildcard patterns, the prefix that is bound as well.
    pub prefix: Option<String>,
    /// Parameter names in positional order.
    pub params: Vec<String>,
}

/// Translate `path` into the engine's pattern syntax.
pub fn compile(path: &str) -> Result<CompiledPath, ServerError> {
    let invalid = |reason| ServerError::InvalidRoute {
        path: path.to_string(),
        reason,
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path == "/" {
        return Ok(CompiledPath {
            pattern: "/".to_string(),
            prefix: None,
            params: Vec::new(),
        });
    }

    let segments: Vec<&str> = path[1..].split('/').collect();
    let mut pattern = String::with_capacity(path.len() + 8);
    let mut params: Vec<String> = Vec::new();
    let mut prefix = None;

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();

        if segment.contains('{') || segment.contains('}') {
            return Err(invalid("braces are not allowed"));
        }

        if *segment == "*" {
            if !last {
                return Err(invalid("'*' is only allowed as the last segment"));
            }
            prefix = Some(if pattern.is_empty() {
                "/".to_string()
            } else {
                pattern.clone()
            });
            pattern.push_str("/{*");
            pattern.push_str(WILDCARD_CAPTURE);
            pattern.push('}');
            continue;
        }
        if segment.contains('*') {
            return Err(invalid("'*' must be a whole segment"));
        }

        pattern.push('/');
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid("parameter names must be non-empty [A-Za-z0-9_]"));
            }
            if name == WILDCARD_CAPTURE {
                return Err(invalid("parameter name is reserved"));
            }
            if params.iter().any(|p| p == name) {
                return Err(invalid("duplicate parameter name"));
            }
            pattern.push('{');
            pattern.push_str(name);
            pattern.push('}');
            params.push(name.to_string());
        } else if segment.contains(':') {
            return Err(invalid("':' must start a segment"));
        } else {
            pattern.push_str(segment);
        }
    }

    Ok(CompiledPath {
        pattern,
        prefix,
        params,
    })
}
