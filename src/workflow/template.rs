// flowlink — Template resolution against the step cache
//
// A template expression is `{step_id.seg.seg...}`. A string that is exactly one
// expression resolves to the referenced value with its JSON type intact. An
// embedded expression is spliced into the string only when its step id names a
// cached step; any other `{word}` is literal text.

use super::cache::StepCache;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

static WHOLE_EXPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)\}$").unwrap());

static EMBEDDED_EXPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)\}").unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown step id '{step_id}' in template '{template}'")]
    UnknownStep { template: String, step_id: String },
    #[error("cannot traverse into scalar value at '{path}' in template '{template}'")]
    TraversalOnScalar { template: String, path: String },
    #[error("missing path segment '{segment}' at '{path}' in template '{template}'")]
    MissingSegment {
        template: String,
        path: String,
        segment: String,
    },
}

impl ResolveError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::UnknownStep { .. } => "unknown step id",
            ResolveError::TraversalOnScalar { .. } => "path traversal on scalar",
            ResolveError::MissingSegment { .. } => "missing path segment",
        }
    }

    pub fn template(&self) -> &str {
        match self {
            ResolveError::UnknownStep { template, .. }
            | ResolveError::TraversalOnScalar { template, .. }
            | ResolveError::MissingSegment { template, .. } => template,
        }
    }
}

/// A parsed `{step_id.path...}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub step_id: String,
    pub path: Vec<String>,
}

impl TemplateRef {
    /// Parse a string that consists of exactly one template expression.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = WHOLE_EXPR.captures(s)?;
        Some(Self::from_inner(&caps[1]))
    }

    fn from_inner(inner: &str) -> Self {
        let mut parts = inner.split('.');
        let step_id = parts.next().unwrap_or_default().to_string();
        Self {
            step_id,
            path: parts.map(str::to_string).collect(),
        }
    }

    fn display(&self) -> String {
        if self.path.is_empty() {
            format!("{{{}}}", self.step_id)
        } else {
            format!("{{{}.{}}}", self.step_id, self.path.join("."))
        }
    }

    /// Look up the referenced value. Segments are dispatched on the runtime
    /// type of the current value: keys on objects, indices on arrays.
    pub fn lookup<'a>(&self, cache: &'a StepCache) -> Result<&'a Value, ResolveError> {
        let template = self.display();
        let mut current = cache
            .get(&self.step_id)
            .ok_or_else(|| ResolveError::UnknownStep {
                template: template.clone(),
                step_id: self.step_id.clone(),
            })?;

        let mut walked = self.step_id.clone();
        for segment in &self.path {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => parse_index(segment).and_then(|i| items.get(i)),
                _ => {
                    return Err(ResolveError::TraversalOnScalar {
                        template,
                        path: walked,
                    })
                }
            };
            current = next.ok_or_else(|| ResolveError::MissingSegment {
                template: template.clone(),
                path: walked.clone(),
                segment: segment.clone(),
            })?;
            walked.push('.');
            walked.push_str(segment);
        }

        Ok(current)
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Resolve every template expression inside `value`, keeping its shape.
pub fn resolve_value(value: &Value, cache: &StepCache) -> Result<Value, ResolveError> {
    match value {
        Value::String(s) => resolve_string(s, cache),
        Value::Object(map) => Ok(Value::Object(resolve_map(map, cache)?)),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(v, cache))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => Ok(value.clone()),
    }
}

/// Resolve an action's `config` object.
pub fn resolve_map(
    map: &Map<String, Value>,
    cache: &StepCache,
) -> Result<Map<String, Value>, ResolveError> {
    let mut resolved = Map::with_capacity(map.len());
    for (k, v) in map {
        resolved.insert(k.clone(), resolve_value(v, cache)?);
    }
    Ok(resolved)
}

fn resolve_string(s: &str, cache: &StepCache) -> Result<Value, ResolveError> {
    if let Some(reference) = TemplateRef::parse(s) {
        return reference.lookup(cache).cloned();
    }

    if !EMBEDDED_EXPR.is_match(s) {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in EMBEDDED_EXPR.captures_iter(s) {
        let Some(m) = caps.get(0) else { continue };
        let reference = TemplateRef::from_inner(&caps[1]);
        if !cache.contains(&reference.step_id) {
            continue;
        }
        out.push_str(&s[last..m.start()]);
        let value = reference.lookup(cache)?;
        match value {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        last = m.end();
    }
    out.push_str(&s[last..]);

    Ok(Value::String(out))
}
