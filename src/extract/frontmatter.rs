//! YAML frontmatter splitting and field access

use crate::graph::Metadata;
use serde_json::Value;

/// Split a document into parsed frontmatter and the remaining markdown body.
///
/// Frontmatter is delimited by `---` at the start and end:
/// ```text
/// ---
/// status: WIP
/// files: [src/lib.rs]
/// ---
/// ```
///
/// Returns `None` for the frontmatter when the document has none, and
/// `Some(Err(..))` when the block exists but is not a YAML mapping.
pub(crate) fn split_frontmatter(content: &str) -> (Option<Result<Metadata, String>>, &str) {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return (None, content);
    }

    let after_first = &trimmed[3..];
    let Some(end_pos) = after_first.find("\n---") else {
        return (None, content);
    };

    let yaml = &after_first[..end_pos];
    // Drop the rest of the closing delimiter line
    let rest = &after_first[end_pos + 4..];
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");

    (Some(parse_yaml_mapping(yaml)), body)
}

fn parse_yaml_mapping(yaml: &str) -> Result<Metadata, String> {
    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let yaml_val = serde_yaml::from_str::<serde_yaml::Value>(yaml)
        .map_err(|e| format!("YAML parse error: {}", e))?;
    let json_val = serde_json::to_value(yaml_val)
        .map_err(|e| format!("YAML to JSON conversion failed: {}", e))?;

    match json_val {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        other => Err(format!("frontmatter is not a mapping: {}", other)),
    }
}

/// A scalar string field, trimmed; numbers are rendered as text
pub(crate) fn string_field(fields: &Metadata, key: &str) -> Option<String> {
    let value = match fields.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

/// A list field. Accepts a YAML sequence, a comma-separated string or a
/// single number.
pub(crate) fn list_field(fields: &Metadata, key: &str) -> Vec<String> {
    let items: Vec<String> = match fields.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(value) => scalar_text(value).into_iter().collect(),
        None => Vec::new(),
    };

    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
