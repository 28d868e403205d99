//! MK-013: `{{name}}` templates in declared action arguments.
//!
//! A string that is exactly one template resolves to the bound value itself,
//! keeping its type. Any other template is rendered as text in place.
//! Templates are found inside nested lists and mappings too.

use super::types::{display_value, Args, Value};
use std::ops::Range;

/// Every `{{ name }}` in `text`, with the byte range it covers.
fn placeholders(text: &str) -> Result<Vec<(Range<usize>, &str)>, String> {
    let mut found = Vec::new();
    let mut start = 0;
    while let Some(open) = text[start..].find("{{") {
        let open = start + open;
        let close = text[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = text[open + 2..close - 2].trim();
        if key.is_empty() {
            return Err(format!("empty template at position {}", open));
        }
        found.push((open..close, key));
        start = close;
    }
    Ok(found)
}

/// Names referenced by templates anywhere in `value`, first use first.
pub fn template_names(value: &Value) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    collect_names(value, &mut names)?;
    Ok(names)
}

fn collect_names(value: &Value, names: &mut Vec<String>) -> Result<(), String> {
    match value {
        Value::String(text) => {
            for (_, key) in placeholders(text)? {
                if !names.iter().any(|n| n == key) {
                    names.push(key.to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_names(item, names)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_names(item, names)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Substitute every template in `value` from `args`.
pub fn resolve_value(value: &Value, args: &Args) -> Result<Value, String> {
    match value {
        Value::String(text) => resolve_string(text, args),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, args))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| resolve_value(v, args).map(|v| (k.clone(), v)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string(text: &str, args: &Args) -> Result<Value, String> {
    let found = placeholders(text)?;
    let lookup = |key: &str| {
        args.get(key)
            .ok_or_else(|| format!("unknown template variable: {}", key))
    };

    if let [(range, key)] = found.as_slice() {
        if *range == (0..text.len()) {
            return lookup(key).cloned();
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (range, key) in found {
        out.push_str(&text[last..range.start]);
        out.push_str(&display_value(lookup(key)?));
        last = range.end;
    }
    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args() -> Args {
        [
            ("zid", json!("z5555555")),
            ("lab", json!("lab01")),
            ("n", json!(3)),
            ("dirs", json!(["a", "b"])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_mk013_inline_templates_render_text() {
        let v = json!("git@host:{{zid}}/{{ lab }}.git");
        assert_eq!(
            resolve_value(&v, &args()).unwrap(),
            json!("git@host:z5555555/lab01.git")
        );
    }

    #[test]
    fn test_mk013_whole_template_keeps_type() {
        assert_eq!(resolve_value(&json!("{{n}}"), &args()).unwrap(), json!(3));
        assert_eq!(
            resolve_value(&json!("{{ dirs }}"), &args()).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(resolve_value(&json!("n={{n}}"), &args()).unwrap(), json!("n=3"));
    }

    #[test]
    fn test_mk013_nested_values() {
        let v = json!({"args": ["ssh", "cse", "{{zid}}"], "count": "{{n}}", "flag": true});
        assert_eq!(
            resolve_value(&v, &args()).unwrap(),
            json!({"args": ["ssh", "cse", "z5555555"], "count": 3, "flag": true})
        );
    }

    #[test]
    fn test_mk013_unknown_variable() {
        let err = resolve_value(&json!("{{nope}}"), &args()).unwrap_err();
        assert!(err.contains("unknown template variable: nope"));
    }

    #[test]
    fn test_mk013_unclosed_template() {
        assert!(template_names(&json!("{{zid")).is_err());
        assert!(template_names(&json!("{{ }}")).is_err());
    }

    #[test]
    fn test_mk013_template_names_dedup_in_order() {
        let v = json!({"a": "{{lab}}-{{zid}}", "b": ["{{zid}}", "{{dir}}"]});
        assert_eq!(template_names(&v).unwrap(), vec!["lab", "zid", "dir"]);
        assert!(template_names(&json!("plain")).unwrap().is_empty());
    }
}
