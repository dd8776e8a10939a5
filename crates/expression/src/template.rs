//! Template substitution (spec C1).
//!
//! A template is a string that may reference the evaluation context through
//! `$IDENT.path` or `${IDENT.path}`. There are exactly two forms:
//!
//! - **Whole-string reference**: the *entire* string is one reference
//!   (`"$flow_input.user_id"`). The resolved value is substituted with its
//!   original JSON type preserved — a number stays a number, an object stays
//!   an object.
//! - **Interpolation**: the string contains a reference alongside other text
//!   (`"user-$flow_input.user_id-suffix"`). Every reference is replaced by
//!   its string-coerced value; the rest of the string is copied verbatim.
//!
//! A reference that does not resolve against the context falls back to the
//! environment variable of the same name as the leading identifier, then to
//! the original literal text if even that is absent.

use std::env;

use serde_json::Value;

/// An identifier followed by zero or more `.segment` path components.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathRef {
    root: String,
    segments: Vec<String>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parses a `$IDENT(.SEG)*` or `${IDENT(.SEG)*}` reference starting at byte
/// offset `start` (which must point at the `$`). Returns the reference and
/// the byte offset just past it, or `None` if `start` isn't a reference.
fn parse_ref(s: &str, start: usize) -> Option<(PathRef, usize)> {
    let bytes = s.as_bytes();
    debug_assert_eq!(bytes[start], b'$');
    let braced = bytes.get(start + 1) == Some(&b'{');
    let ident_start = if braced { start + 2 } else { start + 1 };

    let rest = s.get(ident_start..)?;
    let mut chars = rest.char_indices();
    let (_, first) = chars.next()?;
    if !is_ident_start(first) {
        return None;
    }
    let mut end = ident_start + first.len_utf8();
    for (i, c) in chars {
        if is_ident_continue(c) {
            end = ident_start + i + c.len_utf8();
        } else {
            break;
        }
    }
    let root = s[ident_start..end].to_string();

    let mut segments = Vec::new();
    let mut cursor = end;
    while s[cursor..].starts_with('.') {
        let seg_start = cursor + 1;
        let mut seg_end = seg_start;
        for (i, c) in s[seg_start..].char_indices() {
            if is_ident_continue(c) {
                seg_end = seg_start + i + c.len_utf8();
            } else {
                break;
            }
        }
        if seg_end == seg_start {
            break;
        }
        segments.push(s[seg_start..seg_end].to_string());
        cursor = seg_end;
    }

    if braced {
        if s[cursor..].starts_with('}') {
            cursor += 1;
        } else {
            return None;
        }
    }

    Some((PathRef { root, segments }, cursor))
}

/// Resolves a path reference against the evaluation context, falling back
/// to an environment variable of the same name as `root`.
fn resolve(path: &PathRef, context: &Value) -> Option<Value> {
    if let Some(value) = resolve_in_context(path, context) {
        return Some(value);
    }
    env::var(&path.root).ok().map(Value::String)
}

fn resolve_in_context(path: &PathRef, context: &Value) -> Option<Value> {
    let mut current = context.get(&path.root)?;
    for segment in &path.segments {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => current.get(segment)?,
        };
    }
    Some(current.clone())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Renders `template` against `context` (typically `{"flow_input": ..,
/// "results": ..}`).
///
/// A whole-string reference preserves the resolved value's JSON type.
/// Anything else is interpolated: every reference is replaced by its
/// string form, the rest of the text is left untouched.
#[must_use]
pub fn render(template: &str, context: &Value) -> Value {
    if template.starts_with('$') {
        if let Some((path, end)) = parse_ref(template, 0) {
            if end == template.len() {
                return resolve(&path, context)
                    .unwrap_or_else(|| Value::String(template.to_string()));
            }
        }
    }

    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    let bytes = template.as_bytes();
    while cursor < template.len() {
        if bytes[cursor] == b'$' {
            if let Some((path, end)) = parse_ref(template, cursor) {
                match resolve(&path, context) {
                    Some(value) => out.push_str(&value_to_string(&value)),
                    None => out.push_str(&template[cursor..end]),
                }
                cursor = end;
                continue;
            }
        }
        let ch = template[cursor..].chars().next().expect("cursor within bounds");
        out.push(ch);
        cursor += ch.len_utf8();
    }
    Value::String(out)
}

/// Applies [`render`] recursively: object keys and non-string scalars pass
/// through untouched, every string leaf is rendered, arrays and objects
/// recurse into their elements.
#[must_use]
pub fn render_deep(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => render(s, context),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_deep(v, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_deep(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}
