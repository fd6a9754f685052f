//! Validation of raw model completions against an output schema.
//!
//! Backends routinely wrap their answer in prose, markdown fences, or both.
//! The validator strips fences, scans for the first balanced `{...}` span
//! (string-aware, so braces inside JSON strings don't confuse it), parses
//! it, and then checks the parsed object against an [`OutputSchema`]:
//! required-field presence, type conformance, and numeric ranges. Numbers
//! outside their declared range are clamped to the nearest bound rather than
//! rejected; everything else wrong yields [`InvalidResponse`] and sends the
//! pipeline to fallback.
//!
//! This stage is the sole judge of whether the backend's answer is usable.
//! It does no semantic checking.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::InvalidResponse;
use crate::utils::looks_truncated;

/// Declared shape of one field in the model's answer.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Field types the schema language supports. All fields are required.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    /// A string restricted to one of the listed values, matched
    /// case-insensitively and normalized to the listed spelling.
    Enum(&'static [&'static str]),
    /// A number clamped into `[min, max]`.
    Number { min: f64, max: f64 },
    /// An array of objects, each validated against `item_fields`.
    ObjectArray { item_fields: Vec<FieldSpec> },
}

/// The full contract imposed on the model's answer.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    /// Literal description of the required shape, embedded in the prompt so
    /// the backend is instructed to answer in a machine-parsable format.
    pub fn describe(&self) -> String {
        let mut out = String::from("{\n");
        for (i, field) in self.fields.iter().enumerate() {
            out.push_str(&format!("  \"{}\": {}", field.name, describe_kind(&field.kind, 1)));
            if i + 1 < self.fields.len() {
                out.push(',');
            }
            out.push('\n');
        }
        out.push('}');
        out
    }
}

fn describe_kind(kind: &FieldKind, depth: usize) -> String {
    match kind {
        FieldKind::String => "string".to_string(),
        FieldKind::Enum(values) => values
            .iter()
            .map(|v| format!("\"{v}\""))
            .collect::<Vec<_>>()
            .join(" | "),
        FieldKind::Number { min, max } => format!("number between {min} and {max}"),
        FieldKind::ObjectArray { item_fields } => {
            let indent = "  ".repeat(depth + 1);
            let mut out = String::from("[\n");
            out.push_str(&format!("{indent}{{\n"));
            for (i, field) in item_fields.iter().enumerate() {
                out.push_str(&format!(
                    "{indent}  \"{}\": {}",
                    field.name,
                    describe_kind(&field.kind, depth + 1)
                ));
                if i + 1 < item_fields.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&format!("{indent}}},\n{indent}...\n"));
            out.push_str(&format!("{}]", "  ".repeat(depth)));
            out
        }
    }
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// Strip a markdown code fence if one is present, returning its body.
fn strip_fences(raw: &str) -> &str {
    match FENCE_RE.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw,
    }
}

/// Locate the first balanced `{...}` span in `raw`.
///
/// The scan tracks string literals and escapes so braces inside JSON strings
/// don't unbalance the count. Returns `None` when no opening brace exists or
/// the object never closes (the truncated case is distinguished later by the
/// parser's EOF classification).
pub fn first_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate `raw` against `schema`, returning the cleaned (clamped,
/// enum-normalized) JSON object on success.
pub fn validate(raw: &str, schema: &OutputSchema) -> Result<Value, InvalidResponse> {
    let body = strip_fences(raw);
    let span = match first_json_object(body) {
        Some(span) => span,
        None => {
            // An opening brace that never closes reads as truncation so the
            // caller can re-ask once; no brace at all is a hard miss.
            if body.contains('{') {
                return Err(InvalidResponse::Truncated);
            }
            return Err(InvalidResponse::NoJsonObject);
        }
    };

    let mut value: Value = serde_json::from_str(span).map_err(|e| {
        if looks_truncated(&e) {
            InvalidResponse::Truncated
        } else {
            InvalidResponse::Parse(e.to_string())
        }
    })?;

    let Some(object) = value.as_object_mut() else {
        return Err(InvalidResponse::NoJsonObject);
    };
    validate_object(object, &schema.fields, "")?;
    Ok(value)
}

fn validate_object(
    object: &mut Map<String, Value>,
    fields: &[FieldSpec],
    path: &str,
) -> Result<(), InvalidResponse> {
    for field in fields {
        let full_name = if path.is_empty() {
            field.name.to_string()
        } else {
            format!("{path}.{}", field.name)
        };
        let Some(value) = object.get_mut(field.name) else {
            return Err(InvalidResponse::MissingField(full_name));
        };
        validate_field(value, &field.kind, &full_name)?;
    }
    Ok(())
}

fn validate_field(
    value: &mut Value,
    kind: &FieldKind,
    name: &str,
) -> Result<(), InvalidResponse> {
    match kind {
        FieldKind::String => {
            if !value.is_string() {
                return Err(InvalidResponse::WrongType {
                    field: name.to_string(),
                    expected: "string",
                });
            }
        }
        FieldKind::Enum(allowed) => {
            let Some(s) = value.as_str() else {
                return Err(InvalidResponse::WrongType {
                    field: name.to_string(),
                    expected: "string",
                });
            };
            let normalized = allowed
                .iter()
                .find(|v| v.eq_ignore_ascii_case(s.trim()))
                .copied();
            match normalized {
                Some(v) => *value = Value::String(v.to_string()),
                None => {
                    return Err(InvalidResponse::WrongType {
                        field: name.to_string(),
                        expected: "one of the listed values",
                    });
                }
            }
        }
        FieldKind::Number { min, max } => {
            let Some(n) = value.as_f64() else {
                return Err(InvalidResponse::WrongType {
                    field: name.to_string(),
                    expected: "number",
                });
            };
            let clamped = n.clamp(*min, *max);
            if clamped != n {
                *value = Value::from(clamped);
            }
        }
        FieldKind::ObjectArray { item_fields } => {
            let Some(entries) = value.as_array_mut() else {
                return Err(InvalidResponse::WrongType {
                    field: name.to_string(),
                    expected: "array",
                });
            };
            for (i, entry) in entries.iter_mut().enumerate() {
                let Some(object) = entry.as_object_mut() else {
                    return Err(InvalidResponse::WrongType {
                        field: format!("{name}[{i}]"),
                        expected: "object",
                    });
                };
                validate_object(object, item_fields, &format!("{name}[{i}]"))?;
            }
        }
    }
    Ok(())
}
