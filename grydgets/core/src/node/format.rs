//! `format_string` templates
//!
//! A template contains one or more placeholders for the displayed value:
//!
//! ```text
//!   {value}  {}          plain text (strings unquoted)
//!   {value:.1f}  {:.0f}  fixed decimals, for numbers and numeric strings
//!   {{  }}               literal braces
//! ```
//!
//! Anything else inside braces is kept verbatim.

use serde_json::Value;

use crate::extract::value_to_text;

/// Substitute `value` into `template`
pub fn format_value(template: &str, value: &Value) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail.find('}') {
                Some(end) => {
                    let inner = &tail[1..end];
                    match placeholder(inner, value) {
                        Some(text) => out.push_str(&text),
                        None => out.push_str(&tail[..=end]),
                    }
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push_str(tail);
                    rest = "";
                }
            }
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Expand one `{...}` body, or `None` if it is not a value placeholder
fn placeholder(inner: &str, value: &Value) -> Option<String> {
    let (field, spec) = match inner.split_once(':') {
        Some((field, spec)) => (field, Some(spec)),
        None => (inner, None),
    };
    if !(field.is_empty() || field == "value") {
        return None;
    }
    let Some(spec) = spec else {
        return Some(value_to_text(value));
    };

    let decimals = spec
        .strip_prefix('.')
        .and_then(|s| s.strip_suffix('f'))
        .and_then(|d| d.parse::<usize>().ok());
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match (decimals, number) {
        (Some(decimals), Some(number)) => Some(format!("{number:.decimals$}")),
        _ => Some(value_to_text(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_plain_placeholders() {
        assert_eq!(format_value("{value}°", &json!(21.5)), "21.5°");
        assert_eq!(format_value("Now: {}", &json!("sunny")), "Now: sunny");
        assert_eq!(format_value("{value} / {value}", &json!(3)), "3 / 3");
    }

    #[test]
    fn test_fixed_decimals() {
        assert_eq!(format_value("{value:.1f}", &json!(21.46)), "21.5");
        assert_eq!(format_value("{:.0f}%", &json!("42.7")), "43%");
        assert_eq!(format_value("{value:.2f}", &json!("n/a")), "n/a");
    }

    #[test]
    fn test_escapes_and_unknown_fields() {
        assert_eq!(format_value("{{{value}}}", &json!(1)), "{1}");
        assert_eq!(format_value("{other} {value}", &json!(1)), "{other} 1");
        assert_eq!(format_value("open {", &json!(1)), "open {");
    }

    #[test]
    fn test_structured_values_as_json() {
        assert_eq!(format_value("{value}", &json!([1, 2])), "[1,2]");
        assert_eq!(format_value("[{value}]", &Value::Null), "[]");
    }
}
