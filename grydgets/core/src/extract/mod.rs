//! Data Extraction
//!
//! Sources return decoded JSON. Before the value reaches a cache or a node
//! it passes through an [`Extraction`] rule:
//!
//! ```text
//! raw JSON ──► json_path ("current.temp", "rows[0][1]") ──► query (".[] | select(...)") ──► value
//! ```
//!
//! Either stage may be absent. A rule with neither is the identity.

mod path;
mod query;

pub use self::path::extract_path;
pub use self::query::{run_query, validate_query};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ExtractionError;

/// Selects the interesting part of a fetched payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Extraction {
    /// Dotted/indexed path applied first
    #[serde(default, alias = "data_path")]
    pub json_path: Option<String>,

    /// jq-style query applied to the result of the path
    #[serde(default, alias = "jq_expression")]
    pub query: Option<String>,
}

impl Extraction {
    /// Rule that selects with a path only
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            json_path: Some(path.into()),
            query: None,
        }
    }

    /// Rule that selects with a query only
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            json_path: None,
            query: Some(query.into()),
        }
    }

    /// Whether the rule passes data through unchanged
    pub fn is_identity(&self) -> bool {
        self.json_path.is_none() && self.query.is_none()
    }

    /// Parse both stages without running them
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if let Some(p) = &self.json_path {
            path::parse(p)?;
        }
        if let Some(q) = &self.query {
            validate_query(q)?;
        }
        Ok(())
    }

    /// Apply the rule
    pub fn apply(&self, data: Value) -> Result<Value, ExtractionError> {
        let data = match &self.json_path {
            Some(p) => extract_path(&data, p)?,
            None => data,
        };
        match &self.query {
            Some(q) => run_query(&data, q),
            None => Ok(data),
        }
    }
}

/// Human-readable rendering of a value for display
///
/// Strings are shown without quotes; everything else as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_path_then_query() {
        let rule = Extraction {
            json_path: Some("data.list".into()),
            query: Some("length".into()),
        };
        let data = json!({"data": {"list": [1, 2, 3]}});

        assert_eq!(rule.apply(data).unwrap(), json!(3));
    }

    #[test]
    fn test_identity() {
        let rule = Extraction::default();
        assert!(rule.is_identity());
        assert_eq!(rule.apply(json!({"a": 1})).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_deserialize_accepts_jq_alias() {
        let rule: Extraction = toml::from_str("jq_expression = '.a'").unwrap();
        assert_eq!(rule, Extraction::query(".a"));
    }

    #[test]
    fn test_validate_rejects_bad_rules() {
        assert!(Extraction::path("a[").validate().is_err());
        assert!(Extraction::query("| |").validate().is_err());
        assert!(Extraction::path("a.b[2]").validate().is_ok());
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!("hi")), "hi");
        assert_eq!(value_to_text(&json!(21.5)), "21.5");
        assert_eq!(value_to_text(&json!(true)), "true");
    }
}
