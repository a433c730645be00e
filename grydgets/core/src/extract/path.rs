//! Dotted/indexed path lookups: `current.temp`, `items[0][1].name`

use serde_json::Value;

use crate::error::ExtractionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Key(String),
    Index(i64),
}

pub(crate) fn parse(path: &str) -> Result<Vec<Segment>, ExtractionError> {
    let bad = |reason: &str| ExtractionError::BadPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    if path.trim().is_empty() {
        return Ok(segments);
    }
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if key.is_empty() && rest.is_empty() {
            return Err(bad("empty segment"));
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[').ok_or_else(|| bad("expected '['"))?;
            let close = inner.find(']').ok_or_else(|| bad("unclosed '['"))?;
            let index = inner[..close]
                .trim()
                .parse::<i64>()
                .map_err(|_| bad("index is not an integer"))?;
            segments.push(Segment::Index(index));
            rest = &inner[close + 1..];
        }
    }
    Ok(segments)
}

/// Resolve `path` against `data`
///
/// Negative indices count from the end. An empty path returns `data`.
pub fn extract_path(data: &Value, path: &str) -> Result<Value, ExtractionError> {
    let mut current = data;
    for segment in parse(path)? {
        current = match (&segment, current) {
            (Segment::Key(key), Value::Object(map)) => map
                .get(key)
                .ok_or_else(|| ExtractionError::MissingKey(key.clone()))?,
            (Segment::Index(index), Value::Array(items)) => {
                let len = items.len();
                let resolved = if *index < 0 {
                    i64::try_from(len).ok().map(|l| l + index)
                } else {
                    Some(*index)
                };
                resolved
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get(i))
                    .ok_or(ExtractionError::IndexOutOfRange { index: *index, len })?
            }
            (segment, other) => {
                return Err(ExtractionError::NotIndexable {
                    kind: super::kind_name(other),
                    with: match segment {
                        Segment::Key(k) => format!("key '{k}'"),
                        Segment::Index(i) => format!("index {i}"),
                    },
                })
            }
        };
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_mixed_path() {
        assert_eq!(
            parse("a.b[0][-1]").unwrap(),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(0),
                Segment::Index(-1),
            ]
        );
    }

    #[test]
    fn test_extract_nested() {
        let data = json!({"current": {"temp": 21.5}, "rows": [[1, 2], [3, 4]]});

        assert_eq!(extract_path(&data, "current.temp").unwrap(), json!(21.5));
        assert_eq!(extract_path(&data, "rows[1][0]").unwrap(), json!(3));
        assert_eq!(extract_path(&data, "rows[-1][-1]").unwrap(), json!(4));
        assert_eq!(extract_path(&data, "").unwrap(), data);
    }

    #[test]
    fn test_top_level_index() {
        let data = json!([{"a": 1}]);
        assert_eq!(extract_path(&data, "[0].a").unwrap(), json!(1));
    }

    #[test]
    fn test_extract_errors() {
        let data = json!({"a": [1], "s": "text"});

        assert_eq!(
            extract_path(&data, "missing"),
            Err(ExtractionError::MissingKey("missing".into()))
        );
        assert_eq!(
            extract_path(&data, "a[3]"),
            Err(ExtractionError::IndexOutOfRange { index: 3, len: 1 })
        );
        assert!(matches!(
            extract_path(&data, "s.x"),
            Err(ExtractionError::NotIndexable { kind: "string", .. })
        ));
        assert!(matches!(
            extract_path(&data, "a[x]"),
            Err(ExtractionError::BadPath { .. })
        ));
        assert!(matches!(
            extract_path(&data, "a..b"),
            Err(ExtractionError::BadPath { .. })
        ));
    }
}
