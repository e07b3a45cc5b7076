//! Prefetch Keys
//!
//! Deterministic cache keys and query strings for prefetch parameters.

use serde_json::Value;
use url::form_urlencoded;

/// Serializes `value` with object keys sorted at every depth, so logically
/// equal parameter sets always produce the same string.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Key of a list prefetch.
pub fn list_key(params: &Value) -> String {
    canonical_json(params)
}

/// Key of a detail prefetch.
pub fn detail_key(id: &str) -> String {
    format!("product_{id}")
}

/// URL query for list parameters. Nulls are dropped, arrays are joined with
/// commas and nested objects are sent as JSON.
pub fn query_string(params: &Value) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Value::Object(map) = params {
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in entries {
            match value {
                Value::Null => continue,
                Value::Array(items) => {
                    let joined: Vec<String> = items.iter().map(scalar_text).collect();
                    serializer.append_pair(key, &joined.join(","));
                }
                other => {
                    serializer.append_pair(key, &scalar_text(other));
                }
            }
        }
    }
    serializer.finish()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) => canonical_json(value),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_ignores_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"sort":"new","filter":{"z":1,"a":[{"y":2,"x":1}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"filter":{"a":[{"x":1,"y":2}],"z":1},"sort":"new"}"#).unwrap();

        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            canonical_json(&a),
            r#"{"filter":{"a":[{"x":1,"y":2}],"z":1},"sort":"new"}"#
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
    }

    #[test]
    fn test_detail_key() {
        assert_eq!(detail_key("abc123"), "product_abc123");
    }

    #[test]
    fn test_query_string() {
        let params = json!({
            "page": 2,
            "category": "shoes & bags",
            "tags": ["new", "sale"],
            "seller": null
        });

        assert_eq!(
            query_string(&params),
            "category=shoes+%26+bags&page=2&tags=new%2Csale"
        );
        assert_eq!(query_string(&json!({})), "");
        assert_eq!(query_string(&json!("not an object")), "");
    }
}
