use serde_json::Value;

// Draft metakeywords and annotations the upstream rejects in tool
// declarations.
const STRIP_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$defs",
    "definitions",
    "title",
    "default",
    "examples",
    "deprecated",
    "readOnly",
    "writeOnly",
    "additionalProperties",
];

// Keys Gemini additionally refuses in function declarations.
const GEMINI_STRIP_KEYS: &[&str] = &[
    "pattern",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "const",
];

const GEMINI_ALLOWED_FORMATS: &[&str] = &["enum", "date-time"];

/// Collapses the `type: ["string", "null"]` nullable shortcut to its
/// non-null member.
fn collapse_nullable_type(map: &mut serde_json::Map<String, Value>) {
    let collapsed = match map.get("type") {
        Some(Value::Array(types)) => types
            .iter()
            .find(|t| t.as_str() != Some("null"))
            .cloned(),
        _ => None,
    };
    if let Some(single) = collapsed {
        map.insert("type".to_string(), single);
    }
    map.remove("nullable");
}

fn clean_recursive(value: &mut Value, strict: bool) {
    match value {
        Value::Object(map) => {
            for key in STRIP_KEYS {
                map.remove(*key);
            }
            collapse_nullable_type(map);

            if strict {
                for key in GEMINI_STRIP_KEYS {
                    map.remove(*key);
                }
            }
            let format_ok = map
                .get("format")
                .and_then(Value::as_str)
                .map(|f| GEMINI_ALLOWED_FORMATS.contains(&f))
                .unwrap_or(true);
            if !format_ok {
                map.remove("format");
            }

            for (_, child) in map.iter_mut() {
                clean_recursive(child, strict);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                clean_recursive(child, strict);
            }
        }
        _ => {}
    }
}

/// Base sanitization applied to every tool schema before it is forwarded.
pub fn clean_json_schema(value: &mut Value) {
    clean_recursive(value, false);
}

/// Stricter pass required by Gemini function declarations.
pub fn clean_json_schema_strict(value: &mut Value) {
    clean_recursive(value, true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_metakeywords_recursively() {
        let mut schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "title": "Args",
            "properties": {
                "query": {"type": "string", "default": "", "examples": ["x"]}
            }
        });
        clean_json_schema(&mut schema);
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert!(schema["properties"]["query"].get("default").is_none());
        assert_eq!(schema["properties"]["query"]["type"], "string");
    }

    #[test]
    fn collapses_nullable_type_arrays() {
        let mut schema = json!({"type": ["string", "null"], "nullable": true});
        clean_json_schema(&mut schema);
        assert_eq!(schema["type"], "string");
        assert!(schema.get("nullable").is_none());
    }

    #[test]
    fn removes_arbitrary_formats_but_keeps_date_time() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "when": {"type": "string", "format": "date-time"},
                "where": {"type": "string", "format": "uri"}
            }
        });
        clean_json_schema(&mut schema);
        assert_eq!(schema["properties"]["when"]["format"], "date-time");
        assert!(schema["properties"]["where"].get("format").is_none());
    }

    #[test]
    fn strict_pass_drops_constraint_keywords() {
        let mut schema = json!({
            "type": "string",
            "pattern": "^[a-z]+$",
            "minLength": 1,
            "maxLength": 20
        });
        clean_json_schema_strict(&mut schema);
        assert!(schema.get("pattern").is_none());
        assert!(schema.get("minLength").is_none());
        assert!(schema.get("maxLength").is_none());
        assert_eq!(schema["type"], "string");
    }
}
