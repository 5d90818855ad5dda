use chorecore::NodeError;
use minijinja::Environment;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Render `source` against a structured value.
///
/// Object fields are available at the top level; the whole value is also
/// bound to `data`.
pub fn render(source: &str, value: &JsonValue) -> Result<String, NodeError> {
    if !source.contains("{{") && !source.contains("{%") {
        return Ok(source.to_string());
    }

    let mut context = match value {
        JsonValue::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    context.insert("data".to_string(), value.clone());

    let env = Environment::new();
    env.render_str(source, JsonValue::Object(context))
        .map_err(|e| NodeError::Template(e.to_string()))
}

/// Raw `headers` field of a node: object fields are kept as JSON text so
/// they can be rendered like the string form.
pub fn headers_source(field: Option<&JsonValue>) -> String {
    match field {
        Some(JsonValue::String(raw)) => raw.clone(),
        Some(JsonValue::Object(fields)) => JsonValue::Object(fields.clone()).to_string(),
        _ => String::new(),
    }
}

/// Parse declared headers given as a JSON object or `Key: value` lines.
pub fn parse_headers(raw: &str) -> Result<BTreeMap<String, String>, NodeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(BTreeMap::new());
    }

    if raw.starts_with('{') {
        let fields: Map<String, JsonValue> = serde_json::from_str(raw)
            .map_err(|e| NodeError::Configuration(format!("invalid headers: {}", e)))?;

        return Ok(fields
            .into_iter()
            .map(|(k, v)| match v {
                JsonValue::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect());
    }

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| NodeError::Configuration(format!("invalid header line: {}", line)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_fields_and_data() {
        let value = json!({"id": 7, "name": "box"});

        assert_eq!(
            render("/items/{{ id }}?n={{ data.name }}", &value).unwrap(),
            "/items/7?n=box"
        );
        assert_eq!(render("hello {{ data }}", &json!("you")).unwrap(), "hello you");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(render("POST", &JsonValue::Null).unwrap(), "POST");
    }

    #[test]
    fn headers_from_lines_or_json() {
        let lines = parse_headers("Content-Type: application/json\nX-Id: 42\n").unwrap();
        assert_eq!(lines["Content-Type"], "application/json");
        assert_eq!(lines["X-Id"], "42");

        let object = parse_headers(r#"{"X-Id": 42, "A": "b"}"#).unwrap();
        assert_eq!(object["X-Id"], "42");
        assert_eq!(object["A"], "b");

        assert!(parse_headers("no colon here").is_err());
        assert!(parse_headers("  ").unwrap().is_empty());
    }

    #[test]
    fn broken_templates_fail() {
        assert!(matches!(
            render("{{ unclosed", &JsonValue::Null),
            Err(NodeError::Template(_))
        ));
    }
}
