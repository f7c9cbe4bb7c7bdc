//! Strip JSON-schema keywords that strict upstreams (Gemini in particular)
//! reject in function declarations. Best-effort: never fails, and keys not
//! on the denylist pass through untouched.

use serde_json::{Map, Value};

const DENYLIST: &[&str] = &[
    "$schema",
    "$id",
    "$comment",
    "additionalProperties",
    "unevaluatedProperties",
    "patternProperties",
    "propertyNames",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "examples",
    "default",
];

/// String `format` values Gemini understands; any other is dropped.
const KEPT_STRING_FORMATS: &[&str] = &["enum", "date-time"];

/// Keys whose object value maps names to sub-schemas.
const SCHEMA_MAPS: &[&str] = &["properties", "$defs", "definitions"];

pub fn clean_schema(schema: &Value) -> Value {
    let mut out = schema.clone();
    clean_schema_in_place(&mut out);
    out
}

pub fn clean_schema_in_place(schema: &mut Value) {
    match schema {
        Value::Object(obj) => clean_node(obj),
        Value::Array(items) => items.iter_mut().for_each(clean_schema_in_place),
        _ => {}
    }
}

fn clean_node(obj: &mut Map<String, Value>) {
    for key in DENYLIST {
        obj.remove(*key);
    }

    let drop_format = obj.get("format").is_some_and(|format| {
        format
            .as_str()
            .map_or(true, |f| !KEPT_STRING_FORMATS.contains(&f))
    });
    if drop_format {
        obj.remove("format");
    }

    for (key, value) in obj.iter_mut() {
        if SCHEMA_MAPS.contains(&key.as_str()) {
            // Children here are named schemas; the names themselves are not keywords.
            if let Some(children) = value.as_object_mut() {
                children.values_mut().for_each(clean_schema_in_place);
            }
        } else if key != "enum" && key != "required" {
            clean_schema_in_place(value);
        }
    }
}
