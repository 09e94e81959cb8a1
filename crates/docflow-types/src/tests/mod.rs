use jsonschema::{JSONSchema, paths::JSONPointer};
use serde_json::Value;

use crate::schemas;


fn compile(name: &str) -> JSONSchema {
    let json = schemas::find(name).unwrap_or_else(|| panic!("no embedded schema named {name}"));
    let schema_value: Value =
        serde_json::from_str(json).expect("embedded schema must be valid JSON");
    JSONSchema::options()
        .compile(&schema_value)
        .expect("embedded schema must compile successfully")
}

pub(crate) fn assert_json_schema(name: &str, instance: &Value) {
    let compiled = compile(name);
    if let Err(errors) = compiled.validate(instance) {
        let mut messages = Vec::new();
        for err in errors {
            messages.push(format!("{}: {}", format_pointer(&err.instance_path), err));
        }
        panic!(
            "schema validation failed: {}\ninstance: {}",
            messages.join("; "),
            instance
        );
    }
}

pub(crate) fn rejects_json_schema(name: &str, instance: &Value) -> bool {
    !compile(name).is_valid(instance)
}

fn format_pointer(pointer: &JSONPointer) -> String {
    let text = pointer.to_string();
    if text.is_empty() { "/".into() } else { text }
}
