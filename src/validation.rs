//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` against a [`Schema`] before any remote call
//! is made, producing diagnostics with attribute paths.
//!
//! # Example
//!
//! ```
//! use hsdp_provider::schema::{Schema, Attribute};
//! use hsdp_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("volumes", Attribute::optional_int64().with_int_range(0, 6));
//!
//! let diagnostics = validate(&schema, &json!({"name": "host-1", "volumes": 2}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "host-1", "volumes": 9}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("volumes".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, NestedBlock,
    Schema,
};
use serde_json::{Map, Value};

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Collections respect `max_items`, integers respect `int_range`
/// - `conflicts_with` / `required_with` relations between sibling attributes
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Whether a value counts as "set" for relation checks.
///
/// Null, empty strings and empty collections are treated as unset.
pub fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let mut diag = Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", value_type_name(value)));
            if !path.is_empty() {
                diag = diag.with_attribute(path);
            }
            diagnostics.push(diag);
            return;
        }
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
        validate_relations(name, attr, obj, &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if !attr.flags.is_configurable() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        }
        Some(v) => {
            if validate_attribute_type(&attr.attr_type, v, path, diagnostics) {
                validate_constraints(attr, v, path, diagnostics);
            }
        }
    }
}

fn validate_relations(
    name: &str,
    attr: &Attribute,
    obj: &Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if !is_set(obj.get(name)) {
        return;
    }
    for other in &attr.conflicts_with {
        if is_set(obj.get(other)) {
            diagnostics.push(
                Diagnostic::error(format!("Conflicting configuration arguments '{}'", path))
                    .with_detail(format!("'{}' conflicts with '{}'", name, other))
                    .with_attribute(path),
            );
        }
    }
    for other in &attr.required_with {
        if !is_set(obj.get(other)) {
            diagnostics.push(
                Diagnostic::error(format!("Missing required argument for '{}'", path))
                    .with_detail(format!("'{}' must be set when '{}' is set", other, name))
                    .with_attribute(path),
            );
        }
    }
}

/// Returns `true` when the value had the right shape.
fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let before = diagnostics.len();
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            // Sets are represented as arrays in JSON
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                let expected = if matches!(attr_type, AttributeType::Set(_)) {
                    "set"
                } else {
                    "list"
                };
                diagnostics.push(type_error(path, expected, value));
            }
        }
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        }
    }
    diagnostics.len() == before
}

fn validate_constraints(
    attr: &Attribute,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.max_items > 0 {
        let len = match value {
            Value::Array(arr) => arr.len(),
            Value::Object(obj) => obj.len(),
            _ => 0,
        } as u32;
        if len > attr.max_items {
            diagnostics.push(
                Diagnostic::error(format!(
                    "Attribute '{}' allows at most {} item(s), got {}",
                    path, attr.max_items, len
                ))
                .with_attribute(path),
            );
        }
    }

    if let (Some((min, max)), Some(n)) = (attr.int_range, value.as_i64()) {
        if n < min || n > max {
            diagnostics.push(
                Diagnostic::error(format!("Attribute '{}' is out of range", path))
                    .with_detail(format!("Expected {} to be in the range ({} - {})", n, min, max))
                    .with_attribute(path),
            );
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => validate_single_block(nested, value, path, diagnostics),
        BlockNestingMode::List | BlockNestingMode::Set => {
            validate_list_block(nested, value, path, diagnostics)
        }
    }
}

fn validate_single_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        }
        Some(v) => validate_block(&nested.block, v, path, diagnostics),
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        }
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // 0 means unlimited
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        }
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        }
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64()
                || n.as_f64().is_some_and(|f| {
                    f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
                })
        }
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock, Schema};
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "host-1"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("private_ip", Attribute::computed_string());
        assert!(validate(&schema, &json!({"private_ip": 10})).is_empty());
    }

    #[test]
    fn test_validate_int_range() {
        let schema = Schema::v0()
            .with_attribute("iops", Attribute::optional_int64().with_int_range(1, 4000));

        assert!(is_valid(&schema, &json!({"iops": 4000})));
        assert!(is_valid(&schema, &json!({"iops": null})));

        let diagnostics = validate(&schema, &json!({"iops": 0}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.as_deref().unwrap().contains("(1 - 4000)"));
    }

    #[test]
    fn test_validate_max_items() {
        let schema = Schema::v0()
            .with_attribute(
                "security_groups",
                Attribute::optional_string_set().with_max_items(2),
            )
            .with_attribute("tags", Attribute::optional_string_map().with_max_items(1));

        assert!(is_valid(
            &schema,
            &json!({"security_groups": ["a", "b"], "tags": {"env": "prod"}})
        ));

        let diagnostics = validate(
            &schema,
            &json!({"security_groups": ["a", "b", "c"], "tags": {"a": "1", "b": "2"}}),
        );
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_validate_element_types() {
        let schema = Schema::v0().with_attribute("commands", Attribute::optional_string_list());

        let diagnostics = validate(&schema, &json!({"commands": ["uptime", 7]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("commands.1".to_string()));
    }

    #[test]
    fn test_validate_conflicts_with() {
        let schema = Schema::v0()
            .with_attribute(
                "subnet_type",
                Attribute::optional_string().with_conflicts_with(&["subnet"]),
            )
            .with_attribute("subnet", Attribute::optional_string());

        assert!(is_valid(&schema, &json!({"subnet_type": "public"})));
        assert!(is_valid(&schema, &json!({"subnet_type": "public", "subnet": ""})));

        let diagnostics = validate(&schema, &json!({"subnet_type": "public", "subnet": "s-1"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Conflicting"));
    }

    #[test]
    fn test_validate_required_with() {
        let schema = Schema::v0()
            .with_attribute(
                "user",
                Attribute::optional_string().with_required_with(&["private_key"]),
            )
            .with_attribute(
                "private_key",
                Attribute::optional_string().with_required_with(&["user"]),
            );

        assert!(is_valid(&schema, &json!({})));
        assert!(is_valid(&schema, &json!({"user": "core", "private_key": "KEY"})));

        let diagnostics = validate(&schema, &json!({"user": "core"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("user".to_string()));
    }

    #[test]
    fn test_validate_nested_set_block() {
        let schema = Schema::v0().with_block(
            "file",
            NestedBlock::set(
                Block::new()
                    .with_attribute("source", Attribute::optional_string())
                    .with_attribute("destination", Attribute::required_string()),
            ),
        );

        assert!(is_valid(
            &schema,
            &json!({"file": [{"source": "a.txt", "destination": "/tmp/a.txt"}]})
        ));

        let diagnostics = validate(&schema, &json!({"file": [{"source": "a.txt"}]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("file.0.destination".to_string())
        );

        let diagnostics = validate(&schema, &json!({"file": "nope"}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_validate_result() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());
        assert!(validate_result(&schema, &json!({"name": "x"})).is_ok());
        assert!(validate_result(&schema, &json!({"name": null})).is_err());
    }

    #[test]
    fn test_is_set() {
        assert!(!is_set(None));
        assert!(!is_set(Some(&json!(null))));
        assert!(!is_set(Some(&json!(""))));
        assert!(!is_set(Some(&json!([]))));
        assert!(is_set(Some(&json!(0))));
        assert!(is_set(Some(&json!(false))));
        assert!(is_set(Some(&json!("x"))));
    }
}
