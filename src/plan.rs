//! Schema-driven planning.
//!
//! The plan fills in schema defaults, carries computed values over from
//! prior state, and lists every configurable attribute whose value changes.
//! A change to a `force_new` attribute or block makes the plan a
//! replacement.

use serde_json::{Map, Value};

use crate::schema::{AttributeType, BlockNestingMode, Schema};
use crate::types::{AttributeChange, PlanResult};
use crate::validation::is_set;

/// Fill in schema defaults for attributes that are unset in `value`.
pub fn apply_defaults(schema: &Schema, value: Value) -> Value {
    let mut object = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (name, attr) in &schema.block.attributes {
        if let Some(default) = &attr.default {
            if object.get(name).map_or(true, Value::is_null) {
                object.insert(name.clone(), default.clone());
            }
        }
    }
    Value::Object(object)
}

/// Compute the plan for moving from `prior` to `proposed`.
///
/// `suppressed` lists `attribute.key` paths of map entries whose changes
/// are never reported.
pub fn plan_resource(
    schema: &Schema,
    prior: Option<&Value>,
    proposed: Value,
    suppressed: &[&str],
) -> PlanResult {
    let mut planned = apply_defaults(schema, proposed);

    let Some(prior) = prior.filter(|p| p.is_object()) else {
        let changes = create_changes(schema, &planned);
        return PlanResult::with_changes(planned, changes, false);
    };

    let mut names: Vec<&String> = schema.block.attributes.keys().collect();
    names.sort();

    let mut changes = Vec::new();
    let mut requires_replace = false;

    for name in names {
        let attr = &schema.block.attributes[name];
        let before = prior.get(name);

        if !attr.flags.is_configurable() || (attr.flags.computed && !is_set(planned.get(name))) {
            if let (Some(value), Value::Object(map)) = (before, &mut planned) {
                map.insert(name.clone(), value.clone());
            }
            continue;
        }

        let after = planned.get(name);
        let attr_changes = match &attr.attr_type {
            AttributeType::Map(_) => map_changes(name, before, after, suppressed),
            AttributeType::Set(_) => scalar_change(name, before, after, set_equal),
            _ => scalar_change(name, before, after, |a, b| a == b),
        };
        if !attr_changes.is_empty() && attr.force_new {
            requires_replace = true;
        }
        changes.extend(attr_changes);
    }

    let mut blocks: Vec<&String> = schema.block.blocks.keys().collect();
    blocks.sort();
    for name in blocks {
        let block = &schema.block.blocks[name];
        let equal: fn(&Value, &Value) -> bool = match block.nesting_mode {
            BlockNestingMode::Set => set_equal,
            _ => |a, b| a == b,
        };
        let block_changes = scalar_change(name, prior.get(name), planned.get(name), equal);
        if !block_changes.is_empty() && block.force_new {
            requires_replace = true;
        }
        changes.extend(block_changes);
    }

    if requires_replace {
        // Computed values belong to the instance being replaced.
        if let Value::Object(map) = &mut planned {
            for (name, attr) in &schema.block.attributes {
                if attr.flags.computed && !attr.flags.is_configurable() {
                    map.remove(name);
                }
            }
        }
    }

    if changes.is_empty() {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, changes, requires_replace)
    }
}

fn create_changes(schema: &Schema, planned: &Value) -> Vec<AttributeChange> {
    let mut changes: Vec<AttributeChange> = schema
        .block
        .attributes
        .iter()
        .filter(|(_, attr)| attr.flags.is_configurable())
        .filter_map(|(name, _)| {
            let value = planned.get(name)?;
            is_set(Some(value)).then(|| AttributeChange::added(name.clone(), value.clone()))
        })
        .collect();
    for name in schema.block.blocks.keys() {
        if let Some(value) = planned.get(name).filter(|v| is_set(Some(v))) {
            changes.push(AttributeChange::added(name.clone(), value.clone()));
        }
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn scalar_change(
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    equal: fn(&Value, &Value) -> bool,
) -> Vec<AttributeChange> {
    match (is_set(before), is_set(after), before, after) {
        (false, false, _, _) => vec![],
        (true, false, Some(b), _) => vec![AttributeChange::removed(path, b.clone())],
        (false, true, _, Some(a)) => vec![AttributeChange::added(path, a.clone())],
        (true, true, Some(b), Some(a)) if !equal(b, a) => {
            vec![AttributeChange::modified(path, b.clone(), a.clone())]
        }
        _ => vec![],
    }
}

fn map_changes(
    name: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    suppressed: &[&str],
) -> Vec<AttributeChange> {
    let empty = Map::new();
    let before = before.and_then(Value::as_object).unwrap_or(&empty);
    let after = after.and_then(Value::as_object).unwrap_or(&empty);

    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let path = format!("{}.{}", name, key);
            if suppressed.contains(&path.as_str()) {
                return None;
            }
            scalar_change(&path, before.get(key), after.get(key), |a, b| a == b)
                .into_iter()
                .next()
        })
        .collect()
}

fn set_equal(a: &Value, b: &Value) -> bool {
    match (a.as_array(), b.as_array()) {
        (Some(a), Some(b)) => sorted_members(a) == sorted_members(b),
        _ => a == b,
    }
}

fn sorted_members(items: &[Value]) -> Vec<String> {
    let mut members: Vec<String> = items.iter().map(Value::to_string).collect();
    members.sort();
    members.dedup();
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "instance_type",
                Attribute::optional_string()
                    .with_default(json!("m5.large"))
                    .with_force_new(),
            )
            .with_attribute("protect", Attribute::optional_bool().with_default(json!(false)))
            .with_attribute("security_groups", Attribute::optional_string_set())
            .with_attribute(
                "tags",
                Attribute::optional_string_map().with_default(json!({"billing": ""})),
            )
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("subnet", Attribute::optional_computed_string())
    }

    #[test]
    fn test_apply_defaults() {
        let value = apply_defaults(&schema(), json!({"name": "host-1", "protect": null}));
        assert_eq!(value["instance_type"], "m5.large");
        assert_eq!(value["protect"], false);
        assert_eq!(value["tags"], json!({"billing": ""}));
        assert_eq!(value["name"], "host-1");
    }

    #[test]
    fn test_plan_create() {
        let result = plan_resource(&schema(), None, json!({"name": "host-1"}), &[]);
        assert!(!result.requires_replace);
        let paths: Vec<&str> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert!(paths.contains(&"name"));
        assert!(paths.contains(&"instance_type"));
        assert!(!paths.contains(&"id"));
    }

    #[test]
    fn test_plan_no_change_carries_computed() {
        let prior = json!({
            "id": "i-1",
            "name": "host-1",
            "instance_type": "m5.large",
            "protect": false,
            "security_groups": ["a", "b"],
            "tags": {"billing": "acme"},
            "subnet": "subnet-9"
        });
        let proposed = json!({
            "name": "host-1",
            "security_groups": ["b", "a"],
            "tags": {"billing": ""}
        });

        let result = plan_resource(&schema(), Some(&prior), proposed, &["tags.billing"]);
        assert!(result.changes.is_empty(), "{:?}", result.changes);
        assert_eq!(result.planned_state["id"], "i-1");
        assert_eq!(result.planned_state["subnet"], "subnet-9");
    }

    #[test]
    fn test_plan_in_place_update() {
        let prior = json!({"id": "i-1", "name": "host-1", "instance_type": "m5.large", "protect": false, "tags": {"env": "dev"}});
        let proposed = json!({"name": "host-1", "protect": true, "tags": {"env": "prod", "team": "core"}});

        let result = plan_resource(&schema(), Some(&prior), proposed, &["tags.billing"]);
        assert!(!result.requires_replace);
        let paths: Vec<&str> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["protect", "tags.env", "tags.team"]);
        assert_eq!(result.planned_state["id"], "i-1");
    }

    #[test]
    fn test_plan_force_new() {
        let prior = json!({"id": "i-1", "name": "host-1", "instance_type": "m5.large"});
        let proposed = json!({"name": "host-1", "instance_type": "m5.xlarge"});

        let result = plan_resource(&schema(), Some(&prior), proposed, &[]);
        assert!(result.requires_replace);
        assert!(result.planned_state.get("id").is_none());
    }
}
