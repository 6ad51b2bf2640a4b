//! Typed property application.
//!
//! Binding values are plain JSON. How a value lands on an element depends on
//! the property it is bound to:
//!
//! | property              | accepted value                                   |
//! |-----------------------|--------------------------------------------------|
//! | `text`, `textContent` | scalar; `null` clears                            |
//! | `style`, `dataset`    | object, shallow-merged; `null` entries remove    |
//! | `classList`           | `{add, remove, toggle, replace}` directives      |
//! | `className`           | whitespace-separated string; `null` clears       |
//! | `id`                  | string; `null` removes                           |
//! | boolean properties    | `true`/`false` only                              |
//! | anything else         | assigned as is; `null` removes                   |

use serde_json::{Map, Value};

use super::Element;
use crate::error::ReactiveError;

/// Properties that only accept booleans.
pub const BOOLEAN_PROPERTIES: &[&str] = &["hidden", "disabled", "checked", "readOnly", "required"];

fn reject(property: &str, reason: impl Into<String>) -> ReactiveError {
    ReactiveError::ApplyValue {
        property: property.to_owned(),
        reason: reason.into(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Write `value` into `property` of `element`.
pub fn apply_value(element: &Element, property: &str, value: &Value) -> Result<(), ReactiveError> {
    match property {
        "text" | "textContent" => {
            let text = scalar_text(value).ok_or_else(|| reject(property, "expected a scalar"))?;
            element.set_text(&text);
        }
        "style" => merge(property, value, |key, v| element.set_style(key, v))?,
        "dataset" => merge(property, value, |key, v| element.set_data(key, v))?,
        "classList" => class_directives(element, value)?,
        "className" => match value {
            Value::String(names) => element.set_class_name(names),
            Value::Null => element.set_class_name(""),
            _ => return Err(reject(property, "expected a string")),
        },
        "id" => match value {
            Value::String(id) => element.set_id(Some(id)),
            Value::Null => element.set_id(None),
            _ => return Err(reject(property, "expected a string")),
        },
        _ if BOOLEAN_PROPERTIES.contains(&property) => match value {
            Value::Bool(_) => element.set_property(property, value.clone()),
            other => return Err(reject(property, format!("expected a boolean, got {other}"))),
        },
        _ => match value {
            Value::Null => element.remove_property(property),
            other => element.set_property(property, other.clone()),
        },
    }
    element.record_write();
    Ok(())
}

fn merge(
    property: &str,
    value: &Value,
    mut set: impl FnMut(&str, Option<&str>),
) -> Result<(), ReactiveError> {
    let Value::Object(entries) = value else {
        return Err(reject(property, "expected an object"));
    };
    // Validate first so a bad entry leaves the element untouched.
    let mut updates = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        let text = match entry {
            Value::Null => None,
            other => Some(
                scalar_text(other).ok_or_else(|| reject(property, format!("`{key}` is not a scalar")))?,
            ),
        };
        updates.push((key.as_str(), text));
    }
    for (key, text) in updates {
        set(key, text.as_deref());
    }
    Ok(())
}

fn class_names(value: &Value) -> Result<Vec<String>, ReactiveError> {
    match value {
        Value::String(name) => Ok(name.split_whitespace().map(str::to_owned).collect()),
        Value::Array(names) => names
            .iter()
            .map(|name| {
                name.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| reject("classList", "class names must be strings"))
            })
            .collect(),
        _ => Err(reject("classList", "expected a class name or a list of them")),
    }
}

fn class_directives(element: &Element, value: &Value) -> Result<(), ReactiveError> {
    let Value::Object(directives) = value else {
        return Err(reject("classList", "expected an object of directives"));
    };
    let plan = ClassPlan::parse(directives)?;
    for name in &plan.remove {
        element.remove_class(name);
    }
    for name in &plan.add {
        element.add_class(name);
    }
    for name in &plan.toggle {
        element.toggle_class(name);
    }
    for (old, new) in &plan.replace {
        element.replace_class(old, new);
    }
    Ok(())
}

#[derive(Default)]
struct ClassPlan {
    add: Vec<String>,
    remove: Vec<String>,
    toggle: Vec<String>,
    replace: Vec<(String, String)>,
}

impl ClassPlan {
    fn parse(directives: &Map<String, Value>) -> Result<Self, ReactiveError> {
        let mut plan = ClassPlan::default();
        for (directive, value) in directives {
            match directive.as_str() {
                "add" => plan.add = class_names(value)?,
                "remove" => plan.remove = class_names(value)?,
                "toggle" => plan.toggle = class_names(value)?,
                "replace" => plan.replace = Self::pairs(value)?,
                other => return Err(reject("classList", format!("unknown directive `{other}`"))),
            }
        }
        Ok(plan)
    }

    /// `["old", "new"]`, `[["a", "b"], ...]` or `{"old": "new"}`.
    fn pairs(value: &Value) -> Result<Vec<(String, String)>, ReactiveError> {
        let pair = |v: &Value| match v {
            Value::Array(items) => match items.as_slice() {
                [Value::String(old), Value::String(new)] => Ok((old.clone(), new.clone())),
                _ => Err(reject("classList", "replace expects [old, new]")),
            },
            _ => Err(reject("classList", "replace expects [old, new]")),
        };
        match value {
            Value::Array(items) if items.iter().all(Value::is_array) => items.iter().map(pair).collect(),
            Value::Array(_) => Ok(vec![pair(value)?]),
            Value::Object(map) => map
                .iter()
                .map(|(old, new)| match new {
                    Value::String(new) => Ok((old.clone(), new.clone())),
                    _ => Err(reject("classList", "replace expects string targets")),
                })
                .collect(),
            _ => Err(reject("classList", "replace expects [old, new]")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use serde_json::json;

    fn element() -> Element {
        Document::new().create_element("div")
    }

    #[test]
    fn text_accepts_scalars_and_null_clears() {
        let el = element();
        apply_value(&el, "text", &json!(3)).unwrap();
        assert_eq!(el.text(), "3");
        apply_value(&el, "textContent", &Value::Null).unwrap();
        assert_eq!(el.text(), "");
        assert!(apply_value(&el, "text", &json!({"a": 1})).is_err());
        assert_eq!(el.write_count(), 2);
    }

    #[test]
    fn style_and_dataset_merge() {
        let el = element();
        apply_value(&el, "style", &json!({"color": "red", "width": 10})).unwrap();
        apply_value(&el, "style", &json!({"width": null, "margin": "0"})).unwrap();
        assert_eq!(el.style("color").as_deref(), Some("red"));
        assert_eq!(el.style("width"), None);
        assert_eq!(el.style("margin").as_deref(), Some("0"));

        apply_value(&el, "dataset", &json!({"id": 7})).unwrap();
        assert_eq!(el.data("id").as_deref(), Some("7"));

        let err = apply_value(&el, "style", &json!({"bad": [1], "color": "blue"})).unwrap_err();
        assert!(matches!(err, ReactiveError::ApplyValue { .. }));
        assert_eq!(el.style("color").as_deref(), Some("red"));
    }

    #[test]
    fn class_list_directives() {
        let el = element();
        el.set_class_name("a b");
        apply_value(
            &el,
            "classList",
            &json!({"add": ["c", "d"], "remove": "a", "toggle": "b", "replace": ["c", "e"]}),
        )
        .unwrap();
        assert_eq!(el.class_list(), vec!["e", "d"]);

        apply_value(&el, "classList", &json!({"replace": {"d": "f"}})).unwrap();
        assert!(el.has_class("f"));
        assert!(apply_value(&el, "classList", &json!({"explode": "x"})).is_err());
        assert!(apply_value(&el, "classList", &json!("a")).is_err());
    }

    #[test]
    fn boolean_properties_require_booleans() {
        let el = element();
        apply_value(&el, "disabled", &json!(true)).unwrap();
        assert_eq!(el.property("disabled"), Some(json!(true)));
        assert!(apply_value(&el, "hidden", &json!("yes")).is_err());
    }

    #[test]
    fn other_properties_are_assigned_and_null_removes() {
        let el = element();
        apply_value(&el, "value", &json!("hello")).unwrap();
        assert_eq!(el.property("value"), Some(json!("hello")));
        apply_value(&el, "value", &Value::Null).unwrap();
        assert_eq!(el.property("value"), None);

        apply_value(&el, "id", &json!("main")).unwrap();
        assert_eq!(el.id().as_deref(), Some("main"));
        assert!(apply_value(&el, "id", &json!(1)).is_err());
    }
}
