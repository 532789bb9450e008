//! Optimistic payload transformations for product mutations.
//!
//! Each function builds a pure transformation over a cached JSON payload.
//! Payloads of an unexpected shape are returned unchanged.

use serde_json::Value;
use uuid::Uuid;
use vitrine_api_types::{Product, ProductCreateRequest};

/// Prefix of ids given to products that exist only optimistically.
pub const PLACEHOLDER_ID_PREFIX: &str = "optimistic-";

/// Product shown until the server confirms a create.
pub fn placeholder_product(request: &ProductCreateRequest) -> Product {
    Product {
        id: format!("{PLACEHOLDER_ID_PREFIX}{}", Uuid::new_v4()),
        name: request.name.clone(),
        slug: String::new(),
        description: request.description.clone(),
        price: request.price,
        images: request.images.clone(),
        category: None,
        created_at: None,
    }
}

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_ID_PREFIX)
}

/// Append `item` to a product array.
pub fn append_product(item: Value) -> impl Fn(&Value) -> Value + Send + Sync + 'static {
    move |data| match data {
        Value::Array(items) => {
            let mut items = items.clone();
            items.push(item.clone());
            Value::Array(items)
        }
        other => other.clone(),
    }
}

/// Drop the product with `id` from a product array.
pub fn remove_product(id: String) -> impl Fn(&Value) -> Value + Send + Sync + 'static {
    move |data| match data {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| !has_id(item, &id))
                .cloned()
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Replace name and description of the product with `id`, whether the payload
/// is a product array or a single product.
pub fn rename_product(
    id: String,
    name: String,
    description: String,
) -> impl Fn(&Value) -> Value + Send + Sync + 'static {
    move |data| {
        let rename = |item: &Value| {
            let mut item = item.clone();
            if has_id(&item, &id)
                && let Value::Object(fields) = &mut item
            {
                fields.insert("name".into(), Value::String(name.clone()));
                fields.insert("description".into(), Value::String(description.clone()));
            }
            item
        };
        match data {
            Value::Array(items) => Value::Array(items.iter().map(rename).collect()),
            other => rename(other),
        }
    }
}

fn has_id(item: &Value, id: &str) -> bool {
    match item.get("id") {
        Some(Value::String(value)) => value == id,
        Some(Value::Number(value)) => value.to_string() == id,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn append_only_touches_arrays() {
        let patch = append_product(json!({"id": "x"}));
        assert_eq!(patch(&json!([{"id": "1"}])), json!([{"id": "1"}, {"id": "x"}]));
        assert_eq!(patch(&json!({"id": "1"})), json!({"id": "1"}));
    }

    #[test]
    fn remove_matches_string_and_numeric_ids() {
        let patch = remove_product("5".into());
        assert_eq!(
            patch(&json!([{"id": "4"}, {"id": "5"}, {"id": 5}])),
            json!([{"id": "4"}])
        );
    }

    #[test]
    fn rename_updates_lists_and_detail() {
        let patch = rename_product("5".into(), "Lamp".into(), "Bright".into());
        assert_eq!(
            patch(&json!([{"id": "5", "name": "Old", "price": 3}, {"id": "6", "name": "Other"}])),
            json!([
                {"id": "5", "name": "Lamp", "description": "Bright", "price": 3},
                {"id": "6", "name": "Other"}
            ])
        );
        assert_eq!(
            patch(&json!({"id": "5", "name": "Old"})),
            json!({"id": "5", "name": "Lamp", "description": "Bright"})
        );
    }

    #[test]
    fn placeholder_ids_are_recognisable() {
        let request = ProductCreateRequest {
            name: "Lamp".into(),
            description: String::new(),
            price: 10.0,
            category_id: "1".into(),
            images: vec![],
        };
        let product = placeholder_product(&request);
        assert!(is_placeholder(&product.id));
        assert!(!is_placeholder("42"));
    }
}
