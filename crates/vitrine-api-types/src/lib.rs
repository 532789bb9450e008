//! Request and response shapes of the catalog REST API.
//!
//! The remote service speaks camelCase JSON. Fields the client never relies on
//! are defaulted so that partial payloads still decode.

use serde::{Deserialize, Serialize};

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A catalog product as returned by list, search and detail endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Body of `POST /products`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreateRequest {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category_id: String,
    pub images: Vec<String>,
}

/// Body of `PUT /products/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdateRequest {
    pub name: String,
    pub description: String,
}

/// Body of `POST /auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub email: String,
}

/// Response of `POST /auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Response of `DELETE /products/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub success: bool,
}

/// Error body returned on non-2xx responses.
///
/// The service nests the message under `data`; some proxies return it at the
/// top level, so both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub data: Option<ErrorBody>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorEnvelope {
    /// The message to surface, preferring the nested `data.message`.
    pub fn message(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.message.as_deref())
            .or(self.message.as_deref())
            .filter(|message| !message.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_decodes_with_missing_optional_fields() {
        let product: Product =
            serde_json::from_str(r#"{"id":"p1","name":"Lamp","price":12.5}"#).expect("product");
        assert_eq!(product.id, "p1");
        assert!(product.images.is_empty());
        assert!(product.category.is_none());
    }

    #[test]
    fn create_request_serializes_camel_case() {
        let request = ProductCreateRequest {
            name: "Lamp".into(),
            description: "Warm light".into(),
            price: 10.0,
            category_id: "c1".into(),
            images: vec!["https://img/1.png".into()],
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["categoryId"], "c1");
        assert!(value.get("category_id").is_none());
    }

    #[test]
    fn error_envelope_prefers_nested_message() {
        let envelope: ErrorEnvelope =
            serde_json::from_str(r#"{"data":{"message":"Product not found"},"message":"outer"}"#)
                .expect("envelope");
        assert_eq!(envelope.message(), Some("Product not found"));

        let flat: ErrorEnvelope =
            serde_json::from_str(r#"{"message":"Unauthorized"}"#).expect("flat envelope");
        assert_eq!(flat.message(), Some("Unauthorized"));

        let empty: ErrorEnvelope = serde_json::from_str(r#"{"data":{}}"#).expect("empty");
        assert_eq!(empty.message(), None);
    }
}
