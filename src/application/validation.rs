//! Input validation run before a mutation reaches the cache.

use thiserror::Error;
use vitrine_api_types::{ProductCreateRequest, ProductUpdateRequest};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Form-level checks supplied by the presentation layer.
pub trait Validator: Send + Sync {
    fn validate_sign_in(&self, email: &str) -> Result<(), ValidationError>;
    fn validate_create(&self, request: &ProductCreateRequest) -> Result<(), ValidationError>;
    fn validate_update(&self, request: &ProductUpdateRequest) -> Result<(), ValidationError>;
}

/// Rejects submissions with missing required fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFields;

impl Validator for RequiredFields {
    fn validate_sign_in(&self, email: &str) -> Result<(), ValidationError> {
        if email.trim().is_empty() {
            return Err(ValidationError::new("email", "Email is required"));
        }
        Ok(())
    }

    fn validate_create(&self, request: &ProductCreateRequest) -> Result<(), ValidationError> {
        if request.name.trim().is_empty() {
            return Err(ValidationError::new("name", "Name is required"));
        }
        if !(request.price.is_finite() && request.price > 0.0) {
            return Err(ValidationError::new("price", "Price must be a positive number"));
        }
        if request.category_id.trim().is_empty() {
            return Err(ValidationError::new("categoryId", "Category is required"));
        }
        Ok(())
    }

    fn validate_update(&self, request: &ProductUpdateRequest) -> Result<(), ValidationError> {
        if request.name.trim().is_empty() || request.description.trim().is_empty() {
            return Err(ValidationError::new(
                "name",
                "Name and description are required",
            ));
        }
        Ok(())
    }
}
