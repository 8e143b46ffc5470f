//! API handlers module

pub mod documents;
pub mod health;
pub mod query;

use docrag_common::errors::AppError;
use serde::Deserialize;
use validator::Validate;

/// `?user_id=` scope carried by read and delete endpoints
#[derive(Debug, Deserialize, Validate)]
pub struct OwnerQuery {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "user_id is required"))]
    pub user_id: String,
}

/// Run `validator` checks, reporting the first failing field
pub(crate) fn validate_request<T: Validate>(request: &T) -> Result<(), AppError> {
    request.validate().map_err(|errors| {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    })
}
