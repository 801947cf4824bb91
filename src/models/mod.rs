//! Data models for the TUTasksy application.
//!
//! Field names serialize in camelCase to match the mobile client's documents.

mod chat;
mod comment;
mod profile;
mod report;
mod revision;
mod task;

pub use chat::*;
pub use comment::*;
pub use profile::*;
pub use report::*;
pub use revision::*;
pub use task::*;

use crate::errors::AppError;

/// Check that an image reference is an absolute http(s) download URL.
pub fn validate_image_url(raw: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| AppError::Validation(format!("Invalid image URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AppError::Validation(format!(
            "Image URL scheme must be http or https, got {}",
            other
        ))),
    }
}

/// Reject blank values for a required text field.
pub fn require_text(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}
