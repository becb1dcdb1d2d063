//! Request validation.

use crate::types::AttachedFile;
use crate::{Error, ErrorContext, Result};

/// Fail fast before any cache or backend interaction.
pub(crate) fn validate_request(prompt: &str, files: &[AttachedFile]) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(Error::validation_with_context(
            "prompt must be a non-empty string",
            ErrorContext::new()
                .with_field_path("request.prompt")
                .with_source("request_validator"),
        ));
    }

    for (index, file) in files.iter().enumerate() {
        if file.name.trim().is_empty() {
            return Err(Error::validation_with_context(
                "attached file is missing a name",
                ErrorContext::new()
                    .with_field_path(format!("request.files[{}].name", index))
                    .with_source("request_validator"),
            ));
        }
    }

    Ok(())
}
