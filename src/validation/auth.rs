use crate::error::{AppError, Result};

/// Largest credential the server will attempt to verify, in bytes.
pub const MAX_CREDENTIAL_LEN: usize = 8192;

/// Validates the shape of a bearer credential before any verification.
///
/// # Arguments
///
/// * `credential` - The raw credential string.
///
/// # Returns
///
/// A `Result<()>` indicating whether the credential is worth verifying.
pub fn validate_credential(credential: &str) -> Result<()> {
    if credential.is_empty() {
        return Err(AppError::BadCredential("Credential is required".to_string()));
    }

    if credential.len() > MAX_CREDENTIAL_LEN {
        return Err(AppError::BadCredential(format!(
            "Credential must be at most {} bytes",
            MAX_CREDENTIAL_LEN
        )));
    }

    if credential.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AppError::BadCredential(
            "Credential contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
