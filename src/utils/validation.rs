use anyhow::{anyhow, Result};

const MAX_PLACE_NAME_CHARS: usize = 100;

/// Validates a city or country name entered during registration and
/// returns it trimmed.
pub fn validate_place_name(field: &str, value: &str) -> Result<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(anyhow!("{field} cannot be empty"));
    }

    if value.chars().count() > MAX_PLACE_NAME_CHARS {
        return Err(anyhow!(
            "{field} cannot be longer than {MAX_PLACE_NAME_CHARS} characters"
        ));
    }

    if value.contains('\n') || value.contains('\r') {
        return Err(anyhow!("{field} cannot contain line breaks"));
    }

    if value.starts_with('/') {
        return Err(anyhow!("{field} cannot start with '/'"));
    }

    if !value.chars().any(char::is_alphabetic) {
        return Err(anyhow!("{field} must contain at least one letter"));
    }

    Ok(value.to_string())
}
