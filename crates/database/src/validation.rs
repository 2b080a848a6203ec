//! Input validation for user-supplied fields.

use std::fmt;

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Value too long.
    TooLong { field: String, max: usize, actual: usize },
    /// Empty value where one is required.
    Empty(String),
    /// Value contains characters that are not allowed.
    InvalidCharacters(String),
    /// Malformed URL.
    InvalidUrl(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooLong { field, max, actual } => {
                write!(f, "{} is too long ({} chars, max {})", field, actual, max)
            }
            ValidationError::Empty(field) => write!(f, "{} cannot be empty", field),
            ValidationError::InvalidCharacters(field) => {
                write!(f, "{} contains control characters", field)
            }
            ValidationError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Maximum allowed length for wallet names.
pub const MAX_WALLET_NAME_LENGTH: usize = 64;

/// Maximum allowed length for invoice memos.
pub const MAX_MEMO_LENGTH: usize = 639;

/// Maximum allowed length for app URLs.
pub const MAX_APP_URL_LENGTH: usize = 2048;

/// Validate and normalize a wallet name. Returns the trimmed name.
pub fn validate_wallet_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Empty("wallet name".to_string()));
    }

    let chars = name.chars().count();
    if chars > MAX_WALLET_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: "wallet name".to_string(),
            max: MAX_WALLET_NAME_LENGTH,
            actual: chars,
        });
    }

    if name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidCharacters("wallet name".to_string()));
    }

    Ok(name.to_string())
}

/// Validate an invoice memo. Empty memos are allowed.
///
/// The limit keeps the memo inside a single bolt11 description field.
pub fn validate_memo(memo: &str) -> Result<(), ValidationError> {
    let chars = memo.chars().count();
    if chars > MAX_MEMO_LENGTH {
        return Err(ValidationError::TooLong {
            field: "memo".to_string(),
            max: MAX_MEMO_LENGTH,
            actual: chars,
        });
    }
    Ok(())
}

/// Validate an app URL (basic scheme/host check).
pub fn validate_app_url(url: &str) -> Result<String, ValidationError> {
    let url = url.trim();

    if url.is_empty() {
        return Err(ValidationError::Empty("app url".to_string()));
    }

    if url.len() > MAX_APP_URL_LENGTH {
        return Err(ValidationError::TooLong {
            field: "app url".to_string(),
            max: MAX_APP_URL_LENGTH,
            actual: url.len(),
        });
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ValidationError::InvalidUrl("must start with http:// or https://".to_string()))?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(ValidationError::InvalidUrl("missing host".to_string()));
    }

    if url.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::InvalidUrl("contains whitespace".to_string()));
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_name_trimmed() {
        assert_eq!(validate_wallet_name("  Savings ").unwrap(), "Savings");
    }

    #[test]
    fn test_wallet_name_invalid() {
        assert_eq!(
            validate_wallet_name("   "),
            Err(ValidationError::Empty("wallet name".to_string()))
        );
        assert!(matches!(
            validate_wallet_name(&"x".repeat(65)),
            Err(ValidationError::TooLong { actual: 65, .. })
        ));
        assert!(validate_wallet_name("bad\nname").is_err());
    }

    #[test]
    fn test_memo_length() {
        assert!(validate_memo("").is_ok());
        assert!(validate_memo(&"m".repeat(MAX_MEMO_LENGTH)).is_ok());
        assert!(validate_memo(&"m".repeat(MAX_MEMO_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_app_url() {
        assert_eq!(
            validate_app_url(" https://apps.example.com/tpos ").unwrap(),
            "https://apps.example.com/tpos"
        );
        assert!(validate_app_url("ftp://example.com").is_err());
        assert!(validate_app_url("https://").is_err());
        assert!(validate_app_url("https://exa mple.com").is_err());
    }
}
