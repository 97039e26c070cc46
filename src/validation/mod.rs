use std::fmt;

pub const CURRENCY_CODE_LEN: usize = 3;
pub const COUNTRY_CODE_LEN: usize = 2;
pub const DESCRIPTION_MAX_LEN: usize = 500;
pub const REASON_MAX_LEN: usize = 500;
pub const EMAIL_MAX_LEN: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_whitespace() || !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new(
            "amount",
            "must be a positive number of minor units",
        ));
    }

    Ok(())
}

/// Normalizes an ISO 4217 code to the lowercase form the gateway expects.
pub fn normalize_currency(currency: &str) -> Result<String, ValidationError> {
    let currency = sanitize_string(currency);
    validate_required("currency", &currency)?;

    if currency.len() != CURRENCY_CODE_LEN || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ValidationError::new(
            "currency",
            format!("must be a {}-letter currency code", CURRENCY_CODE_LEN),
        ));
    }

    Ok(currency.to_ascii_lowercase())
}

/// Normalizes an ISO 3166 alpha-2 country to uppercase.
pub fn normalize_country(country: &str) -> Result<String, ValidationError> {
    let country = sanitize_string(country);

    if country.len() != COUNTRY_CODE_LEN || !country.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ValidationError::new(
            "country",
            format!("must be a {}-letter country code", COUNTRY_CODE_LEN),
        ));
    }

    Ok(country.to_ascii_uppercase())
}

pub fn validate_email(email: &str) -> ValidationResult {
    validate_required("email", email)?;
    validate_max_len("email", email, EMAIL_MAX_LEN)?;

    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();
    if local.is_empty()
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(ValidationError::new("email", "must be a valid email address"));
    }

    Ok(())
}

/// Trims free text, returning `None` for blank input.
pub fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<Option<String>, ValidationError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = sanitize_string(value);
    if value.is_empty() {
        return Ok(None);
    }
    validate_max_len(field, &value, max_len)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
        assert!(validate_max_len("field", "ééé", 3).is_ok());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
        assert_eq!(sanitize_string("late\ndelivery\r\nof files"), "late delivery of files");
    }

    #[test]
    fn validates_positive_amount() {
        assert!(validate_positive_amount(1).is_ok());
        assert!(validate_positive_amount(0).is_err());
        assert!(validate_positive_amount(-500).is_err());
    }

    #[test]
    fn normalizes_currency() {
        assert_eq!(normalize_currency(" USD ").unwrap(), "usd");
        assert_eq!(normalize_currency("eur").unwrap(), "eur");
        assert!(normalize_currency("US").is_err());
        assert!(normalize_currency("U5D").is_err());
        assert!(normalize_currency("").is_err());
    }

    #[test]
    fn normalizes_country() {
        assert_eq!(normalize_country("us").unwrap(), "US");
        assert!(normalize_country("USA").is_err());
    }

    #[test]
    fn validates_email() {
        assert!(validate_email("coach@example.com").is_ok());
        assert!(validate_email("coach@example").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("co ach@example.com").is_err());
    }

    #[test]
    fn optional_text_drops_blank_values() {
        assert_eq!(optional_text("reason", None, 10).unwrap(), None);
        assert_eq!(optional_text("reason", Some("   "), 10).unwrap(), None);
        assert_eq!(
            optional_text("reason", Some(" late  delivery "), 20).unwrap(),
            Some("late delivery".to_string())
        );
        assert_eq!(
            optional_text("reason", Some("work not\tdelivered\n"), 30).unwrap(),
            Some("work not delivered".to_string())
        );
        assert!(optional_text("reason", Some("far too long"), 3).is_err());
    }
}
