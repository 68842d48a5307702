use crate::error::{AgriError, AgriResult};
use chrono::NaiveDate;

pub fn non_empty(label: &str, value: &str) -> AgriResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AgriError::Validation(format!("{} is required", label)));
    }
    Ok(trimmed.to_string())
}

/// Emails are compared case-insensitively, so they are stored lowercased.
pub fn normalize_email(email: &str) -> AgriResult<String> {
    let email = non_empty("Email", email)?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AgriError::Validation(format!("Invalid email address: {}", email))),
    }
}

pub fn positive(label: &str, value: f64) -> AgriResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AgriError::Validation(format!("{} must be positive", label)));
    }
    Ok(value)
}

pub fn non_negative(label: &str, value: f64) -> AgriResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(AgriError::Validation(format!("{} must not be negative", label)));
    }
    Ok(value)
}

pub fn latitude(value: f64) -> AgriResult<f64> {
    if !(-90.0..=90.0).contains(&value) {
        return Err(AgriError::Validation(format!("Latitude out of range: {}", value)));
    }
    Ok(value)
}

pub fn longitude(value: f64) -> AgriResult<f64> {
    if !(-180.0..=180.0).contains(&value) {
        return Err(AgriError::Validation(format!("Longitude out of range: {}", value)));
    }
    Ok(value)
}

pub fn parse_date(label: &str, value: &str) -> AgriResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| AgriError::Validation(format!("Invalid {} '{}': {}", label, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  F@X.com ").unwrap(), "f@x.com");
        assert!(normalize_email("").is_err());
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@x.com").is_err());
    }

    #[test]
    fn test_numeric_bounds() {
        assert!(positive("Area", 25.5).is_ok());
        assert!(positive("Area", 0.0).is_err());
        assert!(positive("Area", f64::NAN).is_err());
        assert!(non_negative("Hourly rate", 0.0).is_ok());
        assert!(non_negative("Hourly rate", -1.0).is_err());
        assert!(latitude(90.0).is_ok());
        assert!(latitude(90.5).is_err());
        assert!(longitude(-180.0).is_ok());
        assert!(longitude(181.0).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("scheduled date", "2025-06-01").unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
        );
        assert!(parse_date("scheduled date", "2025-13-01").is_err());
        assert!(parse_date("scheduled date", "06/01/2025").is_err());
        assert!(parse_date("scheduled date", "").is_err());
    }
}
