// src/validation.rs
//
// Field checks shared by the request DTOs. Each returns the cleaned value
// or a VALIDATION_ERROR naming the field.

use chrono::NaiveDate;

use crate::error::ApiError;

pub fn required_text(field: &str, value: &str, min: usize, max: usize) -> Result<String, ApiError> {
    let v = value.trim();
    let n = v.chars().count();
    if n < min || n > max {
        return Err(ApiError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(v.to_string())
}

/// Blank strings collapse to `None`.
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>, ApiError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(v) if v.chars().count() > max => Err(ApiError::validation(format!(
            "{field} must be at most {max} characters"
        ))),
        Some(v) => Ok(Some(v.to_string())),
    }
}

pub fn email(field: &str, value: &str) -> Result<String, ApiError> {
    let v = value.trim().to_ascii_lowercase();
    let ok = match v.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !v.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !ok {
        return Err(ApiError::validation(format!("{field} must be a valid email address")));
    }
    Ok(v)
}

pub fn optional_email(field: &str, value: Option<&str>) -> Result<Option<String>, ApiError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(v) => email(field, v).map(Some),
        None => Ok(None),
    }
}

/// `+` optional, then a non-zero digit and up to 15 more digits.
pub fn optional_phone(field: &str, value: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(v) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let digits = v.strip_prefix('+').unwrap_or(v);
    let ok = (1..=16).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0');
    if !ok {
        return Err(ApiError::validation(format!("{field} must be a valid phone number")));
    }
    Ok(Some(v.to_string()))
}

pub fn date(field: &str, value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{field} must be YYYY-MM-DD")))
}

pub fn optional_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(v) => date(field, v).map(Some),
        None => Ok(None),
    }
}

pub fn non_negative(field: &str, value: i64) -> Result<i64, ApiError> {
    if value < 0 {
        return Err(ApiError::validation(format!("{field} must be >= 0")));
    }
    Ok(value)
}

pub fn one_of<'a>(field: &str, value: &str, allowed: &[&'a str]) -> Result<&'a str, ApiError> {
    allowed
        .iter()
        .find(|a| **a == value)
        .copied()
        .ok_or_else(|| ApiError::validation(format!("{field} must be one of {}", allowed.join(", "))))
}

pub const GENDERS: &[&str] = &["male", "female", "other"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(required_text("first_name", "  Ana ", 2, 50).unwrap(), "Ana");
        assert!(required_text("first_name", " A ", 2, 50).is_err());
        assert!(required_text("first_name", &"x".repeat(51), 2, 50).is_err());

        assert_eq!(optional_text("notes", Some("   "), 10).unwrap(), None);
        assert!(optional_text("notes", Some("01234567890"), 10).is_err());
    }

    #[test]
    fn emails() {
        assert_eq!(email("email", " Jane@Example.COM ").unwrap(), "jane@example.com");
        for bad in ["jane", "@example.com", "jane@", "jane@example", "a@b@c.com", "ja ne@x.com", "j@.com"] {
            assert!(email("email", bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn phones() {
        assert_eq!(optional_phone("phone", Some("+923001234567")).unwrap().as_deref(), Some("+923001234567"));
        assert_eq!(optional_phone("phone", None).unwrap(), None);
        for bad in ["0300", "+", "12-34", "12345678901234567"] {
            assert!(optional_phone("phone", Some(bad)).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn enums_and_numbers() {
        assert_eq!(one_of("gender", "other", GENDERS).unwrap(), "other");
        assert!(one_of("gender", "Male", GENDERS).is_err());
        assert!(non_negative("amount", -1).is_err());
        assert_eq!(non_negative("amount", 0).unwrap(), 0);
    }

    #[test]
    fn dates() {
        assert_eq!(
            date("date_of_birth", "1990-07-01").unwrap(),
            NaiveDate::from_ymd_opt(1990, 7, 1).unwrap()
        );
        assert!(date("date_of_birth", "01/07/1990").is_err());
        assert_eq!(optional_date("date_to", Some("")).unwrap(), None);
    }
}
