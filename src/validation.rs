//! Input validation shared by the HTTP handlers and the services.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

static MOBILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+98|0)9\d{9}$").expect("mobile pattern is valid"));

/// Mobile numbers are the wallet's alternate key, so the format is strict.
pub fn validate_mobile(mobile: &str) -> Result<(), AppError> {
    if MOBILE_PATTERN.is_match(mobile) {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid mobile number: {mobile}")))
    }
}

pub fn validate_positive_amount(amount: i64) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    Ok(())
}
