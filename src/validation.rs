//! Request validation. Every check runs; failures are reported together.

use lazy_static::lazy_static;
use regex::Regex;
use time::{macros::format_description, Date, OffsetDateTime};

use crate::error::{AppError, FieldError};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[1-9]\d{0,15}$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accumulates field errors for one request.
#[derive(Debug, Default)]
pub struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Required name field; returns the trimmed value.
    pub fn name(&mut self, field: &'static str, label: &str, value: &str) -> String {
        let v = value.trim();
        if v.is_empty() {
            self.fail(field, format!("{label} is required"));
        } else if !(2..=50).contains(&v.chars().count()) {
            self.fail(field, format!("{label} must be between 2 and 50 characters"));
        }
        v.to_owned()
    }

    pub fn email(&mut self, value: &str) -> String {
        let email = normalize_email(value);
        if !is_valid_email(&email) {
            self.fail("email", "Valid email is required");
        }
        email
    }

    pub fn new_password(&mut self, value: &str) {
        if value.chars().count() < 6 {
            self.fail("password", "Password must be at least 6 characters long");
        }
        let lower = value.chars().any(|c| c.is_ascii_lowercase());
        let upper = value.chars().any(|c| c.is_ascii_uppercase());
        let digit = value.chars().any(|c| c.is_ascii_digit());
        if !(lower && upper && digit) {
            self.fail(
                "password",
                "Password must contain at least one lowercase letter, one uppercase letter, and one number",
            );
        }
    }

    pub fn phone(&mut self, value: Option<&str>) -> Option<String> {
        let v = value?.trim();
        if !PHONE_RE.is_match(v) {
            self.fail("phone", "Invalid phone number format");
        }
        Some(v.to_owned())
    }

    /// ISO `YYYY-MM-DD`; with `check_age` the holder must be 13 to 120 years old.
    pub fn date_of_birth(&mut self, value: Option<&str>, check_age: bool) -> Option<Date> {
        let v = value?.trim();
        let Ok(date) = Date::parse(v, format_description!("[year]-[month]-[day]")) else {
            self.fail("dateOfBirth", "Invalid date format");
            return None;
        };
        if check_age {
            let age = OffsetDateTime::now_utc().year() - date.year();
            if !(13..=120).contains(&age) {
                self.fail("dateOfBirth", "Age must be between 13 and 120 years");
            }
        }
        Some(date)
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}
