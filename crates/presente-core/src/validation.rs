//! Client-side checks for the login and signup forms, run before anything
//! is sent to the server.

use std::fmt;

use thiserror::Error;

use crate::models::SignupRequest;
use crate::utils::parse_query_date;

pub const REQUIRED: &str = "Required";
pub const INVALID_EMAIL: &str = "Invalid email";
pub const INVALID_DATE: &str = "Invalid date (expected YYYY-MM-DD)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found in a form, in field order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", summary(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationErrors {
    /// Message for `field`, if it failed
    pub fn get(&self, field: &str) -> Option<&'static str> {
        self.0.iter().find(|e| e.field == field).map(|e| e.message)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Default)]
struct Checker(Vec<FieldError>);

impl Checker {
    fn fail(&mut self, field: &'static str, message: &'static str) {
        self.0.push(FieldError { field, message });
    }

    /// Returns false when the field was missing
    fn required(&mut self, field: &'static str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.fail(field, REQUIRED);
            false
        } else {
            true
        }
    }

    fn email(&mut self, field: &'static str, value: &str) {
        if self.required(field, value) && !is_email(value.trim()) {
            self.fail(field, INVALID_EMAIL);
        }
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.0))
        }
    }
}

/// Loose address check: one `@`, a non-empty local part and a dotted domain.
pub fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
            .unwrap_or(false)
}

pub fn validate_login(email: &str, password: &str) -> Result<(), ValidationErrors> {
    let mut check = Checker::default();
    check.email("email", email);
    check.required("password", password);
    check.finish()
}

pub fn validate_signup(signup: &SignupRequest) -> Result<(), ValidationErrors> {
    let mut check = Checker::default();
    check.required("password", &signup.password);
    check.email("email", &signup.email);
    if check.required("date_of_birth", &signup.date_of_birth)
        && parse_query_date(signup.date_of_birth.trim()).is_none()
    {
        check.fail("date_of_birth", INVALID_DATE);
    }
    check.required("user_type", &signup.user_type);
    check.required("firstname", &signup.firstname);
    check.required("lastname", &signup.lastname);
    check.required("gender", &signup.gender);
    check.required("phone_number", &signup.phone_number);
    check.required("document_type", &signup.document_type);
    check.required("document_number", &signup.document_number);
    check.finish()
}
