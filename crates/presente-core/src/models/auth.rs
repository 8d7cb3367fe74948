use std::fmt;

use serde::{Deserialize, Serialize};

/// Access/refresh pair issued at login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Response from `POST /auth/login/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub tokens: TokenPair,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Response from `POST /auth/jwt/refresh/`
#[derive(Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
}

/// Account signup payload for `POST /auth/signup/`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SignupRequest {
    pub password: String,
    pub email: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    pub user_type: String,
    pub firstname: String,
    pub lastname: String,
    pub gender: String,
    pub phone_number: String,
    pub document_type: String,
    pub document_number: String,
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .field("date_of_birth", &self.date_of_birth)
            .field("user_type", &self.user_type)
            .field("firstname", &self.firstname)
            .field("lastname", &self.lastname)
            .field("gender", &self.gender)
            .field("phone_number", &self.phone_number)
            .field("document_type", &self.document_type)
            .field("document_number", &self.document_number)
            .finish()
    }
}
