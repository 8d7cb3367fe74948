//! Data models for Presente API entities.
//!
//! This module contains the data structures exchanged with the API:
//!
//! - `LoginResponse`, `TokenPair`, `SignupRequest`: account and token payloads
//! - `Profile`: a selectable student under the signed-in account
//! - `SubjectDetail`, `Teacher`, `ClassSession`: subject and class views

pub mod auth;
pub mod profile;
pub mod subject;

pub use auth::{LoginResponse, RefreshResponse, SignupRequest, TokenPair};
pub use profile::Profile;
pub use subject::{ClassSession, SubjectDetail, Teacher};

/// Lenient field decoders for values the API sends as either numbers or strings.
pub(crate) mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number, got {}",
                other
            ))),
        }
    }

    pub fn opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_u64().and_then(|v| u32::try_from(v).ok())),
            Some(Value::String(s)) => Ok(s.trim().parse().ok()),
            Some(_) => Ok(None),
        }
    }
}
