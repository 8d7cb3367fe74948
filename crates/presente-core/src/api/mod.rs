//! REST API client module for the Presente backend.
//!
//! This module provides the `ApiClient` for signing in and fetching the
//! students, subjects and classes linked to an account.
//!
//! The API uses JWT bearer tokens. Expired access tokens are refreshed
//! transparently and the rejected request is replayed.

pub mod client;
pub mod error;

pub use client::{ApiClient, DEFAULT_API_URL};
pub use error::{ApiError, EXPIRED_TOKEN_DETAIL};
