//! Core library for presente: API client, session handling, credential
//! storage and data models shared by the command line client.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;
pub mod utils;
pub mod validation;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthProvider, AuthState, SessionContext};
pub use config::Config;
pub use storage::{CredentialStore, StorageBackend, StoreError};
