//! Authentication module for managing the signed-in session.
//!
//! This module provides:
//! - `SessionContext`: the in-memory session mirrored into a `CredentialStore`
//! - `RefreshCoordinator`: single-flight gate for access-token refresh
//! - `AuthProvider`: login, registration, logout and profile selection
//!
//! Sessions are restored from the store at startup and stay valid until the
//! server rejects a refresh or the user signs out.

pub mod provider;
pub mod refresh;
pub mod session;

pub use provider::AuthProvider;
pub use session::{AuthState, Session, SessionContext};
