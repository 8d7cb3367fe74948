use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::models::{LoginResponse, Profile};
use crate::storage::{keys, CredentialStore, StoreError};

/// In-memory session.
///
/// `authenticated` is `None` until the persisted session has been restored.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub authenticated: Option<bool>,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

impl Session {
    fn signed_out() -> Self {
        Self {
            authenticated: Some(false),
            ..Self::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated == Some(true)
    }

    /// Value of the `Authorization` header requests carry
    pub fn authorization(&self) -> Option<String> {
        self.access_token.as_ref().map(|t| format!("Bearer {}", t))
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            token: self.access_token.clone(),
            authenticated: self.authenticated,
            display_name: self.display_name.clone(),
            role: self.role.clone(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("authenticated", &self.authenticated)
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .finish()
    }
}

/// What screens read about the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthState {
    pub token: Option<String>,
    pub authenticated: Option<bool>,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

/// Shared session state plus its durable mirror in the credential store.
///
/// Every mutation that touches the store runs under one async lock, and
/// login/teardown bump a generation counter so that work started against an
/// older session (a slow refresh) can detect it and back off.
pub struct SessionContext {
    store: Arc<dyn CredentialStore>,
    session: watch::Sender<Session>,
    selected: watch::Sender<Option<Profile>>,
    generation: AtomicU64,
    txn: Mutex<()>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (session, _) = watch::channel(Session::default());
        let (selected, _) = watch::channel(None);
        Self {
            store,
            session,
            selected,
            generation: AtomicU64::new(0),
            txn: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.borrow().access_token.clone()
    }

    pub fn authorization(&self) -> Option<String> {
        self.session.borrow().authorization()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn selected_profile(&self) -> Option<Profile> {
        self.selected.borrow().clone()
    }

    pub fn subscribe_selected(&self) -> watch::Receiver<Option<Profile>> {
        self.selected.subscribe()
    }

    /// Load the persisted session at startup.
    ///
    /// A stored access token is trusted as-is; an expired one is discovered
    /// on the first request that comes back with the expired-token signature.
    pub async fn restore(&self) -> Result<(), StoreError> {
        let _txn = self.txn.lock().await;

        let access_token = self.store.get(keys::ACCESS_TOKEN).await?;
        let refresh_token = self.store.get(keys::REFRESH_TOKEN).await?;
        let display_name = self.store.get(keys::DISPLAY_NAME).await?;
        let role = self.store.get(keys::ROLE).await?;
        let stored_profile = self.store.get(keys::SELECTED_PROFILE).await?;

        let Some(access_token) = access_token else {
            debug!("No stored session");
            self.session.send_replace(Session::signed_out());
            return Ok(());
        };

        self.session.send_replace(Session {
            access_token: Some(access_token),
            refresh_token,
            authenticated: Some(true),
            display_name,
            role,
        });

        if let Some(raw) = stored_profile {
            match serde_json::from_str::<Profile>(&raw) {
                Ok(profile) => {
                    self.selected.send_replace(Some(profile));
                }
                Err(e) => warn!(error = %e, "Ignoring unreadable stored profile"),
            }
        }

        info!("Restored stored session");
        Ok(())
    }

    /// Start a new session from a login response.
    ///
    /// The store is written first; if that fails the in-memory session is
    /// left untouched.
    pub async fn establish(&self, login: &LoginResponse) -> Result<(), StoreError> {
        let _txn = self.txn.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);

        self.store.set(keys::ACCESS_TOKEN, &login.tokens.access).await?;
        self.store.set(keys::REFRESH_TOKEN, &login.tokens.refresh).await?;
        set_or_delete(self.store.as_ref(), keys::DISPLAY_NAME, login.firstname.as_deref()).await?;
        set_or_delete(self.store.as_ref(), keys::ROLE, login.user_type.as_deref()).await?;

        self.session.send_replace(Session {
            access_token: Some(login.tokens.access.clone()),
            refresh_token: Some(login.tokens.refresh.clone()),
            authenticated: Some(true),
            display_name: login.firstname.clone(),
            role: login.user_type.clone(),
        });
        Ok(())
    }

    /// Install a refreshed access token unless the session it was minted for
    /// has since ended. Returns `false` when the token was discarded.
    pub async fn rotate_access_token(&self, generation: u64, access: &str) -> Result<bool, StoreError> {
        let _txn = self.txn.lock().await;
        if self.generation() != generation {
            warn!(generation, current = self.generation(), "Discarding refreshed token for an ended session");
            return Ok(false);
        }

        self.store.set(keys::ACCESS_TOKEN, access).await?;
        self.session.send_modify(|session| {
            session.access_token = Some(access.to_string());
        });
        Ok(true)
    }

    /// End the session: memory first, then every persisted key.
    ///
    /// Safe to call when already signed out. All keys are attempted; the
    /// first store failure is returned.
    pub async fn teardown(&self) -> Result<(), StoreError> {
        let _txn = self.txn.lock().await;
        self.teardown_locked().await
    }

    /// Tear down only if no login or logout happened since `generation`.
    pub async fn teardown_if_current(&self, generation: u64) -> Result<bool, StoreError> {
        let _txn = self.txn.lock().await;
        if self.generation() != generation {
            return Ok(false);
        }
        self.teardown_locked().await?;
        Ok(true)
    }

    async fn teardown_locked(&self) -> Result<(), StoreError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.session.send_replace(Session::signed_out());
        self.selected.send_replace(None);

        let mut first_error = None;
        for key in keys::ALL {
            if let Err(e) = self.store.delete(key).await {
                warn!(key, error = %e, "Failed to clear stored session value");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        info!("Session cleared");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Change the selected profile.
    ///
    /// The in-memory selection changes before this returns; the returned
    /// future mirrors it into the store (set for `Some`, delete for `None`).
    /// The write is skipped if the session ends before it runs.
    pub fn select_profile(
        &self,
        profile: Option<Profile>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + '_ {
        let generation = self.generation();
        self.selected.send_replace(profile.clone());

        async move {
            let _txn = self.txn.lock().await;
            if self.generation() != generation {
                debug!("Session changed before the profile selection was stored");
                return Ok(());
            }
            match profile {
                Some(profile) => {
                    let raw = serde_json::to_string(&profile)?;
                    self.store.set(keys::SELECTED_PROFILE, &raw).await
                }
                None => self.store.delete(keys::SELECTED_PROFILE).await,
            }
        }
    }
}

async fn set_or_delete(
    store: &dyn CredentialStore,
    key: &str,
    value: Option<&str>,
) -> Result<(), StoreError> {
    match value {
        Some(value) => store.set(key, value).await,
        None => store.delete(key).await,
    }
}
