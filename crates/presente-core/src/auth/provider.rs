use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::{ClassSession, Profile, SignupRequest, SubjectDetail};

use super::session::{AuthState, Session, SessionContext};

/// Session operations and state for the rest of the application.
///
/// Operations return `Result<_, ApiError>`; the error carries the message
/// the server sent so screens can show it directly.
pub struct AuthProvider {
    api: ApiClient,
    profiles: watch::Sender<Vec<Profile>>,
}

impl AuthProvider {
    pub fn new(api: ApiClient) -> Self {
        let (profiles, _) = watch::channel(Vec::new());
        Self { api, profiles }
    }

    /// Create a provider and restore any persisted session.
    pub async fn start(api: ApiClient) -> Result<Self, ApiError> {
        let provider = Self::new(api);
        provider.session().restore().await?;
        Ok(provider)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn session(&self) -> &Arc<SessionContext> {
        self.api.session()
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn auth_state(&self) -> AuthState {
        self.session().snapshot().auth_state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().snapshot().is_authenticated()
    }

    /// Watch session changes (login, refresh, logout)
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session().subscribe()
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.profiles.borrow().clone()
    }

    pub fn subscribe_profiles(&self) -> watch::Receiver<Vec<Profile>> {
        self.profiles.subscribe()
    }

    pub fn selected_profile(&self) -> Option<Profile> {
        self.session().selected_profile()
    }

    pub fn subscribe_selected(&self) -> watch::Receiver<Option<Profile>> {
        self.session().subscribe_selected()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Sign in and persist the new session
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthState, ApiError> {
        let response = match self.api.login(email, password).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Login failed");
                return Err(e);
            }
        };

        self.session().establish(&response).await?;
        info!(role = ?response.user_type, "Login successful");
        Ok(self.auth_state())
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, signup: &SignupRequest) -> Result<serde_json::Value, ApiError> {
        match self.api.signup(signup).await {
            Ok(body) => {
                info!("Account registered");
                Ok(body)
            }
            Err(e) => {
                warn!(error = %e, "Registration failed");
                Err(e)
            }
        }
    }

    /// Sign out. Calling it while signed out is a no-op that still succeeds.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.profiles.send_replace(Vec::new());
        self.session().teardown().await?;
        Ok(())
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    /// Reload the students of the signed-in account. On failure the previous
    /// list is kept.
    pub async fn fetch_profiles(&self) -> Result<Vec<Profile>, ApiError> {
        let profiles = self.api.fetch_user_students().await?;
        info!(count = profiles.len(), "Profiles loaded");
        self.profiles.send_replace(profiles.clone());
        Ok(profiles)
    }

    /// Select a profile (or clear the selection).
    ///
    /// Takes effect in memory immediately; the returned future persists it.
    /// Dropping that future skips the write.
    pub fn select_profile(
        &self,
        profile: Option<Profile>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send + '_ {
        let persist = self.session().select_profile(profile);
        async move { persist.await.map_err(ApiError::from) }
    }

    /// Select the profile with `id` from the loaded list
    pub async fn select_profile_by_id(&self, id: &str) -> Result<Option<Profile>, ApiError> {
        let found = self.profiles.borrow().iter().find(|p| p.id == id).cloned();
        if found.is_some() {
            self.select_profile(found.clone()).await?;
        }
        Ok(found)
    }

    // =========================================================================
    // Subjects
    // =========================================================================

    fn selected_id(&self) -> Result<String, ApiError> {
        self.selected_profile()
            .map(|p| p.id)
            .ok_or(ApiError::NoProfileSelected)
    }

    /// Subject detail for the selected profile
    pub async fn fetch_subject_detail(&self, subject_id: &str) -> Result<SubjectDetail, ApiError> {
        let student_id = self.selected_id()?;
        self.api.fetch_subject_detail(subject_id, &student_id).await
    }

    /// Classes of a subject on `date` for the selected profile
    pub async fn fetch_classes(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ClassSession>, ApiError> {
        let student_id = self.selected_id()?;
        self.api.fetch_classes(subject_id, date, &student_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{keys, CredentialStore, MemoryStore};
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn provider_with(base_url: &str, store: Arc<dyn CredentialStore>) -> AuthProvider {
        let session = Arc::new(SessionContext::new(store));
        AuthProvider::new(ApiClient::new(base_url, session).unwrap())
    }

    async fn mock_login(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/auth/login/")
            .match_body(Matcher::Json(json!({"email": "a@b.com", "password": "x"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tokens": {"access": "access-1", "refresh": "refresh-1"}, "firstname": "Maria", "user_type": "apoderado"}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_login_sets_session_and_header() {
        let mut server = Server::new_async().await;
        let login = mock_login(&mut server).await;
        let store = Arc::new(MemoryStore::new());
        let provider = provider_with(&server.url(), store.clone());

        let state = provider.login("a@b.com", "x").await.unwrap();
        assert_eq!(state.authenticated, Some(true));
        assert_eq!(state.token.as_deref(), Some("access-1"));
        assert_eq!(state.display_name.as_deref(), Some("Maria"));
        assert_eq!(state.role.as_deref(), Some("apoderado"));
        assert_eq!(provider.api().authorization().as_deref(), Some("Bearer access-1"));

        assert_eq!(store.get(keys::ACCESS_TOKEN).await.unwrap().as_deref(), Some("access-1"));
        assert_eq!(store.get(keys::REFRESH_TOKEN).await.unwrap().as_deref(), Some("refresh-1"));
        assert_eq!(store.get(keys::DISPLAY_NAME).await.unwrap().as_deref(), Some("Maria"));
        assert_eq!(store.get(keys::ROLE).await.unwrap().as_deref(), Some("apoderado"));
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_failure_returns_server_message() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login/")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"msg": "Credenciales invalidas"}"#)
            .create_async()
            .await;
        let store = Arc::new(MemoryStore::new());
        let provider = provider_with(&server.url(), store.clone());

        let err = provider.login("a@b.com", "nope").await.unwrap_err();
        assert_eq!(err.user_message(), "Credenciales invalidas");
        assert!(!provider.is_authenticated());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_does_not_sign_in() {
        let mut server = Server::new_async().await;
        let signup = server
            .mock("POST", "/auth/signup/")
            .match_body(Matcher::PartialJson(json!({"email": "a@b.com", "document_type": "rut"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message": "User created", "data": {"email": "a@b.com"}}"#)
            .create_async()
            .await;
        let provider = provider_with(&server.url(), Arc::new(MemoryStore::new()));

        let request = SignupRequest {
            password: "secret".into(),
            email: "a@b.com".into(),
            date_of_birth: "1990-01-31".into(),
            user_type: "apoderado".into(),
            firstname: "Maria".into(),
            lastname: "Diaz".into(),
            gender: "F".into(),
            phone_number: "+56911112222".into(),
            document_type: "rut".into(),
            document_number: "11111111-1".into(),
        };
        let body = provider.register(&request).await.unwrap();
        assert_eq!(body["message"], "User created");
        assert!(!provider.is_authenticated());
        signup.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_profiles_failure_keeps_previous_list() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let ok = server
            .mock("GET", "/apiv1/students/get-user-students/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": "1", "firstname": "Ana", "lastname": "Diaz"}]"#)
            .expect(1)
            .create_async()
            .await;

        let provider = provider_with(&server.url(), Arc::new(MemoryStore::new()));
        provider.login("a@b.com", "x").await.unwrap();
        assert_eq!(provider.fetch_profiles().await.unwrap().len(), 1);
        ok.assert_async().await;
        ok.remove_async().await;

        let _broken = server
            .mock("GET", "/apiv1/students/get-user-students/")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        assert!(matches!(provider.fetch_profiles().await, Err(ApiError::ServerError(_))));
        assert_eq!(provider.profiles(), vec![Profile::new("1", "Ana", "Diaz")]);
    }

    #[tokio::test]
    async fn test_selection_survives_restart() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        let server = Server::new_async().await;

        let mut profile = Profile::new("1", "Ana", "Diaz");
        profile.extra.insert("course".to_string(), json!({"id": 2, "name": "3B"}));

        let provider = provider_with(&server.url(), store.clone());
        provider
            .session()
            .establish(&crate::models::LoginResponse {
                tokens: crate::models::TokenPair {
                    access: "access-1".into(),
                    refresh: "refresh-1".into(),
                },
                firstname: None,
                user_type: None,
            })
            .await
            .unwrap();
        provider.select_profile(Some(profile.clone())).await.unwrap();
        drop(provider);

        let restarted = AuthProvider::start(
            ApiClient::new(&server.url(), Arc::new(SessionContext::new(store))).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(restarted.selected_profile(), Some(profile));
        assert!(restarted.is_authenticated());
        assert_eq!(restarted.api().authorization().as_deref(), Some("Bearer access-1"));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let store = Arc::new(MemoryStore::new());
        let provider = provider_with(&server.url(), store.clone());

        provider.login("a@b.com", "x").await.unwrap();
        provider.select_profile(Some(Profile::new("1", "Ana", "Diaz"))).await.unwrap();

        provider.logout().await.unwrap();
        let once = (provider.auth_state(), provider.selected_profile(), store.len().await);
        provider.logout().await.unwrap();
        let twice = (provider.auth_state(), provider.selected_profile(), store.len().await);

        assert_eq!(once, twice);
        assert_eq!(once.0.authenticated, Some(false));
        assert_eq!(once.1, None);
        assert_eq!(once.2, 0);
        assert_eq!(provider.api().authorization(), None);
    }

    #[tokio::test]
    async fn test_subject_reads_need_a_selection() {
        let server = Server::new_async().await;
        let provider = provider_with(&server.url(), Arc::new(MemoryStore::new()));

        assert!(matches!(
            provider.fetch_subject_detail("3").await,
            Err(ApiError::NoProfileSelected)
        ));
        let date = NaiveDate::from_ymd_opt(2024, 10, 7).unwrap();
        assert!(matches!(
            provider.fetch_classes("3", date).await,
            Err(ApiError::NoProfileSelected)
        ));
    }

    #[tokio::test]
    async fn test_select_profile_by_id() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _profiles = server
            .mock("GET", "/apiv1/students/get-user-students/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": 1, "firstname": "Ana", "lastname": "Diaz"}, {"id": 2, "firstname": "Tomas", "lastname": "Diaz"}]"#)
            .create_async()
            .await;
        let provider = provider_with(&server.url(), Arc::new(MemoryStore::new()));
        provider.login("a@b.com", "x").await.unwrap();
        provider.fetch_profiles().await.unwrap();

        let picked = provider.select_profile_by_id("2").await.unwrap();
        assert_eq!(picked.map(|p| p.firstname), Some("Tomas".to_string()));
        assert_eq!(provider.selected_profile().map(|p| p.id), Some("2".to_string()));

        assert_eq!(provider.select_profile_by_id("99").await.unwrap(), None);
        assert_eq!(provider.selected_profile().map(|p| p.id), Some("2".to_string()));
    }
}
