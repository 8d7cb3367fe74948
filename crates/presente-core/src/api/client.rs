//! API client for communicating with the Presente REST API.
//!
//! Every authenticated request goes through `ApiClient::execute`, which
//! attaches the session's bearer token at send time. A 403 carrying the
//! expired-token signature triggers a refresh (at most one at a time) after
//! which the request is replayed with the new token.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::{header, Client, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::refresh::{Admission, RefreshCoordinator, RefreshGuard};
use crate::auth::SessionContext;
use crate::models::auth::{LoginRequest, RefreshRequest};
use crate::models::{ClassSession, LoginResponse, Profile, RefreshResponse, SignupRequest, SubjectDetail};
use crate::storage::keys;
use crate::utils::format_query_date;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default API base URL
pub const DEFAULT_API_URL: &str = "https://catolica-backend.vercel.app";

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A request parked behind an in-flight refresh, with the channel its caller
/// is waiting on.
struct PendingReplay {
    request: Request,
    respond: oneshot::Sender<Result<Response, ApiError>>,
}

struct ClientInner {
    http: Client,
    base_url: String,
    session: Arc<SessionContext>,
    refresh: RefreshCoordinator<PendingReplay>,
}

/// API client for the Presente backend.
/// Clone is cheap and clones share the session and the refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, session: Arc<SessionContext>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, session, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: &str,
        session: Arc<SessionContext>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                session,
                refresh: RefreshCoordinator::new(),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    /// `Authorization` value the next request will carry
    pub fn authorization(&self) -> Option<String> {
        self.inner.session.authorization()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    // ===== Authentication =====

    /// Exchange credentials for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = self
            .inner
            .http
            .post(self.url("/auth/login/"))
            .json(&LoginRequest { email, password })
            .build()?;

        let response = self.send_public(request).await?;
        Self::parse_json(response).await
    }

    /// Create an account. Returns the server's response body as-is.
    pub async fn signup(&self, signup: &SignupRequest) -> Result<serde_json::Value, ApiError> {
        let request = self
            .inner
            .http
            .post(self.url("/auth/signup/"))
            .json(signup)
            .build()?;

        let response = self.send_public(request).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse signup response: {}", e)))
    }

    /// Mint a new access token from a refresh token
    pub async fn refresh_token(&self, refresh: &str) -> Result<String, ApiError> {
        let request = self
            .inner
            .http
            .post(self.url("/auth/jwt/refresh/"))
            .json(&RefreshRequest { refresh })
            .build()?;

        let response = self.send_public(request).await?;
        let parsed: RefreshResponse = Self::parse_json(response).await?;
        Ok(parsed.access)
    }

    // ===== Data Fetching Methods =====

    /// Fetch the students linked to the signed-in account
    pub async fn fetch_user_students(&self) -> Result<Vec<Profile>, ApiError> {
        self.get("/apiv1/students/get-user-students/", &[]).await
    }

    /// Fetch a subject as seen for one student
    pub async fn fetch_subject_detail(
        &self,
        subject_id: &str,
        student_id: &str,
    ) -> Result<SubjectDetail, ApiError> {
        let path = format!("/apiv1/apoderados/subjects/{}/", subject_id);
        self.get(&path, &[("student_id", student_id)]).await
    }

    /// Fetch the classes of a subject held on `date`
    pub async fn fetch_classes(
        &self,
        subject_id: &str,
        date: NaiveDate,
        student_id: &str,
    ) -> Result<Vec<ClassSession>, ApiError> {
        let path = format!(
            "/apiv1/apoderados/subjects/{}/class-date/{}/",
            subject_id,
            format_query_date(date)
        );
        self.get(&path, &[("student_id", student_id)]).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ApiError> {
        let request = self.inner.http.get(self.url(path)).query(query).build()?;
        let response = self.execute(request).await?;
        Self::parse_json(response).await
    }

    // ===== Request pipeline =====

    /// Send a request with the session's token, refreshing and replaying
    /// once if the token turns out to be expired.
    pub async fn execute(&self, mut request: Request) -> Result<Response, ApiError> {
        let sent_with = self.inner.session.access_token();
        let retained = request.try_clone();
        Self::apply_authorization(&mut request, sent_with.as_deref())?;

        debug!(method = %request.method(), url = %request.url(), "Sending request");
        let response = self.inner.http.execute(request).await?;
        if response.status() != StatusCode::FORBIDDEN {
            return Self::check_response(response).await;
        }

        let body = response.text().await.unwrap_or_default();
        if !ApiError::is_expired_token_body(&body) {
            return Err(ApiError::from_status(StatusCode::FORBIDDEN, &body));
        }
        let request = retained.ok_or(ApiError::RequestNotReplayable)?;

        if let Some(current) = self.rotated_since(sent_with.as_deref()) {
            debug!("Token was rotated while the request was in flight, replaying");
            return self.replay(request, &current).await;
        }

        let (respond, replayed) = oneshot::channel();
        match self.inner.refresh.admit(PendingReplay { request, respond }) {
            Admission::Lead(guard, pending) => self.lead_refresh(guard, pending.request, sent_with).await,
            Admission::Queued => replayed
                .await
                .unwrap_or_else(|_| Err(ApiError::RefreshAbandoned)),
        }
    }

    /// The current token, if it differs from the one a request was sent with
    fn rotated_since(&self, sent_with: Option<&str>) -> Option<String> {
        self.inner
            .session
            .access_token()
            .filter(|current| Some(current.as_str()) != sent_with)
    }

    async fn lead_refresh(
        &self,
        guard: RefreshGuard<'_, PendingReplay>,
        request: Request,
        sent_with: Option<String>,
    ) -> Result<Response, ApiError> {
        let generation = self.inner.session.generation();
        let outcome = match self.rotated_since(sent_with.as_deref()) {
            Some(current) => Ok(current),
            None => self.refresh_session(generation).await,
        };
        let queued = guard.finish();

        match outcome {
            Ok(token) => {
                // Replays run on their own task and outlive a cancelled leader
                let client = self.clone();
                let (respond, own) = oneshot::channel();
                tokio::spawn(async move {
                    let _ = respond.send(client.replay(request, &token).await);
                    for pending in queued {
                        let result = client.replay(pending.request, &token).await;
                        // Receiver is gone if that caller was cancelled
                        let _ = pending.respond.send(result);
                    }
                });
                own.await.unwrap_or_else(|_| Err(ApiError::RefreshAbandoned))
            }
            Err(e) => {
                for pending in queued {
                    let _ = pending.respond.send(Err(e.for_waiter()));
                }
                Err(e)
            }
        }
    }

    /// Refresh the access token for the session at `generation`. Any failure
    /// other than the session having ended tears the session down.
    async fn refresh_session(&self, generation: u64) -> Result<String, ApiError> {
        match self.try_refresh(generation).await {
            Ok(access) => {
                info!("Access token refreshed");
                Ok(access)
            }
            Err(ApiError::SessionEnded) => Err(ApiError::SessionEnded),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                if let Err(store_err) = self.inner.session.teardown_if_current(generation).await {
                    warn!(error = %store_err, "Failed to clear stored session after refresh failure");
                }
                Err(e)
            }
        }
    }

    async fn try_refresh(&self, generation: u64) -> Result<String, ApiError> {
        let refresh = self
            .inner
            .session
            .store()
            .get(keys::REFRESH_TOKEN)
            .await?
            .ok_or(ApiError::NotAuthenticated)?;

        let access = self.refresh_token(&refresh).await?;

        if self.inner.session.rotate_access_token(generation, &access).await? {
            Ok(access)
        } else {
            Err(ApiError::SessionEnded)
        }
    }

    /// Re-send a request once with `token`; its result is final.
    async fn replay(&self, mut request: Request, token: &str) -> Result<Response, ApiError> {
        Self::apply_authorization(&mut request, Some(token))?;
        debug!(method = %request.method(), url = %request.url(), "Replaying request");
        let response = self.inner.http.execute(request).await?;
        Self::check_response(response).await
    }

    /// Send without a bearer token and without refresh handling
    async fn send_public(&self, request: Request) -> Result<Response, ApiError> {
        debug!(method = %request.method(), url = %request.url(), "Sending public request");
        let response = self.inner.http.execute(request).await?;
        Self::check_response(response).await
    }

    fn apply_authorization(request: &mut Request, token: Option<&str>) -> Result<(), ApiError> {
        match token {
            Some(token) => {
                let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| ApiError::InvalidResponse("Access token is not a valid header value".to_string()))?;
                value.set_sensitive(true);
                request.headers_mut().insert(header::AUTHORIZATION, value);
            }
            None => {
                request.headers_mut().remove(header::AUTHORIZATION);
            }
        }
        Ok(())
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenPair;
    use crate::storage::{CredentialStore, MemoryStore};
    use mockito::{Matcher, Server};
    use serde_json::{json, Value};

    const EXPIRED: &str = r#"{"detail":"Given token not valid for any token type","code":"token_not_valid","messages":[{"token_class":"AccessToken","token_type":"access","message":"Token is invalid or expired"}]}"#;

    async fn signed_in_client(base_url: &str) -> (ApiClient, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(SessionContext::new(store.clone()));
        session
            .establish(&LoginResponse {
                tokens: TokenPair {
                    access: "access-1".to_string(),
                    refresh: "refresh-1".to_string(),
                },
                firstname: Some("Maria".to_string()),
                user_type: Some("apoderado".to_string()),
            })
            .await
            .unwrap();
        let client = ApiClient::new(base_url, session).unwrap();
        (client, store)
    }

    #[tokio::test]
    async fn test_concurrent_expired_requests_share_one_refresh() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/jwt/refresh/")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({"refresh": "refresh-1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access": "access-2"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut stale = Vec::new();
        let mut fresh = Vec::new();
        for i in 0..5 {
            let path = format!("/items/{}/", i);
            stale.push(
                server
                    .mock("GET", path.as_str())
                    .match_header("authorization", "Bearer access-1")
                    .with_status(403)
                    .with_header("content-type", "application/json")
                    .with_body(EXPIRED)
                    .expect(1)
                    .create_async()
                    .await,
            );
            fresh.push(
                server
                    .mock("GET", path.as_str())
                    .match_header("authorization", "Bearer access-2")
                    .with_status(200)
                    .with_header("content-type", "application/json")
                    .with_body(format!(r#"{{"n": {}}}"#, i))
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let (client, store) = signed_in_client(&server.url()).await;

        let results = futures::future::join_all((0..5).map(|i| {
            let client = client.clone();
            async move { client.get::<Value>(&format!("/items/{}/", i), &[]).await }
        }))
        .await;

        for (i, result) in results.into_iter().enumerate() {
            let body = result.unwrap();
            assert_eq!(body["n"], json!(i));
        }

        refresh.assert_async().await;
        for mock in stale.iter().chain(fresh.iter()) {
            mock.assert_async().await;
        }
        assert_eq!(client.authorization().as_deref(), Some("Bearer access-2"));
        assert_eq!(
            store.get(keys::ACCESS_TOKEN).await.unwrap().as_deref(),
            Some("access-2")
        );
        assert!(!client.inner.refresh.is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_refresh_tears_down_session() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/jwt/refresh/")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail": "Token is invalid or expired", "code": "token_not_valid"}"#)
            .expect(1)
            .create_async()
            .await;
        let _items = server
            .mock("GET", Matcher::Regex(r"^/items/\d+/$".to_string()))
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(EXPIRED)
            .expect_at_least(1)
            .create_async()
            .await;

        let (client, store) = signed_in_client(&server.url()).await;
        client
            .session()
            .select_profile(Some(Profile::new("1", "Ana", "Diaz")))
            .await
            .unwrap();

        let results = futures::future::join_all((0..3).map(|i| {
            let client = client.clone();
            async move { client.get::<Value>(&format!("/items/{}/", i), &[]).await }
        }))
        .await;

        assert!(results.iter().all(|r| r.is_err()));
        refresh.assert_async().await;

        for key in keys::ALL {
            assert_eq!(store.get(key).await.unwrap(), None, "{} should be cleared", key);
        }
        let session = client.session().snapshot();
        assert_eq!(session.authenticated, Some(false));
        assert_eq!(session.access_token, None);
        assert_eq!(client.session().selected_profile(), None);
        assert_eq!(client.authorization(), None);
    }

    #[tokio::test]
    async fn test_other_forbidden_responses_pass_through() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/jwt/refresh/")
            .expect(0)
            .create_async()
            .await;
        let _denied = server
            .mock("GET", "/apiv1/students/get-user-students/")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail": "You do not have permission to perform this action."}"#)
            .create_async()
            .await;

        let (client, _store) = signed_in_client(&server.url()).await;
        match client.fetch_user_students().await {
            Err(ApiError::AccessDenied(msg)) => {
                assert_eq!(msg, "You do not have permission to perform this action.")
            }
            other => panic!("unexpected {:?}", other.map(|p| p.len())),
        }
        refresh.assert_async().await;
        assert!(client.session().snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_replay_is_attempted_only_once() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/jwt/refresh/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access": "access-2"}"#)
            .expect(1)
            .create_async()
            .await;
        let always_expired = server
            .mock("GET", "/apiv1/students/get-user-students/")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(EXPIRED)
            .expect(2)
            .create_async()
            .await;

        let (client, _store) = signed_in_client(&server.url()).await;
        let result = client.fetch_user_students().await;
        assert!(matches!(result, Err(ApiError::TokenExpired)));

        refresh.assert_async().await;
        always_expired.assert_async().await;
    }

    #[tokio::test]
    async fn test_public_requests_carry_no_token() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/auth/login/")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({"email": "a@b.com", "password": "x"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tokens": {"access": "a", "refresh": "r"}, "firstname": "Ana", "user_type": "apoderado"}"#)
            .create_async()
            .await;

        let (client, _store) = signed_in_client(&server.url()).await;
        let response = client.login("a@b.com", "x").await.unwrap();
        assert_eq!(response.tokens.access, "a");
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_classes_builds_dated_path() {
        let mut server = Server::new_async().await;
        let classes = server
            .mock("GET", "/apiv1/apoderados/subjects/3/class-date/2024-10-07/")
            .match_query(Matcher::UrlEncoded("student_id".into(), "1".into()))
            .match_header("authorization", "Bearer access-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": 11, "subject_id": 3, "date": "2024-10-07", "time_start": "08:00", "time_end": "09:00"}]"#)
            .create_async()
            .await;

        let (client, _store) = signed_in_client(&format!("{}/", server.url())).await;
        let date = NaiveDate::from_ymd_opt(2024, 10, 7).unwrap();
        let list = client.fetch_classes("3", date, "1").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "11");
        classes.assert_async().await;
    }

    fn item_request(client: &ApiClient, base_url: &str, i: usize) -> Request {
        client
            .inner
            .http
            .get(format!("{}/items/{}/", base_url, i))
            .build()
            .unwrap()
    }

    /// Claim the refresh with item 0 and queue items `1..count` behind it.
    fn admit_items<'a>(
        client: &'a ApiClient,
        base_url: &str,
        count: usize,
    ) -> (
        RefreshGuard<'a, PendingReplay>,
        Request,
        Vec<oneshot::Receiver<Result<Response, ApiError>>>,
    ) {
        let (respond, _) = oneshot::channel();
        let pending = PendingReplay {
            request: item_request(client, base_url, 0),
            respond,
        };
        let (guard, leader) = match client.inner.refresh.admit(pending) {
            Admission::Lead(guard, pending) => (guard, pending.request),
            Admission::Queued => panic!("first caller must lead"),
        };

        let mut waiters = Vec::new();
        for i in 1..count {
            let (respond, replayed) = oneshot::channel();
            let pending = PendingReplay {
                request: item_request(client, base_url, i),
                respond,
            };
            assert!(matches!(client.inner.refresh.admit(pending), Admission::Queued));
            waiters.push(replayed);
        }
        (guard, leader, waiters)
    }

    #[tokio::test]
    async fn test_replays_follow_arrival_order() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/jwt/refresh/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access": "access-2"}"#)
            .expect(1)
            .create_async()
            .await;

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut replays = Vec::new();
        for i in 0..5usize {
            let seen = seen.clone();
            replays.push(
                server
                    .mock("GET", format!("/items/{}/", i).as_str())
                    .match_header("authorization", "Bearer access-2")
                    .with_status(200)
                    .with_body_from_request(move |_| {
                        seen.lock().unwrap().push(i);
                        format!(r#"{{"n": {}}}"#, i).into_bytes()
                    })
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let base_url = server.url();
        let (client, _store) = signed_in_client(&base_url).await;
        let (guard, leader, waiters) = admit_items(&client, &base_url, 5);

        let own = client
            .lead_refresh(guard, leader, Some("access-1".to_string()))
            .await
            .unwrap();
        assert!(own.status().is_success());
        for replayed in waiters {
            assert!(replayed.await.unwrap().is_ok());
        }

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        refresh.assert_async().await;
        for mock in &replays {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_cancelled_leader_still_serves_queue() {
        use futures::FutureExt;

        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/jwt/refresh/")
            .expect(0)
            .create_async()
            .await;
        let _own = server
            .mock("GET", "/items/0/")
            .with_status(200)
            .with_body(r#"{"n": 0}"#)
            .create_async()
            .await;
        let queued = server
            .mock("GET", "/items/1/")
            .match_header("authorization", "Bearer access-2")
            .with_status(200)
            .with_body(r#"{"n": 1}"#)
            .expect(1)
            .create_async()
            .await;

        let base_url = server.url();
        let (client, _store) = signed_in_client(&base_url).await;
        let (guard, leader, mut waiters) = admit_items(&client, &base_url, 2);

        // Another caller already installed a newer token
        let session = client.session();
        assert!(session.rotate_access_token(session.generation(), "access-2").await.unwrap());

        let leader_result = client
            .lead_refresh(guard, leader, Some("access-1".to_string()))
            .now_or_never();
        assert!(leader_result.is_none());
        assert!(!client.inner.refresh.is_refreshing());

        let response = waiters.remove(0).await.unwrap().unwrap();
        assert!(response.status().is_success());
        queued.assert_async().await;
        refresh.assert_async().await;
    }
}
