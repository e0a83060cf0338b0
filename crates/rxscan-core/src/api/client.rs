//! API client for the prescription analysis service.
//!
//! Every request goes through [`ApiClient::send`], which attaches the stored
//! access credential and, on a 401, renews it once through the refresh
//! endpoint before resending. Renewals are single-flight: requests that
//! expire together share one refresh call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::{ApiError, ApiRequest, ApiResult, FileUpload};
use crate::auth::{SessionEvent, SessionStore, TokenKind};
use crate::models::{
    AccessToken, Account, Credentials, Prescription, RefreshRequest, StructuredRecord, TokenPair,
};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Capacity of the session event channel. Slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 16;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// Single-flight state for credential refresh.
#[derive(Default)]
struct RefreshGate {
    /// Bumped when a refresh attempt finishes, successful or not.
    attempts: AtomicU64,
    /// Held for the whole attempt. Holds the reason the latest attempt
    /// failed, or `None` if it succeeded.
    last_failure: Mutex<Option<String>>,
}

/// API client for the prescription analysis service.
/// Clone is cheap - the connection pool, store, refresh lock and event
/// channel are shared between clones.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    refresh: Arc<RefreshGate>,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    /// Create a new API client with the default timeout
    pub fn new(base_url: impl Into<String>, store: Arc<dyn SessionStore>) -> ApiResult<Self> {
        Self::with_timeout(base_url, store, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        store: Arc<dyn SessionStore>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            refresh: Arc::new(RefreshGate::default()),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Observe login, refresh, logout and expiry.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    // ===== Transport =====

    /// Send a request with the stored bearer credential, renewing it once
    /// on a 401.
    pub async fn send(&self, mut request: ApiRequest) -> ApiResult<Response> {
        loop {
            let seen = self.refresh.attempts.load(Ordering::Acquire);
            let access = self.store.access_token().map_err(ApiError::Store)?;
            let response = self.dispatch(&request, access.as_deref()).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Self::check_response(response).await;
            }

            if request.is_retried() {
                warn!(path = %request.path, "Still unauthorized after refresh, giving up");
                return Self::check_response(response).await;
            }

            debug!(path = %request.path, "Access token rejected, refreshing");
            request.mark_retried();
            self.refresh_access(access.as_deref(), seen).await?;
        }
    }

    async fn dispatch(&self, request: &ApiRequest, bearer: Option<&str>) -> ApiResult<Response> {
        debug!(
            method = %request.method,
            path = %request.path,
            authenticated = bearer.is_some(),
            retried = request.is_retried(),
            "Sending request"
        );
        let response = request
            .build(&self.http, &self.base_url, bearer)?
            .send()
            .await?;
        Ok(response)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> ApiResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, what: &str) -> ApiResult<T> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest, what: &str) -> ApiResult<T> {
        let response = self.send(request).await?;
        Self::parse_json(response, what).await
    }

    // ===== Credential refresh =====

    /// Obtain a fresh access credential, sharing one refresh call between
    /// all requests that expired with the same `stale` credential. `seen`
    /// is the attempt count observed before the request was sent.
    async fn refresh_access(&self, stale: Option<&str>, seen: u64) -> ApiResult<String> {
        let mut last_failure = self.refresh.last_failure.lock().await;

        // An attempt finished while this request was in flight: share its outcome
        if self.refresh.attempts.load(Ordering::Acquire) != seen {
            if let Some(reason) = last_failure.as_ref() {
                debug!(reason = %reason, "Concurrent refresh failed, session already expired");
                return Err(ApiError::SessionExpired(reason.clone()));
            }
        }

        // Someone else refreshed while this request waited for the lock
        if let Some(current) = self.store.access_token().map_err(ApiError::Store)? {
            if Some(current.as_str()) != stale {
                debug!("Reusing access token refreshed by a concurrent request");
                return Ok(current);
            }
        }

        let outcome = match self.store.refresh_token().map_err(ApiError::Store)? {
            Some(token) if !token.is_empty() => self
                .request_refresh(&token)
                .await
                .map_err(|e| e.to_string()),
            _ => Err("no refresh token stored".to_string()),
        };
        let outcome = match outcome {
            Ok(access) => self
                .store
                .set(TokenKind::Access, &access)
                .map(|()| access)
                .map_err(ApiError::Store),
            Err(reason) => Err(self.expire_session(reason)),
        };

        *last_failure = match &outcome {
            Err(ApiError::SessionExpired(reason)) => Some(reason.clone()),
            _ => None,
        };
        self.refresh.attempts.fetch_add(1, Ordering::Release);

        if outcome.is_ok() {
            info!("Access token refreshed");
            let _ = self.events.send(SessionEvent::Refreshed);
        }
        outcome
    }

    /// The refresh call itself never carries a bearer and is never retried.
    async fn request_refresh(&self, refresh_token: &str) -> ApiResult<String> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest { refresh_token })?;
        let response = self.dispatch(&request, None).await?;
        let response = Self::check_response(response).await?;
        let token: AccessToken = Self::parse_json(response, "refresh response").await?;
        Ok(token.access_token)
    }

    /// Refresh failure is fatal to the session: drop both credentials and
    /// tell whoever is listening.
    fn expire_session(&self, reason: String) -> ApiError {
        warn!(reason = %reason, "Session expired, clearing stored credentials");
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear session store");
        }
        let _ = self.events.send(SessionEvent::Expired {
            reason: reason.clone(),
        });
        ApiError::SessionExpired(reason)
    }

    // ===== Authentication =====

    /// Create an account. Does not log in.
    pub async fn register(&self, username: &str, password: &str) -> ApiResult<Account> {
        let request = ApiRequest::post("/auth/register").json(&Credentials { username, password })?;
        let account: Account = self.send_json(request, "registration response").await?;
        info!(username = %account.username, "Account registered");
        Ok(account)
    }

    /// Log in and store the returned credential pair. The store is left
    /// untouched on failure.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<TokenPair> {
        let request =
            ApiRequest::post(LOGIN_PATH).form(&[("username", username), ("password", password)]);
        let response = self.dispatch(&request, None).await?;
        let response = Self::check_response(response).await?;
        let pair: TokenPair = Self::parse_json(response, "login response").await?;

        self.store.store_pair(&pair).map_err(ApiError::Store)?;
        info!(username = username, "Login successful");
        let _ = self.events.send(SessionEvent::LoggedIn {
            username: username.to_string(),
        });
        Ok(pair)
    }

    /// Forget both credentials. Purely local.
    pub fn logout(&self) -> ApiResult<()> {
        self.store.clear().map_err(ApiError::Store)?;
        info!("Logged out");
        let _ = self.events.send(SessionEvent::LoggedOut);
        Ok(())
    }

    pub async fn current_user(&self) -> ApiResult<Account> {
        self.send_json(ApiRequest::get("/auth/me"), "account").await
    }

    // ===== Prescriptions =====

    /// Upload a prescription image for analysis.
    pub async fn analyze_prescription(&self, upload: FileUpload) -> ApiResult<Prescription> {
        debug!(file = %upload.file_name, bytes = upload.bytes.len(), "Uploading prescription");
        let request = ApiRequest::post("/prescriptions/analyze").multipart(upload);
        self.send_json(request, "analysis").await
    }

    /// Past analyses, newest first.
    pub async fn history(&self) -> ApiResult<Vec<Prescription>> {
        self.send_json(ApiRequest::get("/prescriptions/history"), "history")
            .await
    }

    pub async fn prescription(&self, id: i64) -> ApiResult<Prescription> {
        self.send_json(ApiRequest::get(format!("/prescriptions/{}", id)), "prescription")
            .await
    }

    /// Structured data only, for dispensing machines. 404 when the analysis
    /// produced no structured data.
    pub async fn structured_data(&self, id: i64) -> ApiResult<StructuredRecord> {
        self.send_json(
            ApiRequest::get(format!("/prescriptions/{}/structured", id)),
            "structured data",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionStore;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            token_type: Some("bearer".to_string()),
        }
    }

    fn client_with(server: &MockServer, store: Arc<MemorySessionStore>) -> ApiClient {
        ApiClient::new(server.uri(), store).unwrap()
    }

    fn account_json() -> serde_json::Value {
        json!({"id": 1, "username": "alice", "created_at": "2024-05-01T10:30:00"})
    }

    fn unauthorized() -> ResponseTemplate {
        ResponseTemplate::new(401).set_body_json(json!({"detail": "Could not validate credentials"}))
    }

    async fn mount_refresh(server: &MockServer, refresh: &str, access: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": refresh})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": access, "token_type": "bearer"})),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_send_attaches_stored_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store);

        let account = client.current_user().await.unwrap();
        assert_eq!(account.username, "alice");
    }

    #[tokio::test]
    async fn test_send_without_token_has_no_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json()))
            .mount(&server)
            .await;

        let client = client_with(&server, Arc::new(MemorySessionStore::new()));
        assert!(!client.is_authenticated());
        client.register("alice", "Secret1!").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/history"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/history"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", "A2", 1).await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store.clone());
        let mut events = client.subscribe();

        let history = client.history().await.unwrap();
        assert!(history.is_empty());
        assert_eq!(store.access_token().unwrap().as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("R1"));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Refreshed);
    }

    #[tokio::test]
    async fn test_second_401_is_not_refreshed_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(unauthorized())
            .expect(2)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", "A2", 1).await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store.clone());

        let err = client.current_user().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(ref d) if d == "Could not validate credentials"));
        // The refreshed credentials stay; only a failed refresh clears them
        assert_eq!(store.access_token().unwrap().as_deref(), Some("A2"));
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session_and_signals_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/7"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid refresh token"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store.clone());
        let mut events = client.subscribe();

        let err = client.prescription(7).await.unwrap_err();
        assert!(err.is_session_expired());
        assert!(err.to_string().contains("Invalid refresh token"));
        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.refresh_token().unwrap(), None);
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Expired { .. }));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_expires_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::new());
        store.set(TokenKind::Access, "A1").unwrap();
        let client = client_with(&server, store.clone());

        let err = client.current_user().await.unwrap_err();
        assert!(err.is_session_expired());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_other_failures_propagate_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/99"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "Prescription not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store.clone());

        let err = client.prescription(99).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.detail(), Some("Prescription not found"));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_login_stores_credentials_for_later_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("username=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A1",
                "refresh_token": "R1",
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::new());
        let client = client_with(&server, store.clone());
        let mut events = client.subscribe();

        let tokens = client.login("alice", "Secret1!").await.unwrap();
        assert_eq!(tokens, pair("A1", "R1"));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::LoggedIn {
                username: "alice".to_string()
            }
        );
        client.current_user().await.unwrap();

        client.logout().unwrap();
        assert!(!client.is_authenticated());
        assert_eq!(store.refresh_token().unwrap(), None);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
    }

    #[tokio::test]
    async fn test_failed_login_leaves_store_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "Incorrect username or password"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("OLD", "ROLD")));
        let client = client_with(&server, store.clone());

        let err = client.login("alice", "wrong").await.unwrap_err();
        assert_eq!(err.detail(), Some("Incorrect username or password"));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("OLD"));
    }

    #[tokio::test]
    async fn test_login_then_expiry_scenario() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=Secret1%21"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A1",
                "refresh_token": "R1",
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", "A2", 1).await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::new());
        let client = client_with(&server, store.clone());

        client.login("alice", "Secret1!").await.unwrap();
        let account = client.current_user().await.unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(store.access_token().unwrap().as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn test_concurrent_expiry_shares_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/history"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(unauthorized())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/history"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(5)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "A2", "token_type": "bearer"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store.clone());

        let calls = (0..5).map(|_| {
            let client = client.clone();
            async move { client.history().await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn test_concurrent_expiry_shares_one_failed_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/history"))
            .respond_with(unauthorized())
            .expect(5)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "Invalid refresh token"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store.clone());
        let mut events = client.subscribe();

        let calls = (0..5).map(|_| {
            let client = client.clone();
            async move { client.history().await }
        });
        let results = futures::future::join_all(calls).await;

        let reasons: Vec<String> = results
            .into_iter()
            .map(|r| match r {
                Err(ApiError::SessionExpired(reason)) => reason,
                other => panic!("expected SessionExpired, got {:?}", other.map(|v| v.len())),
            })
            .collect();
        assert!(reasons[0].contains("Invalid refresh token"));
        assert!(reasons.iter().all(|r| r == &reasons[0]));

        let mut expired = 0;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Expired { reason } = event {
                assert_eq!(reason, reasons[0]);
                expired += 1;
            }
        }
        assert_eq!(expired, 1);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_request_after_failed_refresh_expires_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(unauthorized())
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store);
        let mut events = client.subscribe();

        assert!(client.current_user().await.unwrap_err().is_session_expired());
        // A later request is not tied to the earlier attempt
        let err = client.current_user().await.unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired(ref r) if r == "no refresh token stored"));
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Expired { .. }));
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Expired { .. }));
    }

    #[tokio::test]
    async fn test_analyze_uploads_multipart_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prescriptions/analyze"))
            .and(header("authorization", "Bearer A1"))
            .and(body_string_contains("name=\"file\"; filename=\"rx.png\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 5,
                "filename": "rx.png",
                "analysis": "ok",
                "structured_data": {"patient": {"patient_name": "Asha"}, "medications": []},
                "created_at": "2024-05-01T10:30:00"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store);

        let upload = FileUpload::new("rx.png", mime::IMAGE_PNG, b"PNGDATA".to_vec()).unwrap();
        let record = client.analyze_prescription(upload).await.unwrap();
        assert_eq!(record.id, 5);
        let patient = &record.structured_data.unwrap().patient;
        assert_eq!(patient.patient_name.as_deref(), Some("Asha"));
    }

    #[tokio::test]
    async fn test_multipart_upload_is_resent_after_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prescriptions/analyze"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/prescriptions/analyze"))
            .and(header("authorization", "Bearer A2"))
            .and(body_string_contains("filename=\"rx.jpg\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 6,
                "filename": "rx.jpg",
                "analysis": "ok",
                "structured_data": null,
                "created_at": "2024-05-01T10:30:00"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_refresh(&server, "R1", "A2", 1).await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store);

        let upload = FileUpload::new("rx.jpg", mime::IMAGE_JPEG, b"JPEGDATA".to_vec()).unwrap();
        let record = client.analyze_prescription(upload).await.unwrap();
        assert_eq!(record.id, 6);
    }

    #[tokio::test]
    async fn test_rejected_upload_surfaces_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prescriptions/analyze"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"detail": "File must be an image"})),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store);

        let upload = FileUpload::new("rx.png", mime::IMAGE_PNG, vec![1, 2, 3]).unwrap();
        let err = client.analyze_prescription(upload).await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 400, .. }));
        assert_eq!(err.detail(), Some("File must be an image"));
    }

    #[tokio::test]
    async fn test_structured_data_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/12/structured"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prescription_id": 12,
                "filename": "rx.jpg",
                "created_at": "2024-05-01T10:30:00",
                "data": {"patient": {}, "medications": [{"medicine_name": "Cetirizine", "frequency_code": "QD"}]}
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemorySessionStore::with_pair(&pair("A1", "R1")));
        let client = client_with(&server, store);

        let record = client.structured_data(12).await.unwrap();
        assert_eq!(record.prescription_id, 12);
        assert_eq!(record.data.medications[0].display_name(), "Cetirizine");
    }

    #[tokio::test]
    async fn test_invalid_json_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prescriptions/history"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client_with(&server, Arc::new(MemorySessionStore::new()));
        assert!(matches!(
            client.history().await,
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://localhost:8000/", Arc::new(MemorySessionStore::new())).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
