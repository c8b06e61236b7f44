//! HTTP binding for the remote store contract.
//!
//! The actual HTTP client is abstracted via a trait so different
//! implementations (reqwest, hyper, a loopback for tests) can plug in. This
//! module only maps the REST surface onto [`RemoteStore`]:
//!
//! - `GET /sync/{id}` → current row; 404 means no snapshot yet
//! - `POST /sync/{id}` → `{ version }` on success, the current row with
//!   status 409 on a version mismatch
//! - 401 on either call surfaces as [`SyncError::Auth`] and is never
//!   retried with backoff

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteStore;
use async_trait::async_trait;
use serde::Deserialize;
use snapsync_protocol::{FetchResponse, PushOutcome, PushRequest};
use std::sync::Arc;

/// A plain HTTP response: status code and body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual transport. Errors returned
/// here are treated as transient network failures.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    async fn post(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: Vec<u8>,
    ) -> Result<HttpResponse, String>;
}

/// Supplies the bearer credential for remote calls.
///
/// Owned by the external authentication collaborator; the engine only asks
/// for the current token and reports 401 responses through the status
/// channel.
pub trait AuthProvider: Send + Sync {
    /// Returns the current bearer token, if a session exists.
    fn bearer_token(&self) -> Option<String>;
}

/// An [`AuthProvider`] holding a fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wraps the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AuthProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Body of a successful push response.
#[derive(Debug, Deserialize)]
struct PushAcceptedBody {
    version: u64,
}

/// [`RemoteStore`] over an HTTP backend.
pub struct HttpRemote {
    base_url: String,
    client: Arc<dyn HttpClient>,
    auth: Arc<dyn AuthProvider>,
}

impl HttpRemote {
    /// Creates a remote rooted at `base_url` (no trailing slash).
    pub fn new(
        base_url: impl Into<String>,
        client: Arc<dyn HttpClient>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client,
            auth,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sync_url(&self, entity_id: &str) -> String {
        format!("{}/sync/{}", self.base_url, entity_id)
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> SyncResult<T> {
        serde_json::from_slice(body)
            .map_err(|err| SyncError::Protocol(format!("undecodable response body: {err}")))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch(&self, entity_id: &str) -> SyncResult<Option<FetchResponse>> {
        let token = self.auth.bearer_token();
        let response = self
            .client
            .get(&self.sync_url(entity_id), token.as_deref())
            .await
            .map_err(SyncError::Network)?;

        match response.status {
            200 => Ok(Some(Self::decode(&response.body)?)),
            404 => Ok(None),
            401 => Err(SyncError::Auth("remote rejected credential".into())),
            status => Err(SyncError::Network(format!("unexpected status {status}"))),
        }
    }

    async fn push(&self, entity_id: &str, request: PushRequest) -> SyncResult<PushOutcome> {
        let body = serde_json::to_vec(&request)
            .map_err(|err| SyncError::Protocol(format!("unencodable push request: {err}")))?;

        let token = self.auth.bearer_token();
        let response = self
            .client
            .post(&self.sync_url(entity_id), token.as_deref(), body)
            .await
            .map_err(SyncError::Network)?;

        match response.status {
            200 => {
                let accepted: PushAcceptedBody = Self::decode(&response.body)?;
                Ok(PushOutcome::Accepted {
                    version: accepted.version,
                })
            }
            409 => {
                let current: FetchResponse = Self::decode(&response.body)?;
                Ok(PushOutcome::Conflict { current })
            }
            401 => Err(SyncError::Auth("remote rejected credential".into())),
            status => Err(SyncError::Network(format!("unexpected status {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use uuid::Uuid;

    /// A scripted client returning canned responses.
    #[derive(Default)]
    struct TestClient {
        responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
        requests: Mutex<Vec<(String, Option<String>)>>,
    }

    impl TestClient {
        fn script(&self, response: Result<HttpResponse, String>) {
            self.responses.lock().push_back(response);
        }

        fn next(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String> {
            self.requests
                .lock()
                .push((url.to_string(), bearer.map(str::to_string)));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted response".into()))
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String> {
            self.next(url, bearer)
        }

        async fn post(
            &self,
            url: &str,
            bearer: Option<&str>,
            _body: Vec<u8>,
        ) -> Result<HttpResponse, String> {
            self.next(url, bearer)
        }
    }

    fn make_remote(client: Arc<TestClient>) -> HttpRemote {
        HttpRemote::new(
            "https://sync.example.com/",
            client,
            Arc::new(StaticToken::new("token-1")),
        )
    }

    fn make_request() -> PushRequest {
        PushRequest {
            idempotency_key: Uuid::new_v4(),
            base_version: 3,
            payload: vec![1],
            updated_at_ms: 100,
            device_id: "device-a".into(),
        }
    }

    #[test]
    fn base_url_is_normalized() {
        let client = Arc::new(TestClient::default());
        let remote = make_remote(client);
        assert_eq!(remote.base_url(), "https://sync.example.com");
        assert_eq!(
            remote.sync_url("user-1"),
            "https://sync.example.com/sync/user-1"
        );
    }

    #[tokio::test]
    async fn fetch_parses_row_and_sends_bearer() {
        let client = Arc::new(TestClient::default());
        let row = FetchResponse {
            version: 3,
            payload: vec![1],
            updated_at_ms: 100,
            device_id: "device-b".into(),
        };
        client.script(Ok(HttpResponse::new(
            200,
            serde_json::to_vec(&row).unwrap(),
        )));

        let remote = make_remote(Arc::clone(&client));
        let fetched = remote.fetch("user-1").await.unwrap();
        assert_eq!(fetched, Some(row));

        let requests = client.requests.lock();
        assert_eq!(requests[0].1.as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn fetch_404_means_no_snapshot() {
        let client = Arc::new(TestClient::default());
        client.script(Ok(HttpResponse::new(404, Vec::new())));

        let remote = make_remote(client);
        assert!(remote.fetch("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_401_is_an_auth_error() {
        let client = Arc::new(TestClient::default());
        client.script(Ok(HttpResponse::new(401, Vec::new())));

        let remote = make_remote(client);
        assert!(remote.fetch("user-1").await.unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn push_200_is_accepted() {
        let client = Arc::new(TestClient::default());
        client.script(Ok(HttpResponse::new(200, br#"{"version":4}"#.to_vec())));

        let remote = make_remote(client);
        let outcome = remote.push("user-1", make_request()).await.unwrap();
        assert_eq!(outcome.accepted_version(), Some(4));
    }

    #[tokio::test]
    async fn push_409_carries_current_row() {
        let client = Arc::new(TestClient::default());
        let current = FetchResponse {
            version: 5,
            payload: vec![9],
            updated_at_ms: 900,
            device_id: "device-b".into(),
        };
        client.script(Ok(HttpResponse::new(
            409,
            serde_json::to_vec(&current).unwrap(),
        )));

        let remote = make_remote(client);
        match remote.push("user-1", make_request()).await.unwrap() {
            PushOutcome::Conflict { current: row } => assert_eq!(row, current),
            PushOutcome::Accepted { .. } => panic!("expected conflict"),
        }
    }

    #[tokio::test]
    async fn transport_failure_is_retryable() {
        let client = Arc::new(TestClient::default());
        client.script(Err("connection refused".into()));

        let remote = make_remote(client);
        let err = remote.fetch("user-1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let client = Arc::new(TestClient::default());
        client.script(Ok(HttpResponse::new(503, Vec::new())));

        let remote = make_remote(client);
        let err = remote.fetch("user-1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn garbage_body_is_a_protocol_error() {
        let client = Arc::new(TestClient::default());
        client.script(Ok(HttpResponse::new(200, b"not json".to_vec())));

        let remote = make_remote(client);
        let err = remote.fetch("user-1").await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
