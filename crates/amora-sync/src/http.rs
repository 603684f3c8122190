//! REST client for the Amora API.
//!
//! Attaches the stored bearer credential to every request and folds
//! transport and status failures into [`SyncError`].

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::store::keys;
use crate::{ClientConfig, KeyValueStore, SyncError};

/// HTTP client bound to one remote origin.
pub struct ApiClient {
    http: Client,
    base_url: String,
    store: Arc<dyn KeyValueStore>,
}

impl ApiClient {
    /// Create a client for `config.base_url`, reading credentials from `store`.
    pub fn new(config: &ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, SyncError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            store,
        })
    }

    /// `GET path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let response = self.send::<()>(Method::GET, path, &[], None).await?;
        Ok(response.json().await?)
    }

    /// `GET path?query` and decode the JSON body.
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let response = self.send::<()>(Method::GET, path, query, None).await?;
        Ok(response.json().await?)
    }

    /// `POST path` with a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, SyncError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::POST, path, &[], Some(body)).await?;
        Ok(response.json().await?)
    }

    /// `PUT path` with a JSON body and decode the JSON response.
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, SyncError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::PUT, path, &[], Some(body)).await?;
        Ok(response.json().await?)
    }

    /// `PUT path` without a body; any response body is discarded.
    pub async fn put_empty(&self, path: &str) -> Result<(), SyncError> {
        self.send::<()>(Method::PUT, path, &[], None).await?;
        Ok(())
    }

    async fn bearer(&self) -> Option<String> {
        match self.store.get(keys::TOKEN).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "failed to read credential, sending request unauthenticated");
                None
            }
        }
    }

    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Response, SyncError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }

        debug!(%method, path, "sending request");
        let response = request.send().await?;
        Self::check_status(response, path).await
    }

    /// Map non-success statuses onto the error taxonomy.
    async fn check_status(response: Response, path: &str) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => {
                warn!(path, "credential rejected");
                Err(SyncError::Auth(error_message(&text, status)))
            }
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(path.to_string())),
            _ => Err(SyncError::Server {
                status: status.as_u16(),
                message: error_message(&text, status),
            }),
        }
    }
}

/// Best human-readable message from an error body.
fn error_message(text: &str, status: StatusCode) -> String {
    if let Ok(serde_json::Value::Object(body)) = serde_json::from_str::<serde_json::Value>(text) {
        for field in ["message", "error"] {
            if let Some(serde_json::Value::String(message)) = body.get(field) {
                return message.clone();
            }
        }
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(uri: &str, store: Arc<MemoryStore>) -> ApiClient {
        let config = ClientConfig::builder().base_url(uri).build().unwrap();
        ApiClient::new(&config, store).unwrap()
    }

    #[tokio::test]
    async fn attaches_bearer_when_token_stored() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/profiles/user/7"))
            .and(header("Authorization", "Bearer t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ana"})))
            .mount(&mock_server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.set(keys::TOKEN, "t1").await.unwrap();
        let client = client_for(&mock_server.uri(), store);

        let body: serde_json::Value = client.get_json("/profiles/user/7").await.unwrap();
        assert_eq!(body["name"], json!("Ana"));
    }

    #[tokio::test]
    async fn sends_query_parameters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/messages/unread"))
            .and(query_param("matchId", "3"))
            .and(query_param("userId", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Arc::new(MemoryStore::new()));
        let body: serde_json::Value = client
            .get_json_with_query(
                "/messages/unread",
                &[("matchId", "3".to_string()), ("userId", "7".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(body["count"], json!(2));
    }

    #[tokio::test]
    async fn maps_unauthorized_to_auth() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
            )
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Arc::new(MemoryStore::new()));
        let result: Result<serde_json::Value, _> =
            client.post_json("/auth/login", &json!({})).await;

        match result {
            Err(SyncError::Auth(message)) => assert_eq!(message, "Bad credentials"),
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn maps_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/preferences/user/404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Arc::new(MemoryStore::new()));
        let result = client
            .get_json::<serde_json::Value>("/preferences/user/404")
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn maps_server_errors_with_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/preferences/7"))
            .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Arc::new(MemoryStore::new()));
        let result = client
            .put_json::<_, serde_json::Value>("/preferences/7", &json!({}))
            .await;

        match result {
            Err(SyncError::Server { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "database down");
            }
            other => panic!("expected Server, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/matches/user/7"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Arc::new(MemoryStore::new()));
        let result = client.get_json::<Vec<serde_json::Value>>("/matches/user/7").await;
        assert!(matches!(result, Err(SyncError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let client = client_for("http://127.0.0.1:1", Arc::new(MemoryStore::new()));
        let result = client.get_json::<serde_json::Value>("/profiles/user/1").await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[test]
    fn error_message_fallbacks() {
        assert_eq!(
            error_message(r#"{"error":"Forbidden"}"#, StatusCode::FORBIDDEN),
            "Forbidden"
        );
        assert_eq!(
            error_message("", StatusCode::BAD_GATEWAY),
            "Bad Gateway"
        );
    }
}
