//! REST Client
//!
//! Thin JSON wrapper over `reqwest` shared by the poll schedulers and the
//! notification API. Requests are single-shot: polling retries on its next
//! tick and acknowledgements are never retried.

mod notifications;

use std::time::Duration;

use reqwest::{Client, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use notifications::{BackfillPage, NotificationApi};

/// Longest error body kept in `RestError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// REST request errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestError {
    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Connection, timeout or body read failure.
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Body was not the expected JSON.
    #[error("JSON decode error: {0}")]
    Decode(String),
}

/// JSON-over-HTTP client with a fixed timeout and optional bearer token.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    bearer_token: Option<String>,
}

impl RestClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `RestError::Client` if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration, bearer_token: Option<String>) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Client(e.to_string()))?;

        Ok(Self {
            client,
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
        })
    }

    /// GET `url` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns `RestError` on network failure, non-2xx status or decode failure.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, RestError> {
        let request = self.authorize(self.client.get(url.clone()));
        Self::send(request).await
    }

    /// POST a JSON body to `url` and decode the JSON response.
    ///
    /// An empty response body decodes as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns `RestError` on network failure, non-2xx status or decode failure.
    pub async fn post_json<B, T>(&self, url: &Url, body: &B) -> Result<T, RestError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.authorize(self.client.post(url.clone()).json(body));
        Self::send(request).await
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, RestError> {
        let response = request
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body: truncate(&text),
            });
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| RestError::Decode(e.to_string()))
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(server: &MockServer, route: &str) -> Url {
        Url::parse(&format!("{}{route}", server.uri())).unwrap()
    }

    fn client(token: Option<&str>) -> RestClient {
        RestClient::new(Duration::from_secs(2), token.map(str::to_string)).unwrap()
    }

    #[tokio::test]
    async fn get_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orders": 12})))
            .mount(&server)
            .await;

        let value: Value = client(None).get_json(&url(&server, "/stats")).await.unwrap();
        assert_eq!(value["orders"], 12);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(None)
            .get_json::<Value>(&url(&server, "/portfolio"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RestError::Status {
                status: 503,
                body: "maintenance".into()
            }
        );
    }

    #[tokio::test]
    async fn invalid_json_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(None)
            .get_json::<Value>(&url(&server, "/orders"))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Decode(_)));
    }

    #[tokio::test]
    async fn post_sends_bearer_token_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/ack"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({"notification_id": "n-1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let value: Value = client(Some("secret"))
            .post_json(&url(&server, "/v1/notifications/ack"), &json!({"notification_id": "n-1"}))
            .await
            .unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let err = client(None)
            .get_json::<Value>(&Url::parse("http://127.0.0.1:1/orders").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Network(_)));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY + 10);
        let truncated = truncate(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.len(), MAX_ERROR_BODY + 3);
    }
}
