//! Notification server API: acknowledgements and startup backfill.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Value, json};

use super::{RestClient, RestError};
use crate::application::ports::{AckError, AckPort};

/// One page of recent notifications, in stored form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillPage {
    /// Raw notification records, newest first.
    pub notifications: Vec<Value>,
    /// Whether the server holds more than were returned.
    pub has_more: bool,
}

/// Client for the notification server's REST endpoints.
#[derive(Debug, Clone)]
pub struct NotificationApi {
    client: RestClient,
    ack_url: Url,
    list_url: Url,
}

impl NotificationApi {
    /// Create a client for the given ack and list endpoints.
    #[must_use]
    pub const fn new(client: RestClient, ack_url: Url, list_url: Url) -> Self {
        Self {
            client,
            ack_url,
            list_url,
        }
    }

    /// Fetch up to `limit` recent notifications.
    ///
    /// Accepts `{"notifications": [...], "has_more": bool}` or a bare array.
    ///
    /// # Errors
    ///
    /// Returns `RestError` if the request fails or the body has neither shape.
    pub async fn fetch_recent(&self, limit: usize) -> Result<BackfillPage, RestError> {
        let mut url = self.list_url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let body: Value = self.client.get_json(&url).await?;
        match body {
            Value::Array(notifications) => Ok(BackfillPage {
                notifications,
                has_more: false,
            }),
            Value::Object(mut object) => match object.remove("notifications") {
                Some(Value::Array(notifications)) => Ok(BackfillPage {
                    notifications,
                    has_more: object
                        .get("has_more")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }),
                _ => Err(RestError::Decode(
                    "expected a notifications array".to_string(),
                )),
            },
            _ => Err(RestError::Decode(
                "expected a notifications array".to_string(),
            )),
        }
    }
}

#[async_trait]
impl AckPort for NotificationApi {
    async fn acknowledge(&self, notification_id: &str) -> Result<(), AckError> {
        let body = json!({ "notification_id": notification_id });
        match self.client.post_json::<_, Value>(&self.ack_url, &body).await {
            // A 2xx with an unexpected body still means the ack landed.
            Ok(_) | Err(RestError::Decode(_)) => Ok(()),
            Err(RestError::Status { status, body }) => Err(AckError::Rejected { status, body }),
            Err(e @ (RestError::Network(_) | RestError::Client(_))) => Err(AckError::Transport {
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> NotificationApi {
        let base = Url::parse(&server.uri()).unwrap();
        NotificationApi::new(
            RestClient::new(Duration::from_secs(2), Some("tok".into())).unwrap(),
            base.join("/v1/notifications/ack").unwrap(),
            base.join("/v1/notifications").unwrap(),
        )
    }

    #[tokio::test]
    async fn ack_posts_notification_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/ack"))
            .and(body_json(json!({"notification_id": "n-7"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "acknowledged"})))
            .expect(1)
            .mount(&server)
            .await;

        api(&server).acknowledge("n-7").await.unwrap();
    }

    #[tokio::test]
    async fn ack_rejection_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Notification not found"))
            .mount(&server)
            .await;

        let err = api(&server).acknowledge("missing").await.unwrap_err();
        assert!(matches!(err, AckError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn backfill_reads_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/notifications"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "notifications": [{"id": "a", "title": "t"}, {"id": "b", "title": "u"}],
                "has_more": true
            })))
            .mount(&server)
            .await;

        let page = api(&server).fetch_recent(20).await.unwrap();
        assert_eq!(page.notifications.len(), 2);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn backfill_rejects_other_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .mount(&server)
            .await;

        let err = api(&server).fetch_recent(5).await.unwrap_err();
        assert!(matches!(err, RestError::Decode(_)));
    }
}
