use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiClient, ApiError, parse_body};
use crate::model::SubscriptionRequest;

/// Answer to `POST /subscribe`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscribeConfirmation {
    pub status: String,
}

impl ApiClient {
    /// Asks the backend to watch the journey and push a notification on `request.channel`
    #[tracing::instrument(err, skip(self), fields(channel = %request.channel))]
    pub async fn post_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscribeConfirmation, ApiError> {
        let url = self.url("subscribe");

        let body = self.execute(self.http.post(&url).json(request), &url).await?;

        let confirmation: SubscribeConfirmation = parse_body(&url, body)?;

        if confirmation.status != "ok" {
            return Err(ApiError::Rejected(confirmation.status));
        }

        info!("subscribed to {}", request.route_id);

        Ok(confirmation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::test_server, model::DirectionId};
    use axum::{Json, Router, extract::State, routing::post};
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Mutex;

    fn request() -> SubscriptionRequest {
        SubscriptionRequest {
            route_id: "MTA NYCT_M86+".into(),
            direction_id: DirectionId::Zero,
            from_stop: "MTA_401901".into(),
            to_stop: "MTA_401905".into(),
            arrival_time: "2019-06-02T18:35:00-04:00".into(),
            channel: "c-1".into(),
        }
    }

    #[tokio::test]
    async fn posts_serialised_journey() {
        let received = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
        let app = Router::new()
            .route(
                "/subscribe",
                post(
                    |State(received): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                     Json(body): Json<serde_json::Value>| async move {
                        received.lock().await.push(body);
                        Json(serde_json::json!({"status": "ok"}))
                    },
                ),
            )
            .with_state(received.clone());
        let client = ApiClient::new(test_server::spawn(app).await, Duration::from_secs(5)).unwrap();

        let confirmation = client.post_subscription(&request()).await.unwrap();

        assert_eq!(confirmation.status, "ok");
        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["directionID"], 0);
        assert_eq!(received[0]["fromStop"], "MTA_401901");
        assert_eq!(received[0]["channel"], "c-1");
    }

    #[tokio::test]
    async fn refused_subscription() {
        let app = Router::new().route(
            "/subscribe",
            post(|| async { Json(serde_json::json!({"status": "unknown route"})) }),
        );
        let client = ApiClient::new(test_server::spawn(app).await, Duration::from_secs(5)).unwrap();

        let err = client.post_subscription(&request()).await.unwrap_err();

        assert!(matches!(err, ApiError::Rejected(ref status) if status == "unknown route"));
    }
}
