use tracing::info;

use super::{ApiClient, ApiError, parse_body};
use crate::model::RouteTable;

/// What the backend answers while it's still loading the bus feed
const NOT_READY_BODY: &str = "Stops not yet fetched";

impl ApiClient {
    /// Fetches every route with its stops in both directions
    #[tracing::instrument(err, skip(self), fields(base_url = %self.base_url))]
    pub async fn fetch_route_table(&self) -> Result<RouteTable, ApiError> {
        let url = self.url("getStops");

        let body = self.execute(self.http.get(&url), &url).await?;

        if body.trim() == NOT_READY_BODY {
            return Err(ApiError::NotReady);
        }

        let routes: RouteTable = parse_body(&url, body)?;

        info!("got {} routes", routes.len());

        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::test_server, model::DirectionId};
    use axum::{Router, routing::get};
    use std::time::Duration;

    #[tokio::test]
    async fn fetches_route_table() {
        let url = test_server::spawn(Router::new().route(
            "/getStops",
            get(|| async {
                r#"{"MTA NYCT_M86+":{"0":[{"id":"MTA_401901","name":"1 AV/E 86 ST"}],"1":[]}}"#
            }),
        ))
        .await;
        let client = ApiClient::new(url, Duration::from_secs(5)).unwrap();

        let routes = client.fetch_route_table().await.unwrap();

        assert_eq!(routes.len(), 1);
        assert_eq!(
            routes.stops("MTA NYCT_M86+", DirectionId::Zero).unwrap()[0].id,
            "MTA_401901"
        );
        assert!(routes.stops("MTA NYCT_M86+", DirectionId::One).unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_still_loading() {
        let url = test_server::spawn(
            Router::new().route("/getStops", get(|| async { NOT_READY_BODY })),
        )
        .await;
        let client = ApiClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.fetch_route_table().await.unwrap_err();

        assert!(matches!(err, ApiError::NotReady));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn malformed_table_is_a_parse_error() {
        let url = test_server::spawn(
            Router::new().route("/getStops", get(|| async { r#"{"MTA NYCT_M86+":{"7":[]}}"# })),
        )
        .await;
        let client = ApiClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.fetch_route_table().await.unwrap_err();

        assert!(matches!(err, ApiError::Parse { .. }), "{err:?}");
        assert!(!err.is_transient());
    }
}
