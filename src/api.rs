//! Client for the DelayGuardian backend
pub mod stops;
pub mod subscribe;

pub use subscribe::*;

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::{net::IpAddr, time::Duration};
use tracing::{Instrument, info_span};

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.into();

        let mut builder = Client::builder().timeout(timeout).connect_timeout(timeout);
        // A backend on this machine should never go through the system proxy
        if is_loopback(&base_url) {
            builder = builder.no_proxy();
        }

        let http = builder.build().map_err(|source| ApiError::Network {
            url: base_url.clone(),
            source,
        })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends the request and returns the body of a successful response
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<String, ApiError> {
        let response = request
            .send()
            .instrument(info_span!("Sending request"))
            .await
            .map_err(|e| ApiError::from_reqwest(url, e))?;

        let status = response.status();

        let body = response
            .text()
            .instrument(info_span!("Reading body of response"))
            .await
            .map_err(|e| ApiError::from_reqwest(url, e))?;

        if !status.is_success() {
            return Err(ApiError::Server {
                url: url.to_string(),
                status,
                body,
            });
        }

        Ok(body)
    }
}

fn is_loopback(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return false;
    };

    match url.host_str() {
        Some(host) if host.eq_ignore_ascii_case("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

fn parse_body<T: DeserializeOwned>(url: &str, body: String) -> Result<T, ApiError> {
    serde_json::from_str(&body).map_err(|source| ApiError::Parse {
        url: url.to_string(),
        source,
        body,
    })
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("couldn't reach {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered with {status}: {body}")]
    Server {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("couldn't parse the response from {url} \n{body}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("the backend hasn't loaded its stops yet")]
    NotReady,

    #[error("subscription was refused with status {0:?}")]
    Rejected(String),
}

impl ApiError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout {
                url: url.to_string(),
            }
        } else {
            ApiError::Network {
                url: url.to_string(),
                source: e,
            }
        }
    }

    /// Whether trying again later could help
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network { .. } | ApiError::Timeout { .. } | ApiError::NotReady => true,
            ApiError::Server { status, .. } => status.is_server_error(),
            ApiError::Parse { .. } | ApiError::Rejected(_) => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use axum::Router;
    use tokio::net::TcpListener;

    /// Serves `app` on a random local port and returns its base url
    pub async fn spawn(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};

    #[test]
    fn loopback_is_decided_by_host() {
        assert!(is_loopback("http://127.0.0.1:7891"));
        assert!(is_loopback("http://LOCALHOST:7891/"));
        assert!(is_loopback("http://[::1]:7891"));
        assert!(!is_loopback("http://localhost.example.com"));
        assert!(!is_loopback("http://backend:7891"));
        assert!(!is_loopback("not a url"));
    }

    #[test]
    fn unreachable_backend_error_names_the_url() {
        let client = reqwest::Client::new();
        let source = client.get("http://").build().unwrap_err();

        let err = ApiError::Network {
            url: "http://backend:7891".to_string(),
            source,
        };

        assert_eq!(err.to_string(), "couldn't reach http://backend:7891");
    }

    #[tokio::test]
    async fn server_errors_keep_status_and_body() {
        let url = test_server::spawn(Router::new().route(
            "/getStops",
            get(|| async { (StatusCode::BAD_GATEWAY, "bus feed down") }),
        ))
        .await;
        let client = ApiClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.fetch_route_table().await.unwrap_err();

        match &err {
            ApiError::Server { status, body, .. } => {
                assert_eq!(*status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "bus feed down");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let url = test_server::spawn(Router::new().route(
            "/getStops",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        ))
        .await;
        let client = ApiClient::new(url, Duration::from_millis(200)).unwrap();

        let err = client.fetch_route_table().await.unwrap_err();

        assert!(matches!(err, ApiError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        // Nothing listens on the discard port
        let client = ApiClient::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9");

        let err = client.fetch_route_table().await.unwrap_err();

        assert!(
            matches!(err, ApiError::Network { .. } | ApiError::Timeout { .. }),
            "{err:?}"
        );
    }
}
