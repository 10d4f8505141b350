use clap::Args;
use std::{path::PathBuf, time::Duration};

use crate::{
    api::{ApiClient, ApiError},
    pusher::PusherConfig,
};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:7891";
pub const DEFAULT_PUSHER_KEY: &str = "66f6e62226c2a035a177";
pub const DEFAULT_PUSHER_CLUSTER: &str = "eu";

/// Settings shared by every command. Flags win over the environment, which may come from `.env`.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct Settings {
    /// Base url of the DelayGuardian backend
    #[arg(long, env = "DELAY_GUARDIAN_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    #[arg(long, env = "PUSHER_KEY", default_value = DEFAULT_PUSHER_KEY, global = true)]
    pub pusher_key: String,

    #[arg(long, env = "PUSHER_CLUSTER", default_value = DEFAULT_PUSHER_CLUSTER, global = true)]
    pub pusher_cluster: String,

    /// Websocket base url replacing the cluster's, e.g. ws://127.0.0.1:6001
    #[arg(long, env = "PUSHER_HOST", global = true)]
    pub pusher_host: Option<String>,

    /// Timeout for each call to the backend
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub http_timeout_secs: u64,

    #[arg(long, env = "LOG_DIR", default_value = "./logs", global = true)]
    pub log_dir: PathBuf,

    /// Export spans over OTLP/gRPC when set
    #[arg(long, env = "OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,
}

impl Settings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn api_client(&self) -> Result<ApiClient, ApiError> {
        ApiClient::new(&self.api_url, self.http_timeout())
    }

    pub fn pusher_config(&self) -> PusherConfig {
        let mut config = PusherConfig::new(&self.pusher_key, &self.pusher_cluster);
        config.host = self.pusher_host.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "delay-guardian",
            "--api-url",
            "http://backend:7891/",
            "--pusher-host",
            "ws://127.0.0.1:6001",
            "--http-timeout-secs",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.settings.http_timeout(), Duration::from_secs(3));
        assert_eq!(
            cli.settings.api_client().unwrap().base_url(),
            "http://backend:7891"
        );
        let pusher = cli.settings.pusher_config();
        assert_eq!(pusher.host.as_deref(), Some("ws://127.0.0.1:6001"));
        assert!(pusher.socket_url().starts_with("ws://127.0.0.1:6001/app/"));
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let cli = TestCli::try_parse_from(["delay-guardian", "--http-timeout-secs", "soon"]);
        assert!(cli.is_err());
    }
}
