//! Client for the Pusher channel the backend pushes departure notifications on
pub mod protocol;

use std::{collections::BTreeSet, time::Duration};
use tokio::{
    sync::mpsc::{self, Receiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{Instrument, info, info_span};

use crate::{background_services::notification_listener, model::DepartureNotification};

#[derive(Debug, Clone, PartialEq)]
pub struct PusherConfig {
    pub key: String,
    pub cluster: String,
    /// Replaces `wss://ws-<cluster>.pusher.com`, for self hosted servers
    pub host: Option<String>,
    pub reconnect: ReconnectPolicy,
    /// How long to wait for the server to greet us after connecting
    pub handshake_timeout: Duration,
    /// After pinging an idle connection, how long the server gets to answer
    pub pong_timeout: Duration,
}

impl PusherConfig {
    pub fn new(key: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cluster: cluster.into(),
            host: None,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(30),
        }
    }

    pub fn socket_url(&self) -> String {
        let host = match &self.host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("wss://ws-{}.pusher.com", self.cluster),
        };

        format!(
            "{host}/app/{}?protocol={}&client=delay-guardian&version={}&flag=false",
            self.key,
            protocol::PROTOCOL_VERSION,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

/// Exponential backoff between reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PusherError {
    #[error("couldn't connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("websocket error")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("unexpected frame from pusher: {0}")]
    Protocol(String),

    #[error("pusher didn't greet us within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("pusher stopped answering pings")]
    Unresponsive,

    #[error("pusher closed the connection: {message} ({code:?})")]
    Closed { code: Option<u16>, message: String },

    #[error("pusher refused the connection: {message} ({code})")]
    Fatal { code: u16, message: String },
}

/// Things the listener reports back
#[derive(Debug)]
pub enum ListenerEvent {
    Connected { socket_id: String },
    Subscribed { channel: String },
    Notification {
        channel: String,
        notification: DepartureNotification,
    },
    Disconnected { reason: String, retry_in: Duration },
    /// The listener gave up and has stopped
    Fatal(PusherError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerCommand {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

/// Owns the connection settings.
/// Built once by the application and handed to whoever needs to listen.
#[derive(Debug, Clone)]
pub struct PusherClient {
    config: PusherConfig,
}

impl PusherClient {
    pub fn new(config: PusherConfig) -> Self {
        Self { config }
    }

    /// Starts listening for departure notifications on `channels`.
    /// Must be called from within a tokio runtime.
    pub fn listen(&self, channels: impl IntoIterator<Item = String>) -> NotificationListener {
        let channels: BTreeSet<String> = channels.into_iter().collect();
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::channel(32);

        info!("listening on {} channels", channels.len());

        let task = tokio::spawn(
            notification_listener::run(
                self.config.clone(),
                channels,
                command_receiver,
                event_sender,
            )
            .instrument(info_span!("notification_listener")),
        );

        NotificationListener {
            commands: command_sender,
            events: event_receiver,
            task: Some(task),
        }
    }
}

/// Handle to a running listener. Dropping it tears the connection down.
#[derive(Debug)]
pub struct NotificationListener {
    commands: UnboundedSender<ListenerCommand>,
    events: Receiver<ListenerEvent>,
    task: Option<JoinHandle<()>>,
}

impl NotificationListener {
    pub fn subscribe(&self, channel: impl Into<String>) {
        // Only fails if the task already stopped, which next_event reports
        _ = self.commands.send(ListenerCommand::Subscribe(channel.into()));
    }

    pub fn unsubscribe(&self, channel: impl Into<String>) {
        _ = self.commands.send(ListenerCommand::Unsubscribe(channel.into()));
    }

    /// `None` once the listener has stopped
    pub async fn next_event(&mut self) -> Option<ListenerEvent> {
        self.events.recv().await
    }

    /// Waits for the next notification, skipping connection chatter.
    /// Returns the error that made the listener give up, if it did.
    pub async fn next_notification(
        &mut self,
    ) -> Result<Option<(String, DepartureNotification)>, PusherError> {
        while let Some(event) = self.next_event().await {
            match event {
                ListenerEvent::Notification {
                    channel,
                    notification,
                } => return Ok(Some((channel, notification))),
                ListenerEvent::Fatal(err) => return Err(err),
                _ => {}
            }
        }

        Ok(None)
    }

    pub async fn shutdown(mut self) {
        _ = self.commands.send(ListenerCommand::Shutdown);

        if let Some(task) = self.task.take() {
            _ = task.await;
        }
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_for_cluster_and_custom_host() {
        let mut config = PusherConfig::new("66f6e62226c2a035a177", "eu");
        assert!(
            config
                .socket_url()
                .starts_with("wss://ws-eu.pusher.com/app/66f6e62226c2a035a177?protocol=7&")
        );

        config.host = Some("ws://127.0.0.1:6001/".into());
        assert!(
            config
                .socket_url()
                .starts_with("ws://127.0.0.1:6001/app/66f6e62226c2a035a177?protocol=7&")
        );
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        let mut delay = policy.initial_delay;
        let mut delays = vec![];
        for _ in 0..7 {
            delays.push(delay.as_secs());
            delay = policy.next_delay(delay);
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }
}
