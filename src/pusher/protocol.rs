//! Frames of the Pusher websocket protocol, version 7
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::model::DepartureNotification;

pub const PROTOCOL_VERSION: u8 = 7;

pub const DEPARTURE_NOTIFICATION: &str = "departureNotification";

const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const ERROR: &str = "pusher:error";
const PING: &str = "pusher:ping";
const PONG: &str = "pusher:pong";
const SUBSCRIBE: &str = "pusher:subscribe";
const UNSUBSCRIBE: &str = "pusher:unsubscribe";
const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

/// A frame as it travels over the socket. `data` is usually a JSON document encoded as a string.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Decodes `data`, whether it was sent as an object or as a string holding one
    pub fn data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Value::String(encoded) => serde_json::from_str(encoded),
            other => T::deserialize(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    /// Seconds of silence after which the client should ping
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<u16>,
}

/// What a frame from the server means to the listener
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ConnectionEstablished(ConnectionEstablished),
    SubscriptionSucceeded { channel: String },
    Ping,
    Pong,
    Error(ErrorData),
    Notification {
        channel: String,
        notification: DepartureNotification,
    },
    /// Anything else, e.g. events this client doesn't bind to
    Ignored { event: String },
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("malformed frame {frame}")]
    Malformed {
        frame: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed data in {event} frame")]
    MalformedData {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn parse_server_frame(text: &str) -> Result<ServerEvent, FrameError> {
    let frame: Frame = serde_json::from_str(text).map_err(|source| FrameError::Malformed {
        frame: text.to_string(),
        source,
    })?;

    let malformed = |source| FrameError::MalformedData {
        event: frame.event.clone(),
        source,
    };

    let event = match frame.event.as_str() {
        CONNECTION_ESTABLISHED => {
            ServerEvent::ConnectionEstablished(frame.data().map_err(malformed)?)
        }
        SUBSCRIPTION_SUCCEEDED => ServerEvent::SubscriptionSucceeded {
            channel: frame.channel.clone().unwrap_or_default(),
        },
        PING => ServerEvent::Ping,
        PONG => ServerEvent::Pong,
        ERROR => ServerEvent::Error(frame.data().map_err(malformed)?),
        DEPARTURE_NOTIFICATION => ServerEvent::Notification {
            channel: frame.channel.clone().unwrap_or_default(),
            notification: frame.data().map_err(malformed)?,
        },
        other => ServerEvent::Ignored {
            event: other.to_string(),
        },
    };

    Ok(event)
}

pub fn subscribe_frame(channel: &str) -> String {
    json!({ "event": SUBSCRIBE, "data": { "channel": channel } }).to_string()
}

pub fn unsubscribe_frame(channel: &str) -> String {
    json!({ "event": UNSUBSCRIBE, "data": { "channel": channel } }).to_string()
}

pub fn ping_frame() -> String {
    json!({ "event": PING, "data": {} }).to_string()
}

pub fn pong_frame() -> String {
    json!({ "event": PONG, "data": {} }).to_string()
}

/// How the listener should react to an error code sent by Pusher
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorAction {
    /// 4000-4099: the connection must not be retried, e.g. unknown app key
    GiveUp,
    /// 4100-4199: over capacity, retry after backing off
    Backoff,
    /// 4200-4299 and other connection level codes: retry straight away
    ReconnectNow,
    /// No code means the error is about a single request, the connection is fine
    Ignore,
}

pub fn error_action(code: Option<u16>) -> ErrorAction {
    match code {
        Some(4000..=4099) => ErrorAction::GiveUp,
        Some(4100..=4199) => ErrorAction::Backoff,
        Some(_) => ErrorAction::ReconnectNow,
        None => ErrorAction::Ignore,
    }
}
