//! Keeps a Pusher connection alive and forwards departure notifications to the session
use futures::{Sink, SinkExt, StreamExt};
use std::{collections::BTreeSet, time::Duration};
use tokio::{
    select,
    sync::mpsc::{Sender, UnboundedReceiver},
    time::{Instant, sleep, sleep_until, timeout},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message, protocol::CloseFrame},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::pusher::{
    ListenerCommand, ListenerEvent, PusherConfig, PusherError,
    protocol::{
        ConnectionEstablished, ErrorAction, ServerEvent, error_action, parse_server_frame,
        ping_frame, pong_frame, subscribe_frame, unsubscribe_frame,
    },
};

/// Used when the server doesn't tell us how long it tolerates silence
const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

enum SessionEnd {
    Shutdown,
    Reconnect { backoff: bool, reason: String },
}

/// Runs until shut down or until Pusher refuses us for good.
/// Every channel in `channels` is (re)subscribed on each connection.
pub async fn run(
    config: PusherConfig,
    mut channels: BTreeSet<String>,
    mut commands: UnboundedReceiver<ListenerCommand>,
    events: Sender<ListenerEvent>,
) {
    let mut delay = config.reconnect.initial_delay;

    loop {
        let session =
            connect_and_listen(&config, &mut channels, &mut commands, &events, &mut delay).await;

        let (reason, retry_in) = match session {
            Ok(SessionEnd::Shutdown) => {
                info!("listener shut down");
                return;
            }
            Ok(SessionEnd::Reconnect {
                backoff: false,
                reason,
            }) => (reason, Duration::ZERO),
            Ok(SessionEnd::Reconnect {
                backoff: true,
                reason,
            }) => (reason, delay),
            Err(PusherError::Fatal { code, message }) => {
                error!(code, "pusher refused the connection: {message}");
                _ = events
                    .send(ListenerEvent::Fatal(PusherError::Fatal { code, message }))
                    .await;
                return;
            }
            Err(e) => {
                let reason = e.to_string();
                error!("{:?}", anyhow::Error::from(e).context("pusher connection failed"));
                (reason, delay)
            }
        };

        info!("reconnecting in {:?}: {}", retry_in, reason);

        if events
            .send(ListenerEvent::Disconnected { reason, retry_in })
            .await
            .is_err()
        {
            // Nobody is listening anymore
            return;
        }

        if !wait_for_retry(retry_in, &mut channels, &mut commands).await {
            info!("listener shut down while waiting to reconnect");
            return;
        }

        if !retry_in.is_zero() {
            delay = config.reconnect.next_delay(delay);
        }
    }
}

/// Returns false if the listener should stop instead of reconnecting
async fn wait_for_retry(
    delay: Duration,
    channels: &mut BTreeSet<String>,
    commands: &mut UnboundedReceiver<ListenerCommand>,
) -> bool {
    let retry = sleep(delay);
    tokio::pin!(retry);

    loop {
        select! {
            _ = &mut retry => return true,
            command = commands.recv() => match command {
                None | Some(ListenerCommand::Shutdown) => return false,
                Some(ListenerCommand::Subscribe(channel)) => {
                    channels.insert(channel);
                }
                Some(ListenerCommand::Unsubscribe(channel)) => {
                    channels.remove(&channel);
                }
            },
        }
    }
}

#[tracing::instrument(err, skip_all)]
async fn connect_and_listen(
    config: &PusherConfig,
    channels: &mut BTreeSet<String>,
    commands: &mut UnboundedReceiver<ListenerCommand>,
    events: &Sender<ListenerEvent>,
    delay: &mut Duration,
) -> Result<SessionEnd, PusherError> {
    let url = config.socket_url();

    let (socket, _) = connect_async(&url)
        .instrument(info_span!("Connecting to pusher"))
        .await
        .map_err(|source| PusherError::Connect {
            url: url.clone(),
            source,
        })?;

    let (mut write, mut read) = socket.split();

    let established = timeout(config.handshake_timeout, wait_for_greeting(&mut read))
        .await
        .map_err(|_| PusherError::HandshakeTimeout(config.handshake_timeout))??;

    *delay = config.reconnect.initial_delay;

    info!(socket_id = %established.socket_id, "connected to pusher");

    if events
        .send(ListenerEvent::Connected {
            socket_id: established.socket_id,
        })
        .await
        .is_err()
    {
        return Ok(SessionEnd::Shutdown);
    }

    for channel in channels.iter() {
        write.send(Message::Text(subscribe_frame(channel))).await?;
    }

    let activity_timeout = established
        .activity_timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT);
    let mut awaiting_pong = false;
    let mut deadline = Instant::now() + activity_timeout;

    loop {
        select! {
            message = read.next() => {
                let Some(message) = message else {
                    return Ok(SessionEnd::Reconnect {
                        backoff: true,
                        reason: "connection dropped".to_string(),
                    });
                };

                awaiting_pong = false;
                deadline = Instant::now() + activity_timeout;

                match message? {
                    Message::Text(text) => match parse_server_frame(&text) {
                        Ok(event) => {
                            let end = handle_server_event(event, &mut write, events).await?;
                            if let Some(end) = end {
                                return Ok(end);
                            }
                        }
                        Err(e) => warn!("{:?}", anyhow::Error::from(e)),
                    },
                    Message::Close(frame) => return close_to_session_end(frame),
                    _ => {}
                }
            }
            command = commands.recv() => match command {
                None | Some(ListenerCommand::Shutdown) => {
                    _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                Some(ListenerCommand::Subscribe(channel)) => {
                    if channels.insert(channel.clone()) {
                        info!("subscribing to {channel}");
                        write.send(Message::Text(subscribe_frame(&channel))).await?;
                    }
                }
                Some(ListenerCommand::Unsubscribe(channel)) => {
                    if channels.remove(&channel) {
                        info!("unsubscribing from {channel}");
                        write.send(Message::Text(unsubscribe_frame(&channel))).await?;
                    }
                }
            },
            _ = sleep_until(deadline) => {
                if awaiting_pong {
                    return Err(PusherError::Unresponsive);
                }
                debug!("connection idle, pinging");
                write.send(Message::Text(ping_frame())).await?;
                awaiting_pong = true;
                deadline = Instant::now() + config.pong_timeout;
            }
        }
    }
}

/// Pusher speaks first, with the socket id and its activity timeout
async fn wait_for_greeting<S>(read: &mut S) -> Result<ConnectionEstablished, PusherError>
where
    S: futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) => {
                return match parse_server_frame(&text) {
                    Ok(ServerEvent::ConnectionEstablished(established)) => Ok(established),
                    Ok(ServerEvent::Error(data)) => match error_action(data.code) {
                        ErrorAction::GiveUp => Err(PusherError::Fatal {
                            code: data.code.unwrap_or_default(),
                            message: data.message,
                        }),
                        _ => Err(PusherError::Closed {
                            code: data.code,
                            message: data.message,
                        }),
                    },
                    Ok(other) => Err(PusherError::Protocol(format!(
                        "expected connection_established, got {other:?}"
                    ))),
                    Err(e) => Err(PusherError::Protocol(e.to_string())),
                };
            }
            Message::Close(frame) => {
                return Err(match close_to_session_end(frame) {
                    Err(e) => e,
                    Ok(_) => PusherError::Closed {
                        code: None,
                        message: "closed before greeting".to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    Err(PusherError::Closed {
        code: None,
        message: "connection ended before greeting".to_string(),
    })
}

async fn handle_server_event<W>(
    event: ServerEvent,
    write: &mut W,
    events: &Sender<ListenerEvent>,
) -> Result<Option<SessionEnd>, PusherError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let forwarded = match event {
        ServerEvent::Ping => {
            write.send(Message::Text(pong_frame())).await?;
            return Ok(None);
        }
        ServerEvent::Pong => return Ok(None),
        ServerEvent::ConnectionEstablished(_) => {
            debug!("ignoring repeated connection_established");
            return Ok(None);
        }
        ServerEvent::Ignored { event } => {
            debug!("ignoring {event}");
            return Ok(None);
        }
        ServerEvent::Error(data) => {
            return match error_action(data.code) {
                ErrorAction::GiveUp => Err(PusherError::Fatal {
                    code: data.code.unwrap_or_default(),
                    message: data.message,
                }),
                ErrorAction::Backoff => Ok(Some(SessionEnd::Reconnect {
                    backoff: true,
                    reason: data.message,
                })),
                ErrorAction::ReconnectNow => Ok(Some(SessionEnd::Reconnect {
                    backoff: false,
                    reason: data.message,
                })),
                ErrorAction::Ignore => {
                    warn!("pusher error: {}", data.message);
                    Ok(None)
                }
            };
        }
        ServerEvent::SubscriptionSucceeded { channel } => {
            info!("subscribed to {channel}");
            ListenerEvent::Subscribed { channel }
        }
        ServerEvent::Notification {
            channel,
            notification,
        } => {
            info!(channel = %channel, vehicle = %notification.vehicle_id, "departure notification");
            ListenerEvent::Notification {
                channel,
                notification,
            }
        }
    };

    if events.send(forwarded).await.is_err() {
        return Ok(Some(SessionEnd::Shutdown));
    }

    Ok(None)
}

fn close_to_session_end(frame: Option<CloseFrame<'_>>) -> Result<SessionEnd, PusherError> {
    let Some(frame) = frame else {
        return Ok(SessionEnd::Reconnect {
            backoff: true,
            reason: "closed by server".to_string(),
        });
    };

    let code = u16::from(frame.code);
    let message = frame.reason.to_string();

    match error_action(Some(code)) {
        ErrorAction::GiveUp => Err(PusherError::Fatal { code, message }),
        ErrorAction::ReconnectNow => Ok(SessionEnd::Reconnect {
            backoff: !(4200..=4299).contains(&code),
            reason: message,
        }),
        ErrorAction::Backoff | ErrorAction::Ignore => Ok(SessionEnd::Reconnect {
            backoff: true,
            reason: message,
        }),
    }
}
