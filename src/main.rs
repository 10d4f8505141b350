use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::Settings;
use dotenvy::dotenv;
use lookup::{filter_routes, filter_stops, find_route, find_stop, stops_after};
use model::{DirectionId, JourneyChange, readable_route_id};
use pusher::{ListenerEvent, NotificationListener, PusherClient};
use session::Session;
use std::time::Duration;
use tokio::{
    select,
    signal::ctrl_c,
    time::{sleep, timeout},
};
use tracing::{info, warn};

mod api;
mod background_services;
mod config;
mod date;
mod lookup;
mod model;
mod pusher;
mod session;
mod telemetry;
mod utils;

const LOAD_ATTEMPTS: u32 = 3;
const LOAD_RETRY_DELAY: Duration = Duration::from_secs(2);
/// How long Pusher gets to confirm the channel before the journey is posted
const CHANNEL_READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "delay-guardian", version, about = "Get told which bus to catch")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the routes the backend knows about
    Routes {
        #[arg(long, default_value = "")]
        query: String,
    },
    /// List the stops of a route in one direction
    Stops {
        #[arg(long)]
        route: String,
        #[arg(long)]
        direction: DirectionId,
        /// Only show stops after this one
        #[arg(long)]
        after: Option<String>,
        #[arg(long, default_value = "")]
        query: String,
    },
    /// Subscribe to a journey and wait to be told when to leave
    Subscribe {
        #[arg(long)]
        route: String,
        #[arg(long)]
        direction: DirectionId,
        /// Stop id or name to board at
        #[arg(long)]
        from: String,
        /// Stop id or name to get off at
        #[arg(long)]
        to: String,
        /// "YYYY-MM-DD HH:MM" in local time, defaults to now
        #[arg(long)]
        arrive_by: Option<String>,
    },
    /// Print departure notifications pushed to a channel
    Listen {
        #[arg(long)]
        channel: String,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    _ = dotenv();

    let cli = Cli::parse();

    // Both reqwest and the websocket may pull in rustls, make the provider choice explicit
    _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let _guard = telemetry::init(
        &cli.settings.log_dir,
        cli.settings.otlp_endpoint.as_deref(),
    )?;

    match cli.command {
        Command::Routes { query } => list_routes(&cli.settings, &query).await,
        Command::Stops {
            route,
            direction,
            after,
            query,
        } => list_stops(&cli.settings, &route, direction, after.as_deref(), &query).await,
        Command::Subscribe {
            route,
            direction,
            from,
            to,
            arrive_by,
        } => {
            subscribe(
                &cli.settings,
                &route,
                direction,
                &from,
                &to,
                arrive_by.as_deref(),
            )
            .await
        }
        Command::Listen { channel } => listen(&cli.settings, channel).await,
    }
}

/// The backend needs a while to load the bus feed after starting, so transient failures are retried
async fn load_session(settings: &Settings) -> Result<Session> {
    let mut session = Session::new(settings.api_client()?);

    let mut attempt = 1;
    loop {
        match session.load_routes().await {
            Ok(routes) => {
                if routes.is_empty() {
                    warn!("the backend doesn't know any routes");
                } else {
                    info!("loaded {} routes", routes.len());
                }
                return Ok(session);
            }
            Err(e) if e.is_transient() && attempt < LOAD_ATTEMPTS => {
                warn!("couldn't load routes, attempt {attempt}/{LOAD_ATTEMPTS}: {e}");
                attempt += 1;
                sleep(LOAD_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("couldn't load routes from {}", settings.api_url));
            }
        }
    }
}

async fn list_routes(settings: &Settings, query: &str) -> Result<()> {
    let session = load_session(settings).await?;

    for route_id in filter_routes(query, session.routes()) {
        println!("{}\t{}", readable_route_id(route_id), route_id);
    }

    Ok(())
}

async fn list_stops(
    settings: &Settings,
    route: &str,
    direction: DirectionId,
    after: Option<&str>,
    query: &str,
) -> Result<()> {
    let mut session = load_session(settings).await?;

    let route_id = find_route(route, session.routes())?.to_string();
    session.change_journey([
        JourneyChange::RouteId(route_id),
        JourneyChange::DirectionId(direction),
    ]);

    let stops = session.origin_options();
    let stops = match after {
        Some(after) => stops_after(Some(find_stop(after, stops)?), stops),
        None => stops,
    };

    for stop in filter_stops(query, stops) {
        println!("{}\t{}", stop.id, stop.label());
    }

    Ok(())
}

async fn subscribe(
    settings: &Settings,
    route: &str,
    direction: DirectionId,
    from: &str,
    to: &str,
    arrive_by: Option<&str>,
) -> Result<()> {
    let mut session = load_session(settings).await?;

    let route_id = find_route(route, session.routes())?.to_string();
    session.change_journey([
        JourneyChange::RouteId(route_id),
        JourneyChange::DirectionId(direction),
    ]);

    let from_stop = find_stop(from, session.origin_options())
        .context("unknown origin stop")?
        .clone();
    session.change_journey([JourneyChange::FromStop(from_stop)]);

    let to_stop = find_stop(to, session.destination_options())
        .context("destination has to come after the origin")?
        .clone();
    session.change_journey([JourneyChange::ToStop(to_stop)]);

    if let Some(arrive_by) = arrive_by {
        session.change_journey([JourneyChange::ArrivalTime(date::parse_local_arrival_time(
            arrive_by,
        )?)]);
    }

    info!(journey = ?session.journey(), "journey complete");

    let pusher = PusherClient::new(settings.pusher_config());
    // The backend publishes as soon as it gets the journey, and Pusher drops events
    // on channels nobody is subscribed to yet
    let channel = session.channel().to_string();
    let mut listener = pusher.listen([channel.clone()]);

    let ready = select! {
        ready = timeout(CHANNEL_READY_TIMEOUT, wait_for_channel(&mut listener, &channel)) => ready,
        _ = ctrl_c() => return Ok(()),
    };
    ready.context("timed out waiting for the notification channel")??;

    let subscription = select! {
        subscription = session.subscribe() => subscription.context("couldn't subscribe")?,
        _ = ctrl_c() => {
            listener.shutdown().await;
            return Ok(());
        }
    };

    info!(
        route = %subscription.request.route_id,
        status = %subscription.confirmation.status,
        "subscribed on {}",
        subscription.channel
    );
    if let Some(confirmation) = session.confirmation() {
        println!("{confirmation}");
    }
    listener.subscribe(session.channel());

    wait_for_departure(&mut session, &mut listener, &subscription.channel).await?;

    listener.shutdown().await;

    Ok(())
}

/// Waits until Pusher confirms the subscription to `channel`
async fn wait_for_channel(listener: &mut NotificationListener, channel: &str) -> Result<()> {
    loop {
        match listener.next_event().await {
            Some(ListenerEvent::Subscribed {
                channel: subscribed,
            }) if subscribed == channel => return Ok(()),
            Some(ListenerEvent::Disconnected { reason, retry_in }) => {
                warn!("lost notifications connection ({reason}), retrying in {retry_in:?}");
            }
            Some(ListenerEvent::Fatal(e)) => {
                return Err(e).context("can't receive notifications");
            }
            Some(_) => {}
            None => bail!("notification listener stopped"),
        }
    }
}

/// Shows every alert for `channel` until one says when to leave
async fn wait_for_departure(
    session: &mut Session,
    listener: &mut NotificationListener,
    channel: &str,
) -> Result<()> {
    loop {
        let event = select! {
            event = listener.next_event() => event,
            _ = ctrl_c() => return Ok(()),
        };

        match event {
            Some(ListenerEvent::Notification {
                channel: from,
                notification,
            }) if from == channel => {
                let has_departure = notification.optimal_departure_time.is_some();
                session.receive(notification);

                if let Some(alert) = session.alert().render() {
                    println!("{alert}");
                }
                session.dismiss_alert();

                if has_departure {
                    listener.unsubscribe(channel);
                    return Ok(());
                }
            }
            Some(ListenerEvent::Notification { channel, .. }) => {
                info!("ignoring notification for {channel}");
            }
            Some(ListenerEvent::Disconnected { reason, retry_in }) => {
                warn!("lost notifications connection ({reason}), retrying in {retry_in:?}");
            }
            Some(ListenerEvent::Fatal(e)) => {
                return Err(e).context("can't receive notifications");
            }
            Some(ListenerEvent::Connected { .. } | ListenerEvent::Subscribed { .. }) => {}
            None => bail!("notification listener stopped"),
        }
    }
}

async fn listen(settings: &Settings, channel: String) -> Result<()> {
    let pusher = PusherClient::new(settings.pusher_config());
    let mut listener = pusher.listen([channel]);

    loop {
        let notification = select! {
            notification = listener.next_notification() => notification?,
            _ = ctrl_c() => break,
        };

        let Some((channel, notification)) = notification else {
            bail!("notification listener stopped");
        };

        println!("{channel}\t{}", notification.message());
    }

    listener.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::test_server,
        pusher::fake_server::{Behaviour, FakePusher},
    };
    use axum::{
        Json, Router,
        extract::State,
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    async fn get_stops() -> Json<Value> {
        Json(json!({
            "MTA NYCT_M86+": {
                "0": [
                    {"id": "X0", "name": "WEST END AV"},
                    {"id": "X", "name": "1 AV/E 86 ST"},
                    {"id": "Y", "name": "YORK AV/E 86 ST"},
                ],
                "1": [],
            }
        }))
    }

    async fn post_subscribe(
        State(log): State<Arc<Mutex<Vec<String>>>>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let channel = body["channel"].as_str().unwrap_or_default();
        log.lock().unwrap().push(format!("POST {channel}"));
        Json(json!({"status": "ok"}))
    }

    #[tokio::test]
    async fn subscribe_waits_for_channel_before_posting() {
        // A slow greeting leaves plenty of time to post too early
        let mut fake = FakePusher::new(Behaviour::Notify);
        fake.greeting_delay = Duration::from_millis(500);
        let pusher = fake.spawn().await;

        let backend = Router::new()
            .route("/getStops", get(get_stops))
            .route("/subscribe", post(post_subscribe))
            .with_state(fake.received.clone());
        let settings = Settings {
            api_url: test_server::spawn(backend).await,
            pusher_key: pusher.key.clone(),
            pusher_cluster: pusher.cluster.clone(),
            pusher_host: pusher.host.clone(),
            http_timeout_secs: 5,
            log_dir: std::env::temp_dir(),
            otlp_endpoint: None,
        };

        timeout(
            Duration::from_secs(10),
            subscribe(&settings, "M86+", DirectionId::Zero, "X", "Y", None),
        )
        .await
        .unwrap()
        .unwrap();

        let log = fake.received();
        let posted = log.iter().position(|f| f.starts_with("POST ")).unwrap();
        let channel = log[posted].trim_start_matches("POST ");
        let subscribed = log
            .iter()
            .position(|f| *f == format!("pusher:subscribe {channel}"))
            .unwrap();
        assert!(subscribed < posted, "{log:?}");
    }
}
