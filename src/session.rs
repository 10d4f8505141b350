//! The rider's session: route data, the journey being built and the notification channel
use tracing::info;
use uuid::Uuid;

use crate::{
    api::{ApiClient, ApiError, SubscribeConfirmation},
    date::display_date,
    lookup::{stops_after, stops_for_route},
    model::{
        DepartureAlert, DepartureNotification, IncompleteJourney, Journey, JourneyChange,
        RouteTable, Stop, SubscriptionRequest,
    },
};

#[derive(Debug)]
pub struct Session {
    api: ApiClient,
    routes: RouteTable,
    journey: Journey,
    channel: String,
    alert: DepartureAlert,
    confirmation: Option<String>,
}

/// A subscription the backend accepted
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Channel the notification for this journey will arrive on
    pub channel: String,
    pub request: SubscriptionRequest,
    pub confirmation: SubscribeConfirmation,
}

#[derive(thiserror::Error, Debug)]
pub enum SubscribeError {
    #[error(transparent)]
    Incomplete(#[from] IncompleteJourney),

    #[error("subscription failed")]
    Api(#[from] ApiError),
}

pub fn new_channel() -> String {
    Uuid::new_v4().to_string()
}

impl Session {
    /// Starts with no routes, the form is usable once [`Session::load_routes`] finishes
    pub fn new(api: ApiClient) -> Self {
        Self::with_routes(api, RouteTable::default())
    }

    pub fn with_routes(api: ApiClient, routes: RouteTable) -> Self {
        Self {
            api,
            routes,
            journey: Journey::new(),
            channel: new_channel(),
            alert: DepartureAlert::default(),
            confirmation: None,
        }
    }

    pub async fn load_routes(&mut self) -> Result<&RouteTable, ApiError> {
        self.routes = self.api.fetch_route_table().await?;
        Ok(&self.routes)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn journey(&self) -> &Journey {
        &self.journey
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn alert(&self) -> &DepartureAlert {
        &self.alert
    }

    /// Message confirming the last accepted subscription
    pub fn confirmation(&self) -> Option<&str> {
        self.confirmation.as_deref()
    }

    pub fn change_journey(&mut self, changes: impl IntoIterator<Item = JourneyChange>) -> &Journey {
        self.journey = self.journey.apply_changes(changes);
        &self.journey
    }

    /// Stops the rider can board at
    pub fn origin_options(&self) -> &[Stop] {
        stops_for_route(&self.journey, &self.routes)
    }

    /// Stops the rider can travel to from the chosen origin
    pub fn destination_options(&self) -> &[Stop] {
        stops_after(self.journey.from_stop.as_ref(), self.origin_options())
    }

    /// Posts the journey to the backend.
    /// On success a fresh channel is generated, so the next journey can't reuse this one's.
    #[tracing::instrument(err, skip(self), fields(channel = %self.channel))]
    pub async fn subscribe(&mut self) -> Result<Subscription, SubscribeError> {
        let request = self.journey.serialise(&self.channel)?;

        let confirmation = self.api.post_subscription(&request).await?;

        let channel = std::mem::replace(&mut self.channel, new_channel());

        let confirmation_message = match self.journey.arrival_time {
            Some(arrival_time) => format!(
                "We'll let you know when to leave to arrive by {}",
                display_date(arrival_time)
            ),
            None => "We'll let you know when to leave".to_string(),
        };
        info!(new_channel = %self.channel, "{confirmation_message}");
        self.confirmation = Some(confirmation_message);

        Ok(Subscription {
            channel,
            request,
            confirmation,
        })
    }

    pub fn receive(&mut self, notification: DepartureNotification) {
        self.alert.show(notification);
    }

    pub fn dismiss_alert(&mut self) {
        self.alert.dismiss();
    }
}
