use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{route::DirectionId, stop::Stop};
use crate::date::{current_time, serialise_date};

/// The trip the rider is putting together. Every field is optional until the form is submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Journey {
    pub route_id: Option<String>,
    pub direction_id: Option<DirectionId>,
    pub from_stop: Option<Stop>,
    pub to_stop: Option<Stop>,
    pub arrival_time: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum JourneyField {
    RouteId,
    DirectionId,
    FromStop,
    ToStop,
    ArrivalTime,
}

impl JourneyField {
    /// Order in which the form asks for the fields
    pub const ALL: [JourneyField; 5] = [
        JourneyField::RouteId,
        JourneyField::DirectionId,
        JourneyField::FromStop,
        JourneyField::ToStop,
        JourneyField::ArrivalTime,
    ];

    /// Fields that stop making sense once this one changes
    pub fn dependents(self) -> &'static [JourneyField] {
        RESET_ON_CHANGE
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, dependents)| *dependents)
            .unwrap_or(&[])
    }
}

impl fmt::Display for JourneyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JourneyField::RouteId => "route",
            JourneyField::DirectionId => "direction",
            JourneyField::FromStop => "from stop",
            JourneyField::ToStop => "to stop",
            JourneyField::ArrivalTime => "arrival time",
        };
        f.write_str(name)
    }
}

/// Stops belong to a route and direction, and the destination has to come after the origin.
const RESET_ON_CHANGE: &[(JourneyField, &[JourneyField])] = &[
    (
        JourneyField::RouteId,
        &[JourneyField::FromStop, JourneyField::ToStop],
    ),
    (
        JourneyField::DirectionId,
        &[JourneyField::FromStop, JourneyField::ToStop],
    ),
    (JourneyField::FromStop, &[JourneyField::ToStop]),
];

/// A single edit made in the form
#[derive(Debug, Clone, PartialEq)]
pub enum JourneyChange {
    RouteId(String),
    DirectionId(DirectionId),
    FromStop(Stop),
    ToStop(Stop),
    ArrivalTime(DateTime<Utc>),
}

impl JourneyChange {
    pub fn field(&self) -> JourneyField {
        match self {
            JourneyChange::RouteId(_) => JourneyField::RouteId,
            JourneyChange::DirectionId(_) => JourneyField::DirectionId,
            JourneyChange::FromStop(_) => JourneyField::FromStop,
            JourneyChange::ToStop(_) => JourneyField::ToStop,
            JourneyChange::ArrivalTime(_) => JourneyField::ArrivalTime,
        }
    }
}

impl Default for Journey {
    fn default() -> Self {
        Self::new()
    }
}

impl Journey {
    /// An empty form, arriving "now"
    pub fn new() -> Self {
        Self {
            route_id: None,
            direction_id: None,
            from_stop: None,
            to_stop: None,
            arrival_time: Some(current_time()),
        }
    }

    /// Returns the journey with `changes` applied in order.
    /// Changing a field clears its dependents, setting a field to the value it already has doesn't.
    pub fn apply_changes(&self, changes: impl IntoIterator<Item = JourneyChange>) -> Journey {
        let mut journey = self.clone();

        for change in changes {
            if journey.holds(&change) {
                continue;
            }

            for dependent in change.field().dependents() {
                journey.clear(*dependent);
            }
            journey.set(change);
        }

        journey
    }

    fn holds(&self, change: &JourneyChange) -> bool {
        match change {
            JourneyChange::RouteId(v) => self.route_id.as_ref() == Some(v),
            JourneyChange::DirectionId(v) => self.direction_id.as_ref() == Some(v),
            JourneyChange::FromStop(v) => self.from_stop.as_ref() == Some(v),
            JourneyChange::ToStop(v) => self.to_stop.as_ref() == Some(v),
            JourneyChange::ArrivalTime(v) => self.arrival_time.as_ref() == Some(v),
        }
    }

    fn set(&mut self, change: JourneyChange) {
        match change {
            JourneyChange::RouteId(v) => self.route_id = Some(v),
            JourneyChange::DirectionId(v) => self.direction_id = Some(v),
            JourneyChange::FromStop(v) => self.from_stop = Some(v),
            JourneyChange::ToStop(v) => self.to_stop = Some(v),
            JourneyChange::ArrivalTime(v) => self.arrival_time = Some(v),
        }
    }

    fn clear(&mut self, field: JourneyField) {
        match field {
            JourneyField::RouteId => self.route_id = None,
            JourneyField::DirectionId => self.direction_id = None,
            JourneyField::FromStop => self.from_stop = None,
            JourneyField::ToStop => self.to_stop = None,
            JourneyField::ArrivalTime => self.arrival_time = None,
        }
    }

    pub fn is_set(&self, field: JourneyField) -> bool {
        match field {
            JourneyField::RouteId => self.route_id.is_some(),
            JourneyField::DirectionId => self.direction_id.is_some(),
            JourneyField::FromStop => self.from_stop.is_some(),
            JourneyField::ToStop => self.to_stop.is_some(),
            JourneyField::ArrivalTime => self.arrival_time.is_some(),
        }
    }

    pub fn first_missing_field(&self) -> Option<JourneyField> {
        JourneyField::ALL.into_iter().find(|f| !self.is_set(*f))
    }

    /// Builds the body of a subscription for this journey on `channel`
    pub fn serialise(&self, channel: &str) -> Result<SubscriptionRequest, IncompleteJourney> {
        let missing = IncompleteJourney;

        Ok(SubscriptionRequest {
            route_id: self
                .route_id
                .clone()
                .ok_or(missing(JourneyField::RouteId))?,
            direction_id: self.direction_id.ok_or(missing(JourneyField::DirectionId))?,
            from_stop: self
                .from_stop
                .as_ref()
                .map(|s| s.id.clone())
                .ok_or(missing(JourneyField::FromStop))?,
            to_stop: self
                .to_stop
                .as_ref()
                .map(|s| s.id.clone())
                .ok_or(missing(JourneyField::ToStop))?,
            arrival_time: self
                .arrival_time
                .map(serialise_date)
                .ok_or(missing(JourneyField::ArrivalTime))?,
            channel: channel.to_string(),
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
#[error("journey has no {0} selected")]
pub struct IncompleteJourney(pub JourneyField);

/// Body of `POST /subscribe`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "routeID")]
    pub route_id: String,
    #[serde(rename = "directionID")]
    pub direction_id: DirectionId,
    #[serde(rename = "fromStop")]
    pub from_stop: String,
    #[serde(rename = "toStop")]
    pub to_stop: String,
    #[serde(rename = "arrivalTime")]
    pub arrival_time: String,
    pub channel: String,
}
