use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{date::display_time, utils::strip_agency_prefix};

/// Payload of the `departureNotification` event.
/// The backend serialises its struct without json tags, so PascalCase names are accepted too.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DepartureNotification {
    #[serde(rename = "vehicleID", alias = "VehicleID", default)]
    pub vehicle_id: String,
    #[serde(
        rename = "optimalDepartureTime",
        alias = "OptimalDepartureTime",
        default,
        deserialize_with = "optional_timestamp"
    )]
    pub optimal_departure_time: Option<DateTime<Utc>>,
    #[serde(
        rename = "predictedArrivalTime",
        alias = "PredictedArrivalTime",
        default,
        deserialize_with = "optional_timestamp"
    )]
    pub predicted_arrival_time: Option<DateTime<Utc>>,
}

impl DepartureNotification {
    /// Bus number as printed on the bus, `MTA NYCT_7582` -> `7582`
    pub fn bus_number(&self) -> &str {
        strip_agency_prefix(&self.vehicle_id)
    }

    pub fn message(&self) -> String {
        format!(
            "Take Bus {} arriving at {} to arrive at your destination by {}",
            self.bus_number(),
            optional_time(self.optimal_departure_time),
            optional_time(self.predicted_arrival_time),
        )
    }
}

fn optional_time(time: Option<DateTime<Utc>>) -> String {
    time.map(display_time).unwrap_or_else(|| "--:--".to_string())
}

// The backend sends Go's zero time ("0001-01-01T00:00:00Z") when it has nothing to say
fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;

    let Some(s) = s.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let time = DateTime::parse_from_rfc3339(&s)
        .map_err(serde::de::Error::custom)?
        .with_timezone(&Utc);

    if time.year() <= 1 {
        return Ok(None);
    }

    Ok(Some(time))
}

/// What the rider sees once a notification arrives
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepartureAlert {
    pub notification: Option<DepartureNotification>,
    pub is_open: bool,
}

impl DepartureAlert {
    pub fn show(&mut self, notification: DepartureNotification) {
        self.notification = Some(notification);
        self.is_open = true;
    }

    /// Hides the alert, the notification is kept
    pub fn dismiss(&mut self) {
        self.is_open = false;
    }

    /// Text to display, `None` when there's nothing worth showing
    pub fn render(&self) -> Option<String> {
        let notification = self.notification.as_ref()?;

        if !self.is_open || notification.vehicle_id.is_empty() {
            return None;
        }

        Some(format!("We found a perfect bus! {}", notification.message()))
    }
}
