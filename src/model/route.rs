use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

use super::stop::Stop;
use crate::utils::strip_agency_prefix;

/// One of the two travel directions of a route
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DirectionId {
    Zero = 0,
    One = 1,
}

impl From<DirectionId> for u8 {
    fn from(value: DirectionId) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for DirectionId {
    type Error = ParseDirectionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DirectionId::Zero),
            1 => Ok(DirectionId::One),
            _ => Err(ParseDirectionError(value.to_string())),
        }
    }
}

impl FromStr for DirectionId {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(DirectionId::Zero),
            "1" => Ok(DirectionId::One),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}

impl fmt::Display for DirectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("direction must be 0 or 1, got {0:?}")]
pub struct ParseDirectionError(String);

/// Stops of a single route, per direction, in travel order
pub type RouteStops = HashMap<DirectionId, Vec<Stop>>;

/// Every route the backend knows about. Fetched once, never mutated.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RouteTable(HashMap<String, RouteStops>);

impl RouteTable {
    pub fn new(routes: HashMap<String, RouteStops>) -> Self {
        Self(routes)
    }

    pub fn stops(&self, route_id: &str, direction: DirectionId) -> Option<&[Stop]> {
        self.0
            .get(route_id)
            .and_then(|directions| directions.get(&direction))
            .map(Vec::as_slice)
    }

    pub fn route_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `MTA NYCT_M86+` is shown to riders as `M86+`
pub fn readable_route_id(route_id: &str) -> &str {
    strip_agency_prefix(route_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTES_JSON: &str = r#"{
        "MTA NYCT_M86+": {
            "0": [{"id":"MTA_401901","name":"1 AV/E 86 ST"},{"id":"MTA_401905","name":"YORK AV/E 86 ST"}],
            "1": [{"id":"MTA_401910","name":"WEST END AV/W 86 ST"}]
        }
    }"#;

    #[test]
    fn parses_route_table_with_string_direction_keys() {
        let routes: RouteTable = serde_json::from_str(ROUTES_JSON).unwrap();

        assert_eq!(routes.len(), 1);
        let stops = routes.stops("MTA NYCT_M86+", DirectionId::Zero).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[1].id, "MTA_401905");
        assert!(routes.stops("MTA NYCT_S78", DirectionId::Zero).is_none());
    }

    #[test]
    fn direction_parsing() {
        assert_eq!("0".parse::<DirectionId>(), Ok(DirectionId::Zero));
        assert_eq!(" 1 ".parse::<DirectionId>(), Ok(DirectionId::One));
        assert!("2".parse::<DirectionId>().is_err());
        assert!("north".parse::<DirectionId>().is_err());
        assert_eq!(serde_json::to_string(&DirectionId::One).unwrap(), "1");
    }

    #[test]
    fn readable_ids() {
        assert_eq!(readable_route_id("MTA NYCT_M86+"), "M86+");
    }
}
