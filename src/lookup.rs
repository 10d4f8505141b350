//! Derives what the form can offer from the route table and the current journey
use itertools::Itertools;

use crate::model::{Journey, RouteTable, Stop, readable_route_id};

/// Stops of the selected route in the selected direction, in travel order
pub fn stops_for_route<'a>(journey: &Journey, routes: &'a RouteTable) -> &'a [Stop] {
    match (&journey.route_id, journey.direction_id) {
        (Some(route_id), Some(direction)) => routes.stops(route_id, direction).unwrap_or(&[]),
        _ => &[],
    }
}

/// Stops a rider can travel to from `from_stop`.
/// An origin that isn't part of `all_stops` leaves every stop reachable.
pub fn stops_after<'a>(from_stop: Option<&Stop>, all_stops: &'a [Stop]) -> &'a [Stop] {
    let Some(from_stop) = from_stop else {
        return &[];
    };

    match all_stops.iter().position(|stop| stop.id == from_stop.id) {
        Some(index) => &all_stops[index + 1..],
        None => all_stops,
    }
}

/// Case-insensitive substring match used by every autocomplete
pub fn query_matches(query: &str, item: &str) -> bool {
    item.to_lowercase().contains(&query.to_lowercase())
}

pub fn query_matches_stop(query: &str, stop: &Stop) -> bool {
    query_matches(query, &stop.name)
}

pub fn query_matches_route(query: &str, route_id: &str) -> bool {
    query_matches(query, route_id)
}

/// Route ids matching `query`, sorted for display
pub fn filter_routes<'a>(query: &str, routes: &'a RouteTable) -> Vec<&'a str> {
    routes
        .route_ids()
        .filter(|route_id| query_matches_route(query, route_id))
        .sorted()
        .collect_vec()
}

pub fn filter_stops<'a>(query: &str, stops: &'a [Stop]) -> Vec<&'a Stop> {
    stops
        .iter()
        .filter(|stop| query_matches_stop(query, stop))
        .collect_vec()
}

/// Resolves what the rider typed to one stop: an exact id, or a name matching exactly one stop
pub fn find_stop<'a>(input: &str, stops: &'a [Stop]) -> Result<&'a Stop, LookupError> {
    if let Some(stop) = stops.iter().find(|stop| stop.id == input) {
        return Ok(stop);
    }

    let matching = filter_stops(input, stops);

    if let Some(exact) = matching
        .iter()
        .find(|stop| stop.name.eq_ignore_ascii_case(input))
    {
        return Ok(*exact);
    }

    match matching.as_slice() {
        [] => Err(LookupError::NotFound(input.to_string())),
        [stop] => Ok(*stop),
        many => Err(LookupError::Ambiguous {
            query: input.to_string(),
            candidates: many.iter().map(|stop| stop.label().to_string()).collect_vec(),
        }),
    }
}

/// Resolves what the rider typed to a route id: the full id or the readable one, e.g. `M86+`
pub fn find_route<'a>(input: &str, routes: &'a RouteTable) -> Result<&'a str, LookupError> {
    if let Some(route_id) = routes.route_ids().find(|route_id| *route_id == input) {
        return Ok(route_id);
    }

    let readable_matches = routes
        .route_ids()
        .filter(|route_id| readable_route_id(route_id).eq_ignore_ascii_case(input))
        .sorted()
        .collect_vec();

    match readable_matches.as_slice() {
        [route_id] => Ok(*route_id),
        [] => Err(LookupError::NotFound(input.to_string())),
        many => Err(LookupError::Ambiguous {
            query: input.to_string(),
            candidates: many.iter().map(|route_id| route_id.to_string()).collect_vec(),
        }),
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LookupError {
    #[error("nothing matches {0:?}")]
    NotFound(String),

    #[error("{query:?} matches several options: {}", candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },
}
