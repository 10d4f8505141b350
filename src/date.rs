//! Arrival time handling: what the backend expects, what the rider sees
use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Timelike, Utc};
use chrono_tz::{America::New_York, Tz};

/// The bus feed and the prediction backend both run on New York time
pub const BACKEND_TZ: Tz = New_York;

const INPUT_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// The current time truncated to the minute, which is the form's precision
pub fn current_time() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Format sent in the `arrivalTime` field of a subscription
pub fn serialise_date(date: DateTime<Utc>) -> String {
    date.with_timezone(&BACKEND_TZ)
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Long form shown when confirming a subscription, e.g. `Sunday, 02 June 2019, 18:35`
pub fn display_date(date: DateTime<Utc>) -> String {
    date.with_timezone(&BACKEND_TZ)
        .format("%A, %d %B %Y, %H:%M")
        .to_string()
}

/// Clock time shown in the departure alert
pub fn display_time(date: DateTime<Utc>) -> String {
    date.with_timezone(&BACKEND_TZ).format("%H:%M").to_string()
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ArrivalTimeError {
    #[error("couldn't understand arrival time {0:?}, expected YYYY-MM-DD HH:MM")]
    Unparseable(String),

    #[error("arrival time {0} doesn't exist in the local time zone")]
    Nonexistent(NaiveDateTime),

    #[error("arrival time {0} is in the past")]
    InPast(DateTime<Utc>),
}

/// Parses a rider supplied arrival time in the given zone.
/// Times before `now` are rejected, like the form's minimum date.
pub fn parse_arrival_time<Z: TimeZone>(
    input: &str,
    zone: &Z,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ArrivalTimeError> {
    let input = input.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(input) {
        return not_in_past(with_offset.with_timezone(&Utc), now);
    }

    let naive = INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .ok_or_else(|| ArrivalTimeError::Unparseable(input.to_string()))?;

    let local = zone
        .from_local_datetime(&naive)
        .earliest()
        .ok_or(ArrivalTimeError::Nonexistent(naive))?;

    not_in_past(local.with_timezone(&Utc), now)
}

/// Same as [`parse_arrival_time`] using the machine's time zone
pub fn parse_local_arrival_time(input: &str) -> Result<DateTime<Utc>, ArrivalTimeError> {
    parse_arrival_time(input, &Local, current_time())
}

fn not_in_past(
    time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ArrivalTimeError> {
    if time < now {
        Err(ArrivalTimeError::InPast(time))
    } else {
        Ok(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn serialises_in_backend_zone() {
        // EDT is UTC-4 in June
        assert_eq!(
            serialise_date(utc("2019-06-02T22:35:00Z")),
            "2019-06-02T18:35:00-04:00"
        );
    }

    #[test]
    fn displays_clock_time() {
        assert_eq!(display_time(utc("2019-06-02T22:35:59Z")), "18:35");
        assert_eq!(
            display_date(utc("2019-06-02T22:35:00Z")),
            "Sunday, 02 June 2019, 18:35"
        );
    }

    #[test]
    fn current_time_is_whole_minutes() {
        let now = current_time();
        assert_eq!(now.second(), 0);
        assert_eq!(now.nanosecond(), 0);
    }

    #[test]
    fn parses_plain_input_in_given_zone() {
        let now = utc("2019-06-01T00:00:00Z");
        let parsed = parse_arrival_time("2019-06-02 18:35", &New_York, now).unwrap();
        assert_eq!(parsed, utc("2019-06-02T22:35:00Z"));

        let parsed = parse_arrival_time("2019-06-02T18:35", &Utc, now).unwrap();
        assert_eq!(parsed, utc("2019-06-02T18:35:00Z"));
    }

    #[test]
    fn parses_rfc3339_input() {
        let now = utc("2019-06-01T00:00:00Z");
        let parsed = parse_arrival_time("2019-06-02T18:35:00-04:00", &Utc, now).unwrap();
        assert_eq!(parsed, utc("2019-06-02T22:35:00Z"));
    }

    #[test]
    fn rejects_garbage_and_past_times() {
        let now = utc("2019-06-03T00:00:00Z");
        assert_eq!(
            parse_arrival_time("tomorrow", &Utc, now),
            Err(ArrivalTimeError::Unparseable("tomorrow".to_string()))
        );
        assert!(matches!(
            parse_arrival_time("2019-06-02 18:35", &Utc, now),
            Err(ArrivalTimeError::InPast(_))
        ));
    }
}
