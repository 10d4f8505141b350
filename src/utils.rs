/// Ids coming from the bus API are prefixed with the agency, e.g. `MTA NYCT_M86+`.
/// Returns the segment after the agency, or the whole id if there's no prefix.
pub fn strip_agency_prefix(id: &str) -> &str {
    id.split('_').nth(1).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_agency() {
        assert_eq!(strip_agency_prefix("MTA NYCT_M86+"), "M86+");
        assert_eq!(strip_agency_prefix("MTA_7582"), "7582");
        assert_eq!(strip_agency_prefix("S78"), "S78");
    }

    #[test]
    fn only_the_segment_after_the_agency_is_kept() {
        assert_eq!(strip_agency_prefix("a_b_c"), "b");
        assert_eq!(strip_agency_prefix("trailing_"), "");
    }
}
