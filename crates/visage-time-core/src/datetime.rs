//! en-US time and date strings as stored on attendance records.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const TIME_FORMAT: &str = "%I:%M %p";
const DATE_FORMAT: &str = "%m/%d/%Y";

/// `09:05 AM`
pub fn format_time(at: &NaiveDateTime) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// `06/12/2023`
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_matches_en_us() {
        let at = NaiveDate::from_ymd_opt(2023, 6, 2)
            .unwrap()
            .and_hms_opt(14, 7, 59)
            .unwrap();
        assert_eq!(format_time(&at), "02:07 PM");
        assert_eq!(format_date(&at.date()), "06/02/2023");
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse_time("09:30 AM"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_time("12:05 PM"), NaiveTime::from_hms_opt(12, 5, 0));
        assert_eq!(parse_date("06/12/2023"), NaiveDate::from_ymd_opt(2023, 6, 12));
        assert!(parse_time("-").is_none());
        assert!(parse_date("2023-06-12").is_none());
    }
}
