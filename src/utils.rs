use chrono::{
    DateTime, Datelike as _, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc,
};
use chrono_tz::Tz;
use serde::{Serialize, Serializer, ser::SerializeStruct};

/// India Standard Time, UTC+5:30. Never observes DST.
pub const IST_OFFSET_SECS: i32 = 5 * 60 * 60 + 30 * 60;

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).expect("IST offset is less than a day")
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// First and last millisecond of one IST calendar day, as UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub civil_date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn civil_date_string(&self) -> String {
        self.civil_date.format("%Y-%m-%d").to_string()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

impl Serialize for DayWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DayWindow", 3)?;
        s.serialize_field("civil_date", &self.civil_date_string())?;
        s.serialize_field("window_start", &iso_millis(self.start))?;
        s.serialize_field("window_end", &iso_millis(self.end))?;
        s.end()
    }
}

pub fn iso_millis(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Saturates at the ends of the representable range.
fn ist_to_utc(local: NaiveDateTime) -> DateTime<Utc> {
    match local.and_local_timezone(ist()).single() {
        Some(instant) => instant.with_timezone(&Utc),
        None if local.year() < 1970 => DateTime::<Utc>::MIN_UTC,
        None => DateTime::<Utc>::MAX_UTC,
    }
}

pub fn day_window(now: DateTime<Utc>) -> DayWindow {
    let civil_date = now.with_timezone(&ist()).date_naive();
    let last_milli = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).expect("valid time of day");

    DayWindow {
        civil_date,
        start: ist_to_utc(civil_date.and_time(NaiveTime::MIN)),
        end: ist_to_utc(civil_date.and_time(last_milli)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn afternoon_in_ist() {
        let window = day_window(at("2025-02-24T10:00:00.000Z"));
        assert_eq!(window.civil_date_string(), "2025-02-24");
        assert_eq!(iso_millis(window.start), "2025-02-23T18:30:00.000Z");
        assert_eq!(iso_millis(window.end), "2025-02-24T18:29:59.999Z");
    }

    #[test]
    fn late_evening_stays_on_same_day() {
        assert_eq!(
            day_window(at("2025-02-24T17:00:00.000Z")),
            day_window(at("2025-02-24T10:00:00.000Z"))
        );
    }

    #[test]
    fn after_ist_midnight_rolls_over() {
        let base = day_window(at("2025-02-24T10:00:00.000Z"));
        let next = day_window(at("2025-02-24T19:00:00.000Z"));
        assert_eq!(next.civil_date_string(), "2025-02-25");
        assert_eq!(next.start - base.start, TimeDelta::hours(24));
        assert_eq!(next.end - base.end, TimeDelta::hours(24));
    }

    #[test]
    fn window_boundaries() {
        let start = at("2025-02-23T18:30:00.000Z");
        assert_eq!(day_window(start).civil_date_string(), "2025-02-24");
        let before = start - TimeDelta::milliseconds(1);
        assert_eq!(day_window(before).civil_date_string(), "2025-02-23");
    }

    #[test]
    fn window_is_one_day_minus_a_millisecond() {
        let mut instant = at("1999-12-31T00:00:00.000Z");
        let step = TimeDelta::minutes(97) + TimeDelta::milliseconds(13);
        for _ in 0..2000 {
            let window = day_window(instant);
            assert_eq!((window.end - window.start).num_milliseconds(), 86_399_999);
            assert!(window.contains(instant));

            let earlier = day_window(instant - TimeDelta::hours(24));
            assert_eq!(earlier.civil_date.succ_opt(), Some(window.civil_date));

            instant += step;
        }
    }

    #[test]
    fn earliest_instant_has_a_window() {
        let window = day_window(DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.start, DateTime::<Utc>::MIN_UTC);
        assert!(window.contains(DateTime::<Utc>::MIN_UTC));
        assert_eq!(
            window.end,
            DateTime::<Utc>::MIN_UTC + TimeDelta::hours(18) + TimeDelta::minutes(30)
                - TimeDelta::milliseconds(1)
        );
    }

    #[test]
    fn serializes_as_iso_strings() {
        let window = day_window(at("2025-02-24T10:00:00.000Z"));
        assert_eq!(
            serde_json::to_value(window).unwrap(),
            serde_json::json!({
                "civil_date": "2025-02-24",
                "window_start": "2025-02-23T18:30:00.000Z",
                "window_end": "2025-02-24T18:29:59.999Z",
            })
        );
    }
}
