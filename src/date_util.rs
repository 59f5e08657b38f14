use chrono::{
    DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Utc,
};
use serde_json::Value;

/// Local midnight at the start of the day containing `instant`.
pub fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    local_to_utc(local_date(instant).and_time(NaiveTime::MIN))
}

/// Last millisecond of the local day containing `instant`.
///
/// Saturates at [`DateTime::<Utc>::MAX_UTC`] for the final representable day.
pub fn end_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(instant)
        .checked_add_signed(Duration::days(1))
        .and_then(|next| next.checked_sub_signed(Duration::milliseconds(1)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Local calendar date of `instant`. Falls back to the UTC date when the
/// local offset would leave chrono's range.
fn local_date(instant: DateTime<Utc>) -> NaiveDate {
    let utc = instant.naive_utc();
    let offset = Local.offset_from_utc_datetime(&utc).local_minus_utc();
    utc.checked_add_signed(Duration::seconds(i64::from(offset)))
        .map_or(utc.date(), |local| local.date())
}

/// Local midnight on January 1st of the year containing `instant`.
pub fn start_of_year(instant: DateTime<Utc>) -> DateTime<Utc> {
    let year = local_date(instant).year();
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN);
    local_to_utc(jan1.and_time(NaiveTime::MIN))
}

/// Start of the ISO week (Monday) containing `day`.
pub fn week_start(day: NaiveDate) -> NaiveDate {
    day.checked_sub_signed(Duration::days(day.weekday().num_days_from_monday() as i64))
        .unwrap_or(day)
}

/// First day of the month containing `day`.
pub fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

/// Interpret a record's date value.
///
/// Accepts RFC 3339 strings, naive `YYYY-MM-DDTHH:MM:SS` strings and
/// `YYYY-MM-DD` strings (both read as local time), and epoch-millisecond numbers.
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_instant_str(s),
        Value::Number(n) => {
            let ms = n.as_f64()?;
            if !ms.is_finite() {
                return None;
            }
            Utc.timestamp_millis_opt(ms as i64).single()
        }
        _ => None,
    }
}

pub fn parse_instant_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(local_to_utc(naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| local_to_utc(d.and_time(NaiveTime::MIN)))
}

fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Skipped by a DST gap: fall back to reading the wall clock as UTC.
        LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_and_end_of_day() {
        let now = Utc::now();
        let start = start_of_day(now);
        let end = end_of_day(now);
        assert!(start <= now);
        assert!(end >= now);
        assert_eq!((end - start).num_milliseconds(), 86_400_000 - 1);
    }

    #[test]
    fn test_day_bounds_saturate_at_range_edges() {
        let max = DateTime::<Utc>::MAX_UTC;
        assert_eq!(end_of_day(max), max);
        assert!(start_of_day(max) <= max);

        let min = DateTime::<Utc>::MIN_UTC;
        assert!(start_of_day(min) <= end_of_day(min));

        let latest = parse_instant(&json!(8_210_266_876_799_999i64)).unwrap();
        assert!(end_of_day(latest) >= latest);
    }

    #[test]
    fn test_start_of_year() {
        let now = Utc::now();
        let jan1 = start_of_year(now).with_timezone(&Local);
        assert_eq!(jan1.month(), 1);
        assert_eq!(jan1.day(), 1);
        assert_eq!(jan1.year(), now.with_timezone(&Local).year());
    }

    #[test]
    fn test_week_start() {
        // 2025-01-08 is a Wednesday
        let d = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        assert_eq!(week_start(d), NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert_eq!(week_start(monday), monday);
    }

    #[test]
    fn test_month_start() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(month_start(d), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }

    #[test]
    fn test_parse_instant_formats() {
        let rfc = parse_instant(&json!("2025-03-01T12:00:00Z")).unwrap();
        assert_eq!(rfc.to_rfc3339(), "2025-03-01T12:00:00+00:00");

        let ms = parse_instant(&json!(1_735_689_600_000i64)).unwrap();
        assert_eq!(ms.timestamp_millis(), 1_735_689_600_000);

        assert!(parse_instant(&json!("2025-03-01")).is_some());
        assert!(parse_instant(&json!("2025-03-01T08:30:00")).is_some());
    }

    #[test]
    fn test_parse_instant_rejects_garbage() {
        assert!(parse_instant(&json!("yesterday")).is_none());
        assert!(parse_instant(&json!(true)).is_none());
        assert!(parse_instant(&Value::Null).is_none());
    }
}
