//! Datetime built-ins on top of the civil-time core: field extraction,
//! calendar arithmetic, truncation, diffs and `%`-directive formatting.

use crate::value::datetime::{format_offset, NANOS_PER_SEC};
use crate::value::{parse_float64, Datetime, Value};

pub fn extract_year(d: &Datetime) -> i64 {
    d.fields().year
}

pub fn extract_month(d: &Datetime) -> i64 {
    i64::from(d.fields().month)
}

pub fn extract_day(d: &Datetime) -> i64 {
    i64::from(d.fields().day)
}

pub fn extract_hour(d: &Datetime) -> i64 {
    i64::from(d.fields().hour)
}

pub fn extract_minute(d: &Datetime) -> i64 {
    i64::from(d.fields().minute)
}

pub fn extract_second(d: &Datetime) -> i64 {
    i64::from(d.fields().second)
}

/// Rounded to the nearest unit rather than truncated.
pub fn extract_millisecond(d: &Datetime) -> i64 {
    (f64::from(d.fields().nanosecond) / 1e6).round() as i64
}

pub fn extract_microsecond(d: &Datetime) -> i64 {
    (f64::from(d.fields().nanosecond) / 1e3).round() as i64
}

pub fn extract_nanosecond(d: &Datetime) -> i64 {
    i64::from(d.fields().nanosecond)
}

/// Whole days between the two local midnights.
pub fn date_diff(a: &Datetime, b: &Datetime) -> i64 {
    let fa = a.fields();
    let fb = b.fields();
    crate::value::datetime::days_from_civil(fa.year, fa.month, fa.day)
        - crate::value::datetime::days_from_civil(fb.year, fb.month, fb.day)
}

pub fn time_diff_seconds(a: &Datetime, b: &Datetime) -> Value {
    let nanos = a.unix_nanos() - b.unix_nanos();
    parse_float64(nanos as f64 / 1e9)
}

pub fn time_diff_nanos(a: &Datetime, b: &Datetime) -> i64 {
    a.unix_nanos() - b.unix_nanos()
}

pub fn truncate_to(d: &Datetime, unit: TruncUnit) -> Datetime {
    match unit {
        TruncUnit::Month => d.truncate_date(2),
        TruncUnit::Day => d.truncate_date(1),
        TruncUnit::Time => d.truncate_date(0),
        TruncUnit::Minute => d.truncate_nanos(3600 * NANOS_PER_SEC),
        TruncUnit::Second => d.truncate_nanos(60 * NANOS_PER_SEC),
        TruncUnit::Milli => d.truncate_nanos(NANOS_PER_SEC),
        TruncUnit::Micro => d.truncate_nanos(1_000_000),
        TruncUnit::Nano => d.truncate_nanos(1_000),
    }
}

/// Truncation targets. `TRUNC_MINUTE` drops minutes and below, which is
/// why it truncates to the hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncUnit {
    Month,
    Day,
    Time,
    Minute,
    Second,
    Milli,
    Micro,
    Nano,
}

/// Formats with `%` directives: %Y %y %m %d %H %h %i %s %l (hour 1-12)
/// %p (AM/PM) %f/%N (fraction) %Z (offset) %a/%b (names) %%.
pub fn format_datetime(d: &Datetime, format: &str) -> String {
    const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let fields = d.fields();
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(&format!("{:04}", fields.year)),
            Some('y') => out.push_str(&format!("{:02}", fields.year.rem_euclid(100))),
            Some('m') => out.push_str(&format!("{:02}", fields.month)),
            Some('d') => out.push_str(&format!("{:02}", fields.day)),
            Some('H') => out.push_str(&format!("{:02}", fields.hour)),
            Some('h') => {
                let hour12 = match fields.hour % 12 {
                    0 => 12,
                    h => h,
                };
                out.push_str(&format!("{hour12:02}"));
            }
            Some('l') => {
                let hour12 = match fields.hour % 12 {
                    0 => 12,
                    h => h,
                };
                out.push_str(&hour12.to_string());
            }
            Some('p') => out.push_str(if fields.hour < 12 { "AM" } else { "PM" }),
            Some('i') => out.push_str(&format!("{:02}", fields.minute)),
            Some('s') => out.push_str(&format!("{:02}", fields.second)),
            Some('f') => out.push_str(&format!("{:06}", fields.nanosecond / 1_000)),
            Some('N') => out.push_str(&format!("{:09}", fields.nanosecond)),
            Some('Z') => out.push_str(&format_offset(d.offset_secs())),
            Some('a') => out.push_str(WEEKDAYS[d.weekday() as usize]),
            Some('b') => out.push_str(MONTHS[(fields.month - 1) as usize]),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CivilFields;

    fn dt(y: i64, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Datetime {
        Datetime::from_civil(
            CivilFields {
                year: y,
                month: mo,
                day: d,
                hour: h,
                minute: mi,
                second: s,
                nanosecond: 0,
            },
            0,
        )
    }

    #[test]
    fn date_diff_is_midnight_based() {
        let a = dt(2024, 6, 2, 0, 30, 0);
        let b = dt(2024, 6, 1, 23, 0, 0);
        assert_eq!(date_diff(&a, &b), 1);
        assert_eq!(date_diff(&b, &a), -1);
    }

    #[test]
    fn time_diff_units() {
        let a = dt(2024, 6, 1, 0, 0, 10);
        let b = dt(2024, 6, 1, 0, 0, 7);
        assert_eq!(time_diff_seconds(&a, &b), Value::Integer(3));
        assert_eq!(time_diff_nanos(&a, &b), 3_000_000_000);
    }

    #[test]
    fn trunc_minute_drops_to_the_hour() {
        let d = dt(2024, 6, 1, 13, 45, 59);
        let truncated = truncate_to(&d, TruncUnit::Minute);
        let f = truncated.fields();
        assert_eq!((f.hour, f.minute, f.second), (13, 0, 0));
    }

    #[test]
    fn format_directives() {
        let d = dt(2024, 6, 1, 15, 4, 5);
        assert_eq!(format_datetime(&d, "%Y-%m-%d %H:%i:%s"), "2024-06-01 15:04:05");
        assert_eq!(format_datetime(&d, "%y/%m/%d %h %p"), "24/06/01 03 PM");
        assert_eq!(format_datetime(&d, "%a %b"), "Sat Jun");
        assert_eq!(format_datetime(&d, "100%%"), "100%");
    }
}
