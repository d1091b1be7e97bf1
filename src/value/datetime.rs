//! Civil datetime arithmetic on an epoch-nanosecond instant with a fixed
//! UTC offset. The timezone flag selects the offset; the OS tz database is
//! never consulted.

use std::cmp::Ordering;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const SECS_PER_DAY: i64 = 86_400;

/// An instant (nanoseconds since the Unix epoch) paired with the fixed
/// offset its civil fields are rendered in. Two datetimes compare by
/// instant, ignoring the offset.
#[derive(Debug, Clone, Copy)]
pub struct Datetime {
    nanos: i64,
    offset_secs: i32,
}

impl PartialEq for Datetime {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Datetime {}

impl PartialOrd for Datetime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datetime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

/// Broken-out civil fields in the datetime's own offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilFields {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub nanosecond: u32,
}

/// Days since 1970-01-01 for a proleptic Gregorian civil date.
pub fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (i64::from(month) + 9) % 12;
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of `days_from_civil`.
pub fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { y + 1 } else { y }, month, day)
}

pub fn is_leap_year(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

pub fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

impl Datetime {
    pub fn from_nanos(nanos: i64, offset_secs: i32) -> Self {
        Self { nanos, offset_secs }
    }

    pub fn from_unix_seconds(secs: i64, offset_secs: i32) -> Self {
        Self {
            nanos: secs.saturating_mul(NANOS_PER_SEC),
            offset_secs,
        }
    }

    /// Builds a datetime from civil fields interpreted in `offset_secs`.
    pub fn from_civil(fields: CivilFields, offset_secs: i32) -> Self {
        let days = days_from_civil(fields.year, fields.month, fields.day);
        let secs = days * SECS_PER_DAY
            + i64::from(fields.hour) * 3600
            + i64::from(fields.minute) * 60
            + i64::from(fields.second)
            - i64::from(offset_secs);
        Self {
            nanos: secs * NANOS_PER_SEC + i64::from(fields.nanosecond),
            offset_secs,
        }
    }

    pub fn nanos(&self) -> i64 {
        self.nanos
    }

    pub fn offset_secs(&self) -> i32 {
        self.offset_secs
    }

    pub fn unix_seconds(&self) -> i64 {
        self.nanos.div_euclid(NANOS_PER_SEC)
    }

    pub fn unix_nanos(&self) -> i64 {
        self.nanos
    }

    pub fn to_utc(&self) -> Self {
        Self {
            nanos: self.nanos,
            offset_secs: 0,
        }
    }

    pub fn with_offset(&self, offset_secs: i32) -> Self {
        Self {
            nanos: self.nanos,
            offset_secs,
        }
    }

    pub fn fields(&self) -> CivilFields {
        let local = self.nanos + i64::from(self.offset_secs) * NANOS_PER_SEC;
        let secs = local.div_euclid(NANOS_PER_SEC);
        let nanosecond = local.rem_euclid(NANOS_PER_SEC) as u32;
        let days = secs.div_euclid(SECS_PER_DAY);
        let sod = secs.rem_euclid(SECS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        CivilFields {
            year,
            month,
            day,
            hour: (sod / 3600) as u32,
            minute: (sod % 3600 / 60) as u32,
            second: (sod % 60) as u32,
            nanosecond,
        }
    }

    /// 0 = Sunday .. 6 = Saturday. The epoch day was a Thursday.
    pub fn weekday(&self) -> u32 {
        let f = self.fields();
        let days = days_from_civil(f.year, f.month, f.day);
        (days + 4).rem_euclid(7) as u32
    }

    pub fn day_of_year(&self) -> u32 {
        let f = self.fields();
        let start = days_from_civil(f.year, 1, 1);
        let today = days_from_civil(f.year, f.month, f.day);
        (today - start) as u32 + 1
    }

    /// ISO 8601 week number.
    pub fn iso_week(&self) -> u32 {
        let f = self.fields();
        let days = days_from_civil(f.year, f.month, f.day);
        // Thursday of the current week decides the ISO year.
        let weekday_mon0 = (days + 3).rem_euclid(7);
        let thursday = days - weekday_mon0 + 3;
        let (iso_year, _, _) = civil_from_days(thursday);
        let jan1 = days_from_civil(iso_year, 1, 1);
        ((thursday - jan1) / 7) as u32 + 1
    }

    pub fn add_nanos(&self, nanos: i64) -> Self {
        Self {
            nanos: self.nanos.saturating_add(nanos),
            offset_secs: self.offset_secs,
        }
    }

    /// Calendar-aware addition; day-of-month is clamped to the target month.
    pub fn add_months(&self, months: i64) -> Self {
        let f = self.fields();
        let total = f.year * 12 + i64::from(f.month) - 1 + months;
        let year = total.div_euclid(12);
        let month = (total.rem_euclid(12) + 1) as u32;
        let day = f.day.min(days_in_month(year, month));
        Self::from_civil(
            CivilFields {
                year,
                month,
                day,
                ..f
            },
            self.offset_secs,
        )
    }

    pub fn add_years(&self, years: i64) -> Self {
        self.add_months(years * 12)
    }

    pub fn add_days(&self, days: i64) -> Self {
        self.add_nanos(days.saturating_mul(SECS_PER_DAY * NANOS_PER_SEC))
    }

    /// Truncates to midnight (`place` 0), first of month (1) or first of
    /// January (2), in the datetime's own offset.
    pub fn truncate_date(&self, place: u8) -> Self {
        let mut f = self.fields();
        f.hour = 0;
        f.minute = 0;
        f.second = 0;
        f.nanosecond = 0;
        if place >= 1 {
            f.day = 1;
        }
        if place >= 2 {
            f.month = 1;
        }
        Self::from_civil(f, self.offset_secs)
    }

    /// Truncates the instant to a multiple of `unit_nanos` since the epoch.
    pub fn truncate_nanos(&self, unit_nanos: i64) -> Self {
        Self {
            nanos: self.nanos.div_euclid(unit_nanos) * unit_nanos,
            offset_secs: self.offset_secs,
        }
    }

    /// RFC 3339 text: subsecond digits are included only when present.
    pub fn format_rfc3339(&self) -> String {
        let f = self.fields();
        let mut out = format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            f.year, f.month, f.day, f.hour, f.minute, f.second
        );
        if f.nanosecond > 0 {
            let frac = format!("{:09}", f.nanosecond);
            out.push('.');
            out.push_str(frac.trim_end_matches('0'));
        }
        out.push_str(&format_offset(self.offset_secs));
        out
    }
}

pub fn format_offset(offset_secs: i32) -> String {
    if offset_secs == 0 {
        return "Z".to_string();
    }
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let abs = offset_secs.unsigned_abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, abs % 3600 / 60)
}

/// Parses `+HH:MM` / `-HH:MM` / `Z` into seconds.
pub fn parse_offset(s: &str) -> Option<i32> {
    if s == "Z" || s == "z" {
        return Some(0);
    }
    let bytes = s.as_bytes();
    if bytes.len() != 6 || (bytes[0] != b'+' && bytes[0] != b'-') || bytes[3] != b':' {
        return None;
    }
    let hours: i32 = s[1..3].parse().ok()?;
    let minutes: i32 = s[4..6].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    let secs = hours * 3600 + minutes * 60;
    Some(if bytes[0] == b'-' { -secs } else { secs })
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn civil_round_trip() {
        for days in [-719_468, -1, 0, 1, 365, 19_000, 2_932_896] {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days);
        }
    }

    #[test]
    fn epoch_is_known_thursday() {
        let epoch = dt(1970, 1, 1, 0, 0, 0);
        assert_eq!(epoch.unix_seconds(), 0);
        assert_eq!(epoch.weekday(), 4);
    }

    #[test]
    fn add_months_clamps_day() {
        let d = dt(2024, 1, 31, 12, 0, 0).add_months(1);
        let f = d.fields();
        assert_eq!((f.year, f.month, f.day), (2024, 2, 29));
    }

    #[test]
    fn truncate_date_places() {
        let d = dt(2024, 6, 15, 13, 45, 59);
        assert_eq!(d.truncate_date(0).fields().hour, 0);
        assert_eq!(d.truncate_date(1).fields().day, 1);
        let top = d.truncate_date(2).fields();
        assert_eq!((top.month, top.day), (1, 1));
    }

    #[test]
    fn iso_week_of_january_first_2021() {
        // 2021-01-01 is a Friday, part of ISO week 53 of 2020.
        assert_eq!(dt(2021, 1, 1, 0, 0, 0).iso_week(), 53);
        assert_eq!(dt(2021, 1, 4, 0, 0, 0).iso_week(), 1);
    }

    #[test]
    fn rfc3339_formats_offset_and_fraction() {
        let d = Datetime::from_nanos(1_500_000_000, 9 * 3600);
        assert_eq!(d.format_rfc3339(), "1970-01-01T09:00:01.5+09:00");
        let z = dt(2024, 3, 1, 8, 30, 0);
        assert_eq!(z.format_rfc3339(), "2024-03-01T08:30:00Z");
    }

    #[test]
    fn offsets_round_trip() {
        assert_eq!(parse_offset("+09:00"), Some(9 * 3600));
        assert_eq!(parse_offset("-05:30"), Some(-(5 * 3600 + 30 * 60)));
        assert_eq!(parse_offset("Z"), Some(0));
        assert_eq!(format_offset(9 * 3600), "+09:00");
    }

    #[test]
    fn comparison_ignores_offset() {
        let a = Datetime::from_nanos(1000, 0);
        let b = Datetime::from_nanos(1000, 9 * 3600);
        assert_eq!(a, b);
    }

    #[test]
    fn weekday_of_known_dates() {
        // 2024-06-01 was a Saturday.
        assert_eq!(dt(2024, 6, 1, 0, 0, 0).weekday(), 6);
        // 2000-01-01 was a Saturday as well.
        assert_eq!(dt(2000, 1, 1, 0, 0, 0).weekday(), 6);
    }
}
