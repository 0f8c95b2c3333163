//! Text and flags renderers need for rows, cards and captions.
//!
//! Everything here is a pure function of the data plus a reference "now";
//! markup and styling stay with the renderer.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::classify::{days_until, short_notice_label};
use crate::models::{Appointment, Office, BOOK_URL};

/// `Thursday, February 12, 2026`
pub fn format_long_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

/// `February 12, 2026`
pub fn format_short_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// `2:00 PM`, or `Many` for slots without a specific time.
pub fn format_time(time: Option<NaiveTime>) -> String {
    match time {
        Some(time) => time.format("%-I:%M %p").to_string(),
        None => "Many".to_string(),
    }
}

/// `5 minutes ago`, `about 2 hours ago`, `in 3 days`.
pub fn relative_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    let distance = describe_distance(seconds.unsigned_abs());
    if seconds >= 0 {
        format!("{} ago", distance)
    } else {
        format!("in {}", distance)
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

fn describe_distance(seconds: u64) -> String {
    const HOUR: u64 = 60;
    const DAY: u64 = 24 * HOUR;
    const MONTH: u64 = 30 * DAY;
    const YEAR: u64 = 365 * DAY;

    let minutes = (seconds + 30) / 60;
    match minutes {
        0 => "less than a minute".to_string(),
        m if m < 45 => plural(m, "minute"),
        m if m < 90 => "about 1 hour".to_string(),
        m if m < DAY => format!("about {}", plural((m + HOUR / 2) / HOUR, "hour")),
        m if m < 42 * HOUR => "1 day".to_string(),
        m if m < MONTH => plural((m + DAY / 2) / DAY, "day"),
        m if m < 2 * MONTH => format!("about {}", plural((m + MONTH / 2) / MONTH, "month")),
        m if m < YEAR => plural((m + MONTH / 2) / MONTH, "month"),
        m => {
            let years = m / YEAR;
            let rest = m % YEAR;
            if rest < 3 * MONTH {
                format!("about {}", plural(years, "year"))
            } else if rest < 9 * MONTH {
                format!("over {}", plural(years, "year"))
            } else {
                format!("almost {}", plural(years + 1, "year"))
            }
        }
    }
}

/// How a table row is emphasised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowHighlight {
    /// Golden and still bookable; starred.
    GoldenAvailable,
    Available,
    /// No longer offered; dimmed.
    Gone,
}

impl RowHighlight {
    pub fn of(appointment: &Appointment) -> Self {
        if appointment.is_golden_available() {
            RowHighlight::GoldenAvailable
        } else if appointment.available {
            RowHighlight::Available
        } else {
            RowHighlight::Gone
        }
    }
}

pub fn status_text(appointment: &Appointment) -> &'static str {
    if appointment.available {
        "Available"
    } else {
        "Gone"
    }
}

/// The booking link, offered only while the slot is available.
pub fn booking_link(appointment: &Appointment) -> Option<&'static str> {
    appointment.available.then_some(BOOK_URL)
}

/// Caption of the office picker: `All Offices`, `1 office`, `3 offices`.
pub fn office_caption(offices: &BTreeSet<Office>) -> String {
    match offices.len() {
        0 => "All Offices".to_string(),
        1 => "1 office".to_string(),
        n => format!("{} offices", n),
    }
}

/// `26–50 of 60`. An empty set reads `0 of 0`.
pub fn range_caption(page: usize, page_size: usize, total: usize) -> String {
    if total == 0 || page_size == 0 {
        return format!("0 of {}", total);
    }
    let first = (page.max(1) - 1) * page_size + 1;
    let last = (page.max(1) * page_size).min(total);
    if first > total {
        return format!("0 of {}", total);
    }
    format!("{}\u{2013}{} of {}", first, last, total)
}

/// One rendered line of the appointments table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentRow {
    pub office: String,
    pub date: String,
    pub time: String,
    pub first_seen: String,
    pub status: &'static str,
    pub highlight: RowHighlight,
    pub book_url: Option<&'static str>,
}

impl AppointmentRow {
    pub fn render(appointment: &Appointment, now: DateTime<Utc>) -> Self {
        Self {
            office: appointment.office.to_string(),
            date: format_short_date(appointment.appointment_date),
            time: format_time(appointment.appointment_time),
            first_seen: relative_age(appointment.first_seen_at, now),
            status: status_text(appointment),
            highlight: RowHighlight::of(appointment),
            book_url: booking_link(appointment),
        }
    }
}

/// One card of the short-notice panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldenCard {
    /// `TODAY`, `TOMORROW`, `4 days away`
    pub label: String,
    pub office: String,
    pub date: String,
    pub time: String,
    pub status: &'static str,
    pub book_url: Option<&'static str>,
}

impl GoldenCard {
    /// `now` decides which calendar day counts as today.
    pub fn render<Tz: TimeZone>(appointment: &Appointment, now: &DateTime<Tz>) -> Self {
        Self {
            label: short_notice_label(days_until(appointment.appointment_date, now)),
            office: appointment.office.to_string(),
            date: format_long_date(appointment.appointment_date),
            time: format_time(appointment.appointment_time),
            status: status_text(appointment),
            book_url: booking_link(appointment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_dates_and_times() {
        assert_eq!(format_long_date(date(2026, 2, 12)), "Thursday, February 12, 2026");
        assert_eq!(format_short_date(date(2026, 3, 2)), "March 2, 2026");
        assert_eq!(format_time(NaiveTime::from_hms_opt(14, 0, 0)), "2:00 PM");
        assert_eq!(format_time(NaiveTime::from_hms_opt(0, 5, 0)), "12:05 AM");
        assert_eq!(format_time(NaiveTime::from_hms_opt(12, 30, 0)), "12:30 PM");
        assert_eq!(format_time(None), "Many");
    }

    #[test]
    fn test_relative_age() {
        let now = Utc.with_ymd_and_hms(2026, 2, 12, 14, 0, 0).unwrap();
        let ago = |d: Duration| relative_age(now - d, now);

        assert_eq!(ago(Duration::seconds(10)), "less than a minute ago");
        assert_eq!(ago(Duration::seconds(50)), "1 minute ago");
        assert_eq!(ago(Duration::minutes(5)), "5 minutes ago");
        assert_eq!(ago(Duration::minutes(60)), "about 1 hour ago");
        assert_eq!(ago(Duration::hours(3)), "about 3 hours ago");
        assert_eq!(ago(Duration::hours(30)), "1 day ago");
        assert_eq!(ago(Duration::days(4)), "4 days ago");
        assert_eq!(ago(Duration::days(40)), "about 1 month ago");
        assert_eq!(ago(Duration::days(100)), "3 months ago");
        assert_eq!(ago(Duration::days(400)), "about 1 year ago");
        assert_eq!(relative_age(now + Duration::minutes(5), now), "in 5 minutes");
    }

    #[test]
    fn test_captions() {
        assert_eq!(office_caption(&BTreeSet::new()), "All Offices");
        assert_eq!(office_caption(&[Office::Bangor].into_iter().collect()), "1 office");
        assert_eq!(
            office_caption(&[Office::Bangor, Office::Calais, Office::Topsham].into_iter().collect()),
            "3 offices"
        );

        assert_eq!(range_caption(2, 25, 60), "26\u{2013}50 of 60");
        assert_eq!(range_caption(3, 25, 60), "51\u{2013}60 of 60");
        assert_eq!(range_caption(1, 25, 0), "0 of 0");
        assert_eq!(range_caption(9, 25, 60), "0 of 60");
    }
}
