//! Short-notice labels and the canonical appointment order.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::models::Appointment;

/// Whole calendar days from `now`'s date to `date`, in `now`'s time zone.
///
/// Later today is 0, tomorrow is 1, yesterday is -1.
pub fn days_until<Tz: TimeZone>(date: NaiveDate, now: &DateTime<Tz>) -> i64 {
    (date - now.date_naive()).num_days()
}

/// Badge text for a golden slot `days` away.
///
/// Past dates (a slot not yet cleared by the next scrape) read "1 day ago",
/// "3 days ago".
pub fn short_notice_label(days: i64) -> String {
    match days {
        0 => "TODAY".to_string(),
        1 => "TOMORROW".to_string(),
        -1 => "1 day ago".to_string(),
        n if n < 0 => format!("{} days ago", n.unsigned_abs()),
        n => format!("{} days away", n),
    }
}

/// Total order used everywhere appointments are listed:
/// golden first, then available, then date, then time with "Many" (no
/// time) before any concrete time, then id.
pub fn canonical_cmp(a: &Appointment, b: &Appointment) -> Ordering {
    b.is_golden
        .cmp(&a.is_golden)
        .then_with(|| b.available.cmp(&a.available))
        .then_with(|| a.appointment_date.cmp(&b.appointment_date))
        // None < Some(_)
        .then_with(|| a.appointment_time.cmp(&b.appointment_time))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_canonical(appointments: &mut [Appointment]) {
    appointments.sort_by(canonical_cmp);
}
