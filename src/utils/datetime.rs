use chrono::{DateTime, NaiveTime, TimeZone};

/// Full local timestamp, e.g. `2025-03-01 05:12:07`.
pub fn format_local_time<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Clock time as shown in reminders, e.g. `05:12`.
pub fn format_clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}
