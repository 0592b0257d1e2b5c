use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Catalog entries are named `HH:MM:SS H:MM:SS Label`. The duration field is
/// optional and its hour digit carries no zero padding.
static CLIP_TITLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<start>\d{1,2}:\d{2}:\d{2})(?:\s+(?P<duration>\d+:\d{2}:\d{2}))?")
        .expect("clip title pattern is valid")
});

/// Parse a clip entry title into UTC start/end bounds on the given catalog
/// day. Returns None for titles that do not follow the name format.
pub fn clip_bounds_from_title(
    day: NaiveDate,
    title: &str,
    time_offset_s: i64,
    default_duration_s: i64,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let caps = CLIP_TITLE_PATTERN.captures(title.trim())?;

    let start_time = parse_clock_token(caps.name("start")?.as_str())?;
    let duration_s = caps
        .name("duration")
        .and_then(|token| parse_duration_token(token.as_str()))
        .unwrap_or(default_duration_s);

    // Names are written in the catalog's local clock; shift back to UTC.
    let naive_start = day.and_time(start_time) - Duration::seconds(time_offset_s);
    let clip_start = DateTime::<Utc>::from_naive_utc_and_offset(naive_start, Utc);
    let clip_end = clip_start + Duration::seconds(duration_s.max(1));

    Some((clip_start, clip_end))
}

fn parse_clock_token(token: &str) -> Option<NaiveTime> {
    let mut parts = token.split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, seconds)
}

fn parse_duration_token(token: &str) -> Option<i64> {
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: i64 = parts[0].parse().ok()?;
    let minutes: i64 = parts[1].parse().ok()?;
    let seconds: i64 = parts[2].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}
