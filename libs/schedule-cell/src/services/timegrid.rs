//! Working-hours grid for the clinic's fixed timezone.
//!
//! All slot labels are wall-clock times in the clinic's timezone (UTC+07:00,
//! no DST). Conversions to and from absolute instants go through this module
//! only; nothing else in the workspace is allowed to do offset arithmetic.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

/// Asia/Ho_Chi_Minh. Fixed offset, no DST transitions.
pub const CLINIC_UTC_OFFSET_SECS: i32 = 7 * 3600;

const SLOT_MINUTES: u32 = 30;

// Working windows as minutes-of-day: morning block, and an afternoon block
// on full working days.
const MORNING: (u32, u32) = (8 * 60, 12 * 60);
const AFTERNOON: (u32, u32) = (13 * 60, 17 * 60);

pub fn clinic_offset() -> FixedOffset {
    FixedOffset::east_opt(CLINIC_UTC_OFFSET_SECS).expect("offset is in range")
}

/// Ordered bookable time-of-day labels for a calendar date.
///
/// Mon-Fri: morning and afternoon blocks. Sat: morning only. Sun: closed.
pub fn slots_for_date(date: NaiveDate) -> Vec<NaiveTime> {
    let windows: &[(u32, u32)] = match date.weekday() {
        Weekday::Sun => &[],
        Weekday::Sat => &[MORNING],
        _ => &[MORNING, AFTERNOON],
    };

    windows
        .iter()
        .flat_map(|&(start, end)| {
            (start..end)
                .step_by(SLOT_MINUTES as usize)
                .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
        })
        .collect()
}

pub fn is_bookable(date: NaiveDate, time: NaiveTime) -> bool {
    slots_for_date(date).contains(&time)
}

/// Clinic wall-clock date/time to absolute instant.
pub fn to_absolute(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let local = date.and_time(time);
    Utc.from_utc_datetime(&(local - Duration::seconds(CLINIC_UTC_OFFSET_SECS as i64)))
}

/// Absolute instant to clinic wall-clock date/time.
pub fn to_local(instant: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
    let local = instant.with_timezone(&clinic_offset());
    (local.date_naive(), local.time())
}
