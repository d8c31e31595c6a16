//! Clinic calendar helpers.
//!
//! Opening hours and calendar days are expressed in the clinic's local time
//! zone (the server's); everything stored is UTC.

use chrono::{
    DateTime, Datelike, Days, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use std::collections::BTreeSet;

const OPENING_HOUR: u32 = 9;
const CLOSING_HOUR: u32 = 17;
const SLOT_MINUTES: u32 = 30;

/// Every weekday slot from `today` through the same day next month.
pub fn seed_datetimes(today: NaiveDate) -> Vec<NaiveDateTime> {
    let end = today
        .checked_add_months(Months::new(1))
        .unwrap_or(today);

    today
        .iter_days()
        .take_while(|date| *date <= end)
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        .flat_map(|date| {
            (OPENING_HOUR..CLOSING_HOUR).flat_map(move |hour| {
                (0..60).step_by(SLOT_MINUTES as usize).filter_map(move |minute| {
                    NaiveTime::from_hms_opt(hour, minute, 0).map(|time| date.and_time(time))
                })
            })
        })
        .collect()
}

pub fn to_utc(datetime: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&datetime)
        .earliest()
        .map(|datetime| datetime.with_timezone(&Utc))
}

/// The UTC range `[start, end)` covering a local calendar day.
pub fn day_bounds(date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
    let start = to_utc(date.and_time(midnight))?;
    let next = date.checked_add_days(Days::new(1))?;
    let end = to_utc(next.and_time(midnight))?;
    Some((start, end))
}

pub fn local_date(datetime: DateTime<Utc>) -> NaiveDate {
    datetime.with_timezone(&Local).date_naive()
}

/// Distinct local dates of the given timestamps, in ascending order.
pub fn distinct_dates(datetimes: impl IntoIterator<Item = DateTime<Utc>>) -> Vec<NaiveDate> {
    datetimes
        .into_iter()
        .map(local_date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
