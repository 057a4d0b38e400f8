//! Next trigger computation for recurring schedules.
//!
//! All arithmetic is done in UTC. Out-of-range `hour`/`minute` values roll
//! forward into later days rather than being rejected.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

use crate::schedule::{Frequency, FrequencyConfig};

/// Compute the next firing instant for a schedule.
///
/// Never fails and always returns an instant strictly later than `now`.
pub fn next_run(frequency: &Frequency, config: &FrequencyConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    match frequency {
        Frequency::Weekly => weekly(config, now),
        Frequency::Monthly => monthly(config, now),
        // TODO: interpret `config.expression` once the recurrence grammar is agreed.
        Frequency::Custom => one_day_later(now),
        Frequency::Daily | Frequency::Unrecognized(_) => daily(config, now),
    }
}

fn daily(config: &FrequencyConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    match now.date_naive().succ_opt() {
        Some(tomorrow) => at_time_of_day(tomorrow, config, now),
        None => one_day_later(now),
    }
}

/// Next occurrence of `day_of_week`. A match on today still advances a full week.
fn weekly(config: &FrequencyConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = i64::from(now.weekday().num_days_from_sunday());
    let target = i64::from(config.day_of_week.unwrap_or(0));

    let mut days_ahead = (target - today).rem_euclid(7);
    if days_ahead == 0 {
        days_ahead = 7;
    }

    match now.date_naive().checked_add_signed(Duration::days(days_ahead)) {
        Some(date) => at_time_of_day(date, config, now),
        None => one_day_later(now),
    }
}

/// Same day-of-month in the following calendar month.
///
/// Days past the end of a short month spill into the month after.
fn monthly(config: &FrequencyConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let day = i64::from(config.day_of_month.unwrap_or(1).max(1));

    let date = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.checked_add_signed(Duration::days(day - 1)));

    match date {
        Some(date) => at_time_of_day(date, config, now),
        None => one_day_later(now),
    }
}

fn at_time_of_day(date: NaiveDate, config: &FrequencyConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN).and_utc();
    let offset = Duration::hours(i64::from(config.hour.unwrap_or(0)))
        + Duration::minutes(i64::from(config.minute.unwrap_or(0)));

    midnight
        .checked_add_signed(offset)
        .unwrap_or_else(|| one_day_later(now))
}

fn one_day_later(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_signed(Duration::days(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
