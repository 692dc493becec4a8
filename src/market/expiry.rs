use super::source::{ExpiryCalendar, ExpiryKind};
use crate::config;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc, Weekday};
use tracing::warn;

/// Exchange time as a UTC offset in minutes (IST).
pub const EXCHANGE_UTC_OFFSET_MINUTES: i64 = 330;

/// Expiry on a fixed weekday: every week, or the last one of the month.
///
/// An expiry falling today stays valid until the market cutoff, after which
/// the next one is returned.
#[derive(Debug, Clone, Copy)]
pub struct WeekdayCalendar {
    pub weekday: Weekday,
}

impl Default for WeekdayCalendar {
    fn default() -> Self {
        Self { weekday: Weekday::Tue }
    }
}

impl WeekdayCalendar {
    pub fn new(weekday: Weekday) -> Self {
        Self { weekday }
    }

    pub fn next_expiry_at(&self, kind: ExpiryKind, now: NaiveDateTime) -> Option<NaiveDate> {
        let today = now.date();
        let past_cutoff = (now.hour(), now.minute())
            >= (config::EXPIRY_CUTOFF_HOUR, config::EXPIRY_CUTOFF_MINUTE);
        let still_open = |d: NaiveDate| d > today || (d == today && !past_cutoff);

        match kind {
            ExpiryKind::Weekly => {
                let candidate = on_or_after(today, self.weekday);
                if still_open(candidate) {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(TimeDelta::days(7))
                }
            }
            ExpiryKind::Monthly => {
                let candidate = last_weekday_of_month(today.year(), today.month(), self.weekday)?;
                if still_open(candidate) {
                    return Some(candidate);
                }
                let next = today.with_day(1)?.checked_add_months(Months::new(1))?;
                last_weekday_of_month(next.year(), next.month(), self.weekday)
            }
        }
    }
}

impl ExpiryCalendar for WeekdayCalendar {
    fn next_expiry(&self, kind: ExpiryKind) -> NaiveDate {
        let now = (Utc::now() + TimeDelta::minutes(EXCHANGE_UTC_OFFSET_MINUTES)).naive_utc();
        self.next_expiry_at(kind, now).unwrap_or_else(|| {
            warn!(?kind, %now, "expiry out of calendar range, using today");
            now.date()
        })
    }
}

fn on_or_after(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (7 + weekday.num_days_from_monday() as i64
        - date.weekday().num_days_from_monday() as i64)
        % 7;
    date + TimeDelta::days(ahead)
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let last_day = NaiveDate::from_ymd_opt(year, month, 1)?
        .checked_add_months(Months::new(1))?
        .pred_opt()?;
    let back = (7 + last_day.weekday().num_days_from_monday() as i64
        - weekday.num_days_from_monday() as i64)
        % 7;
    Some(last_day - TimeDelta::days(back))
}
