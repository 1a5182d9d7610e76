use chrono::{Datelike, Months, NaiveDate};

/// Calendar months from `from` to `to`, ignoring the day of month, so
/// Jan 31 -> Feb 28 is one month. Negative when `to` precedes `from`.
pub fn whole_months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}

/// `whole_months_between`, floored at zero.
pub fn elapsed_months(from: NaiveDate, to: NaiveDate) -> u32 {
    whole_months_between(from, to).max(0) as u32
}

pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

pub fn sub_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}
