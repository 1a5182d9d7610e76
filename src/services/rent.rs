use chrono::NaiveDate;

use crate::{
    models::{Lease, RentIncreaseType},
    services::billing_calendar::elapsed_months,
};

/// Rent due for the period starting on `period_start`, after escalation.
///
/// Escalation steps are counted in whole intervals since the lease start:
/// `FIXED` adds `rent_increase_value` cents per step, `PERCENT` compounds
/// `rent_increase_value`% per step. A lease without escalation (or with a
/// non-positive interval) always bills `base_rent_cents`.
pub fn compute_rent(lease: &Lease, period_start: NaiveDate) -> i64 {
    let base = lease.base_rent_cents;
    let interval = lease.rent_increase_interval_months;
    if lease.rent_increase_type == RentIncreaseType::None || interval <= 0 {
        return base;
    }

    let elapsed = elapsed_months(lease.start_date, period_start);
    let steps = elapsed / interval as u32;
    if steps == 0 {
        return base;
    }

    let rent = match lease.rent_increase_type {
        RentIncreaseType::None => base,
        RentIncreaseType::Fixed => {
            base + round_cents(f64::from(steps) * lease.rent_increase_value)
        }
        RentIncreaseType::Percent => {
            let factor = (1.0 + lease.rent_increase_value / 100.0).powi(steps as i32);
            round_cents(base as f64 * factor)
        }
    };
    rent.max(0)
}

/// Round a fractional cent amount to the nearest cent, ties to even.
pub fn round_cents(value: f64) -> i64 {
    value.round_ties_even() as i64
}
