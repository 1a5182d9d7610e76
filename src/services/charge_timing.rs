use chrono::{Duration, NaiveDate};

use crate::{
    models::{BillingTiming, LeaseCharge},
    services::billing_calendar::{sub_months, whole_months_between},
};

/// Accounting window a charge is billed for on a given invoice.
///
/// Prepaid charges reuse the invoice period (`end` exclusive). Postpaid charges
/// cover the preceding window and carry its last day as `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargePeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Explicit timing wins; otherwise utilities bill in arrears and everything
/// else in advance.
pub fn effective_timing(charge: &LeaseCharge) -> BillingTiming {
    match charge.billing_timing {
        Some(timing) => timing,
        None if charge.fee_type.is_utility() => BillingTiming::Postpaid,
        None => BillingTiming::Prepaid,
    }
}

pub fn resolve_period(
    charge: &LeaseCharge,
    invoice_period_start: NaiveDate,
    invoice_period_end: NaiveDate,
) -> ChargePeriod {
    match effective_timing(charge) {
        BillingTiming::Prepaid => ChargePeriod {
            start: invoice_period_start,
            end: invoice_period_end,
        },
        BillingTiming::Postpaid => ChargePeriod {
            start: sub_months(invoice_period_start, charge.billing_cycle_months.max(1)),
            end: invoice_period_start - Duration::days(1),
        },
    }
}

/// Charges with a cycle longer than one month only bill on periods that land
/// on a whole multiple of the cycle from the lease start. Postpaid windows can
/// start before the lease, so the offset is signed.
pub fn should_bill_charge(
    lease_start: NaiveDate,
    charge_period_start: NaiveDate,
    charge_cycle_months: u32,
) -> bool {
    if charge_cycle_months <= 1 {
        return true;
    }
    let offset = whole_months_between(lease_start, charge_period_start);
    offset.rem_euclid(charge_cycle_months as i32) == 0
}

/// Active charges billable on the invoice period, paired with the window each
/// one covers.
pub fn due_charges<'a>(
    lease_start: NaiveDate,
    charges: &'a [LeaseCharge],
    invoice_period_start: NaiveDate,
    invoice_period_end: NaiveDate,
) -> Vec<(&'a LeaseCharge, ChargePeriod)> {
    charges
        .iter()
        .filter(|charge| charge.is_active)
        .filter_map(|charge| {
            let period = resolve_period(charge, invoice_period_start, invoice_period_end);
            should_bill_charge(lease_start, period.start, charge.billing_cycle_months)
                .then_some((charge, period))
        })
        .collect()
}
