use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Draft,
    Active,
    Ended,
    Terminated,
}

impl LeaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentIncreaseType {
    None,
    Fixed,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeMode {
    Fixed,
    Metered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingTiming {
    Prepaid,
    Postpaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Water,
    Electricity,
    Management,
    Internet,
    Parking,
    Cleaning,
    #[serde(other)]
    Other,
}

impl FeeType {
    /// Consumption-based utilities are billed in arrears by default.
    pub fn is_utility(self) -> bool {
        matches!(self, Self::Water | Self::Electricity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Void,
    /// Read-side view of an issued invoice past its due date. Never stored.
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Issued => "issued",
            Self::Paid => "paid",
            Self::Void => "void",
            Self::Overdue => "overdue",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "issued" => Some(Self::Issued),
            "paid" => Some(Self::Paid),
            "void" => Some(Self::Void),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceItemKind {
    Rent,
    Charge,
    Deposit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceItemStatus {
    PendingReading,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub organization_id: String,
    pub room_id: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(rename = "lease_status")]
    pub status: LeaseStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub billing_cycle_months: u32,
    pub base_rent_cents: i64,
    pub rent_increase_type: RentIncreaseType,
    #[serde(default)]
    pub rent_increase_value: f64,
    #[serde(default)]
    pub rent_increase_interval_months: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseCharge {
    pub id: String,
    pub lease_id: String,
    pub name: String,
    pub fee_type: FeeType,
    pub mode: ChargeMode,
    pub fixed_amount_cents: Option<i64>,
    pub unit_price_cents: Option<i64>,
    pub unit_name: Option<String>,
    pub billing_cycle_months: u32,
    pub billing_timing: Option<BillingTiming>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub organization_id: String,
    pub lease_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: InvoiceStatus,
    pub total_amount_cents: i64,
    pub due_date: Option<NaiveDate>,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Status as shown to readers: issued invoices past their due date read as
    /// overdue.
    pub fn display_status(&self, now: DateTime<Utc>) -> InvoiceStatus {
        match (self.status, self.due_date) {
            (InvoiceStatus::Issued, Some(due_date)) if due_date < now.date_naive() => {
                InvoiceStatus::Overdue
            }
            (status, _) => status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub lease_charge_id: Option<String>,
    pub kind: InvoiceItemKind,
    pub mode: ChargeMode,
    pub status: InvoiceItemStatus,
    pub description: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub unit_name: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub meter_start: Option<f64>,
    pub meter_end: Option<f64>,
    pub quantity: Option<f64>,
    pub amount_cents: i64,
}

impl InvoiceItem {
    pub fn is_pending(&self) -> bool {
        self.status == InvoiceItemStatus::PendingReading
    }
}

/// Sum of confirmed item amounts; pending readings contribute nothing.
pub fn confirmed_total(items: &[InvoiceItem]) -> i64 {
    items
        .iter()
        .filter(|item| item.status == InvoiceItemStatus::Confirmed)
        .map(|item| item.amount_cents)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewInvoice {
    pub organization_id: String,
    pub lease_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: InvoiceStatus,
    pub total_amount_cents: i64,
    pub due_date: Option<NaiveDate>,
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewInvoiceItem {
    pub invoice_id: String,
    pub lease_charge_id: Option<String>,
    pub kind: InvoiceItemKind,
    pub mode: ChargeMode,
    pub status: InvoiceItemStatus,
    pub description: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub unit_name: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub meter_start: Option<f64>,
    pub meter_end: Option<f64>,
    pub quantity: Option<f64>,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub organization_id: String,
    pub user_id: String,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub entity_type: String,
    pub entity_id: String,
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn invoice(status: InvoiceStatus, due_date: Option<NaiveDate>) -> Invoice {
        Invoice {
            id: "inv-1".to_string(),
            organization_id: "org-1".to_string(),
            lease_id: "lease-1".to_string(),
            period_start: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            status,
            total_amount_cents: 0,
            due_date,
            issued_at: None,
            paid_at: None,
        }
    }

    #[test]
    fn overdue_is_derived_from_issued_and_due_date() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let past_due = NaiveDate::from_ymd_opt(2026, 9, 6);
        let future_due = NaiveDate::from_ymd_opt(2026, 10, 25);

        assert_eq!(
            invoice(InvoiceStatus::Issued, past_due).display_status(now),
            InvoiceStatus::Overdue
        );
        assert_eq!(
            invoice(InvoiceStatus::Issued, future_due).display_status(now),
            InvoiceStatus::Issued
        );
        assert_eq!(
            invoice(InvoiceStatus::Paid, past_due).display_status(now),
            InvoiceStatus::Paid
        );
        assert_eq!(
            invoice(InvoiceStatus::Issued, None).display_status(now),
            InvoiceStatus::Issued
        );
    }

    #[test]
    fn unknown_fee_types_fall_back_to_other() {
        let fee: FeeType = serde_json::from_value(json!("garbage_collection")).unwrap();
        assert_eq!(fee, FeeType::Other);
        assert!(FeeType::Water.is_utility());
        assert!(!FeeType::Management.is_utility());
    }

    #[test]
    fn lease_reads_lease_status_column() {
        let lease: Lease = serde_json::from_value(json!({
            "id": "lease-1",
            "organization_id": "org-1",
            "room_id": null,
            "tenant_id": null,
            "lease_status": "active",
            "start_date": "2026-01-01",
            "end_date": "2027-01-01",
            "billing_cycle_months": 1,
            "base_rent_cents": 250000,
            "rent_increase_type": "none"
        }))
        .unwrap();
        assert_eq!(lease.status, LeaseStatus::Active);
        assert_eq!(lease.rent_increase_interval_months, 0);
    }

    #[test]
    fn parses_status_filters() {
        assert_eq!(InvoiceStatus::parse(" Overdue "), Some(InvoiceStatus::Overdue));
        assert_eq!(InvoiceStatus::parse("settled"), None);
    }
}
