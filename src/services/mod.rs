pub mod billing_calendar;
pub mod billing_run;
pub mod charge_timing;
pub mod clock;
pub mod invoice_builder;
pub mod invoice_lifecycle;
pub mod invoice_queries;
pub mod meter_readings;
pub mod rent;
pub mod scheduler;
