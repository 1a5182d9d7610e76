pub mod billing_store;
pub mod memory_billing_store;
pub mod pg_billing_store;
pub mod table_service;
