pub mod billing;
pub mod fel;
pub mod ingestion;
pub mod invoicing;
pub mod reports;
