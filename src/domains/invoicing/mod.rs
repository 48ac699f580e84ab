pub mod service;

pub use service::{BatchInvoiceResult, InvoiceOutcome, InvoiceRequest, InvoiceService, InvoicingError};
