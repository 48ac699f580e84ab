pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod store;

pub use memory_store::MemoryBillingStore;
pub use models::*;
pub use pg_store::PgBillingStore;
pub use store::{BillingStore, StoreError};
