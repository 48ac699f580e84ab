//! Adaptador del certificador FEL (G4S): armado del DTE, transporte SOAP/form
//! y lectura de respuestas.
pub mod amount_words;
pub mod client;
pub mod document;
pub mod error;
pub mod extract;
pub mod transport;

pub use client::{Certification, CertificationProvider, DocumentFormat, G4sClient, TaxIdLookup};
pub use document::{build_document, normalize_nit, split_iva, DteItem, DteRequest, Receptor};
pub use error::FelError;
pub use transport::Transport;
