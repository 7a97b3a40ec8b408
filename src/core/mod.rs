//! Core document model, configuration, numbering, and error taxonomy.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating
//! point. Line prices are IGV-inclusive; the UBL builder reverse-computes
//! taxable bases at the configured rate.

mod config;
mod error;
mod numbering;
mod types;

pub use config::*;
pub use error::*;
pub use numbering::*;
pub use types::*;
