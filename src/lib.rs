//! # comprobante
//!
//! Electronic invoice issuance engine for SUNAT (Peru): UBL 2.1 document
//! generation, enveloped digital signing, ZIP packaging, `sendBill` SOAP
//! submission with WS-Security credentials, and CDR interpretation —
//! driven by a single issuance orchestrator with retry-by-resend
//! semantics.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating
//! point. Line prices are IGV-inclusive; taxable bases are reverse-computed
//! at document build time.
//!
//! ## Pipeline
//!
//! ```text
//! load → build UBL → sign → zip → sendBill → interpret CDR → persist status
//! ```
//!
//! The orchestrator ([`engine::IssuanceEngine`]) is generic over its
//! collaborators: an [`engine::InvoiceStore`] for persistence, a
//! [`soap::BillSender`] for the wire, an [`sign::XmlSigner`] for the
//! signature, and an optional [`engine::NotificationSink`] for receipt
//! delivery.
//!
//! ```no_run
//! use comprobante::core::{EngineConfig, Issuer};
//! use comprobante::engine::IssuanceEngine;
//! use comprobante::sign::Ed25519Signer;
//! use comprobante::soap::SoapBillClient;
//!
//! # async fn run(store: impl comprobante::engine::InvoiceStore + Sync) -> Result<(), comprobante::core::ComprobanteError> {
//! let issuer = Issuer {
//!     ruc: "20000000001".into(),
//!     registration_name: "LABORATORIO CLINICO SAC".into(),
//!     trade_name: None,
//!     street: Some("Av. Principal 123".into()),
//!     city: "LIMA".into(),
//!     district: "LIMA".into(),
//!     subdivision: "LIMA".into(),
//! };
//! let config = EngineConfig::beta(issuer);
//! let client = SoapBillClient::new(&config)?;
//! let signer = Ed25519Signer::from_seed(&[7u8; 32], "20000000001");
//! let engine = IssuanceEngine::new(config, store, client, signer)?;
//! let invoice = engine.issue(42).await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod engine;
pub mod packaging;
pub mod sign;
pub mod soap;
pub mod ubl;

// Re-export core types at crate root for convenience
pub use crate::core::*;
