use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::ComprobanteError;
use super::numbering::SeriesNumber;

/// Kind of fiscal document (SUNAT catalog 01, subset used by the engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// 01 — Factura. Issued against a counterparty with a RUC.
    Invoice,
    /// 03 — Boleta de venta. Issued against a personal identity document.
    Receipt,
}

impl DocumentKind {
    /// Catalog 01 document type code, as used in the UBL document and the
    /// archive filename.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invoice => "01",
            Self::Receipt => "03",
        }
    }

    /// Parse from a catalog 01 code string.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(Self::Invoice),
            "03" => Some(Self::Receipt),
            _ => None,
        }
    }

    /// Whether this document kind may be issued against the given identity
    /// document. Facturas require a RUC; boletas any personal document.
    pub fn accepts(&self, identity: IdentityDocument) -> bool {
        match self {
            Self::Invoice => identity == IdentityDocument::Ruc,
            Self::Receipt => identity != IdentityDocument::Ruc,
        }
    }
}

/// Identity document type of the counterparty (SUNAT catalog 06).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityDocument {
    /// 1 — DNI (national identity card).
    Dni,
    /// 4 — Carnet de extranjería.
    ForeignerCard,
    /// 6 — RUC (tax registration number).
    Ruc,
    /// 7 — Passport.
    Passport,
}

impl IdentityDocument {
    /// Catalog 06 scheme code used as `schemeID` on party identifiers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Dni => "1",
            Self::ForeignerCard => "4",
            Self::Ruc => "6",
            Self::Passport => "7",
        }
    }

    /// Parse from a catalog 06 code string.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Dni),
            "4" => Some(Self::ForeignerCard),
            "6" => Some(Self::Ruc),
            "7" => Some(Self::Passport),
            _ => None,
        }
    }
}

/// Invoice lifecycle status.
///
/// `Draft → Pending → {Sent, Accepted, Rejected} → Cancelled`. Cancellation
/// happens outside this engine; the engine only ever moves an invoice
/// between `Pending`, `Accepted` and `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Sent,
    Accepted,
    Rejected,
    Cancelled,
}

impl InvoiceStatus {
    /// Whether a first submission (`issue`) is allowed from this status.
    pub fn may_issue(&self) -> bool {
        matches!(self, Self::Pending | Self::Rejected)
    }

    /// Whether an explicit `resend` is allowed from this status. Resending
    /// an already sent or accepted document is permitted after partial
    /// failures; the replay carries the same document number.
    pub fn may_resend(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Rejected | Self::Sent | Self::Accepted
        )
    }

    /// Cancelled is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The issuing company, as it appears in the supplier party block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issuer {
    /// RUC of the issuer (11 digits).
    pub ruc: String,
    /// Registered legal name (razón social).
    pub registration_name: String,
    /// Commercial name, if different from the legal name.
    pub trade_name: Option<String>,
    /// Street address.
    pub street: Option<String>,
    /// City.
    pub city: String,
    /// District (distrito).
    pub district: String,
    /// Department / region (departamento).
    pub subdivision: String,
}

/// Counterparty snapshot, denormalized onto the invoice at creation time
/// and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counterparty {
    /// Identity document type.
    pub identity: IdentityDocument,
    /// Identity document number (DNI, RUC, ...).
    pub identity_number: String,
    /// Display name (razón social or full personal name).
    pub name: String,
    /// Address, if known.
    pub address: Option<String>,
    /// Contact email for receipt delivery, if known.
    pub email: Option<String>,
}

/// A persisted fiscal document with its line items.
///
/// The engine never creates or deletes invoices; every field except
/// `status` is read-only here. Monetary fields are tax-inclusive on the
/// line level (`unit_price`, `line_total`) while `subtotal` excludes tax —
/// the UBL builder reverse-computes the taxable bases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: u64,
    /// Human document identifier, e.g. `F001-00000042`.
    pub number: SeriesNumber,
    pub kind: DocumentKind,
    pub status: InvoiceStatus,
    /// Counterparty snapshot taken at creation.
    pub customer: Counterparty,
    /// Tax-exclusive total.
    pub subtotal: Decimal,
    /// Total IGV.
    pub tax: Decimal,
    /// Tax-inclusive total; `subtotal + tax`.
    pub total: Decimal,
    pub issue_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<InvoiceLine>,
}

/// A single invoice line. Prices are tax-inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// Seller-assigned service code.
    pub service_code: String,
    pub description: String,
    /// Whole units only; this schema version has no fractional quantities.
    pub quantity: u32,
    /// Tax-inclusive unit price.
    pub unit_price: Decimal,
    /// Tax-inclusive line total.
    pub line_total: Decimal,
}

impl Invoice {
    /// Check the preconditions that must hold before any XML is built or
    /// any I/O happens. Violations are data defects, not runtime errors.
    pub fn check_issuable(&self) -> Result<(), ComprobanteError> {
        if self.lines.is_empty() {
            return Err(ComprobanteError::Validation(format!(
                "{}: invoice has no lines",
                self.number
            )));
        }
        if let Some(line) = self.lines.iter().find(|l| l.quantity == 0) {
            return Err(ComprobanteError::Validation(format!(
                "{}: line '{}' has zero quantity",
                self.number, line.service_code
            )));
        }
        if !self.number.matches_kind(self.kind) {
            return Err(ComprobanteError::Validation(format!(
                "{}: series does not match document kind {:?}",
                self.number, self.kind
            )));
        }
        if !self.kind.accepts(self.customer.identity) {
            return Err(ComprobanteError::Validation(format!(
                "{}: document kind {:?} cannot be issued against identity document {:?}",
                self.number, self.kind, self.customer.identity
            )));
        }
        Ok(())
    }
}

/// Normalized outcome of a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Response code "0", or the authority accepted without a receipt.
    Accepted,
    /// Response code "0xxx" — accepted with observations.
    AcceptedWithNotes,
    /// Non-zero response code or SOAP fault.
    Rejected,
    /// Transport or protocol failure; the true outcome is unknown.
    Error,
}

/// Result of one submit/interpret round trip, returned to the orchestrator.
/// Ephemeral — never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub outcome: Outcome,
    /// Receipt response code, when a receipt was returned.
    pub response_code: Option<String>,
    /// Receipt description or fault string.
    pub response_description: Option<String>,
    /// Free-text observations from the authority.
    pub notes: Vec<String>,
    /// Raw receipt XML; empty when the authority issued none.
    #[serde(skip)]
    pub receipt_xml: Vec<u8>,
}

impl SubmissionResult {
    /// Invoice status this outcome maps to. An undetermined outcome is
    /// conservatively treated as not-accepted so a human can investigate.
    pub fn final_status(&self) -> InvoiceStatus {
        match self.outcome {
            Outcome::Accepted | Outcome::AcceptedWithNotes => InvoiceStatus::Accepted,
            Outcome::Rejected | Outcome::Error => InvoiceStatus::Rejected,
        }
    }
}
