use thiserror::Error;

/// Errors raised by the issuance engine and its pipeline stages.
///
/// The taxonomy distinguishes precondition violations (rejected before any
/// I/O), transient transport failures (worth a `resend`), protocol-level
/// rejections, and local defects such as a diverging tax total.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComprobanteError {
    /// Invoice (or another required record) does not exist.
    #[error("invoice {0} not found")]
    NotFound(u64),

    /// A precondition failed: empty line list, kind/identity mismatch,
    /// malformed document number.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The invoice status does not permit the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A submission for this invoice is already running.
    #[error("submission already in progress for invoice {0}")]
    InFlight(u64),

    /// Recomputed totals diverge from the persisted aggregate beyond the
    /// rounding epsilon. Must never be silently adjusted.
    #[error("data integrity defect: {0}")]
    Integrity(String),

    /// Digital signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// XML generation or parsing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// ZIP packaging or extraction error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Network-level failure (timeout, refused connection, non-200
    /// status). Retryable via an explicit `resend`.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote spoke, but not the expected protocol (SOAP fault body
    /// missing, malformed receipt).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ComprobanteError {
    /// Whether the caller may reasonably retry via `resend`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }
}
