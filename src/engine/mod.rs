//! Issuance orchestrator.
//!
//! Drives the pipeline build → sign → package → submit → interpret →
//! persist for one invoice at a time, enforcing the status state machine
//! and at-most-one in-flight submission per invoice ID. This is the only
//! component with persistence side effects.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::core::{
    ComprobanteError, EngineConfig, Invoice, InvoiceStatus, SubmissionResult,
};
use crate::packaging::pack_document;
use crate::sign::XmlSigner;
use crate::soap::client::BillSender;
use crate::soap::interpret;
use crate::ubl;

/// Persistence seam. The engine loads one invoice with its lines, advances
/// its status, and records receipt metadata; it never creates or deletes.
pub trait InvoiceStore {
    /// Load an invoice with its lines. `NotFound` if absent.
    fn load(&self, invoice_id: u64) -> Result<Invoice, ComprobanteError>;

    /// Persist a new status.
    fn set_status(&self, invoice_id: u64, status: InvoiceStatus) -> Result<(), ComprobanteError>;

    /// Record the receipt metadata of a completed submission.
    fn record_submission(
        &self,
        invoice_id: u64,
        result: &SubmissionResult,
    ) -> Result<(), ComprobanteError>;
}

/// One file attached to an outbound notification.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Delivery request handed to the notification channel.
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Outbound notification channel (e.g. SMTP). Delivery is fire-and-forget
/// relative to the invoice: failures are logged, never raised.
pub trait NotificationSink {
    fn deliver(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), ComprobanteError>> + Send;
}

/// No-op sink used when no notification channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    async fn deliver(&self, _notification: Notification) -> Result<(), ComprobanteError> {
        Ok(())
    }
}

/// The issuance engine.
///
/// Concurrent submissions of different invoices run freely in parallel;
/// a second submission of the same invoice is rejected with
/// [`ComprobanteError::InFlight`] while the first is still running — the
/// remote service is not idempotent for duplicate sendBill calls.
pub struct IssuanceEngine<S, C, X, N = NullSink> {
    config: EngineConfig,
    store: S,
    sender: C,
    signer: X,
    sink: Option<N>,
    in_flight: Mutex<HashSet<u64>>,
}

impl<S, C, X> IssuanceEngine<S, C, X, NullSink> {
    /// Build an engine without a notification channel. Validates the
    /// configuration once, up front.
    pub fn new(
        config: EngineConfig,
        store: S,
        sender: C,
        signer: X,
    ) -> Result<Self, ComprobanteError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            sender,
            signer,
            sink: None,
            in_flight: Mutex::new(HashSet::new()),
        })
    }
}

impl<S, C, X, N> IssuanceEngine<S, C, X, N>
where
    S: InvoiceStore + Sync,
    C: BillSender + Sync,
    X: XmlSigner + Sync,
    N: NotificationSink + Sync,
{
    /// Attach a notification channel.
    pub fn with_notifications<M>(self, sink: M) -> IssuanceEngine<S, C, X, M> {
        IssuanceEngine {
            config: self.config,
            store: self.store,
            sender: self.sender,
            signer: self.signer,
            sink: Some(sink),
            in_flight: self.in_flight,
        }
    }

    /// Submit a PENDING or REJECTED invoice to the tax authority.
    pub async fn issue(&self, invoice_id: u64) -> Result<Invoice, ComprobanteError> {
        self.submit(invoice_id, false).await
    }

    /// Replay the full pipeline for an invoice, including one already
    /// SENT or ACCEPTED. The document number is never regenerated, so the
    /// remote sees an idempotent resubmission.
    pub async fn resend(&self, invoice_id: u64) -> Result<Invoice, ComprobanteError> {
        self.submit(invoice_id, true).await
    }

    async fn submit(&self, invoice_id: u64, resend: bool) -> Result<Invoice, ComprobanteError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, invoice_id)?;

        let mut invoice = self.store.load(invoice_id)?;

        // State machine, enforced before any XML exists.
        if invoice.status.is_terminal() {
            return Err(ComprobanteError::InvalidState(format!(
                "{}: cancelled invoices cannot be submitted",
                invoice.number
            )));
        }
        let allowed = if resend {
            invoice.status.may_resend()
        } else {
            invoice.status.may_issue()
        };
        if !allowed {
            return Err(ComprobanteError::InvalidState(format!(
                "{}: cannot {} from status {:?}",
                invoice.number,
                if resend { "resend" } else { "issue" },
                invoice.status
            )));
        }
        invoice.check_issuable()?;

        let xml = ubl::to_ubl_xml(&invoice, &self.config.issuer, self.config.tax_rate)?;

        let (payload, signed) = match self.signer.sign(&xml) {
            Ok(signed_xml) => (signed_xml, true),
            Err(e) if self.config.degraded_signing_allowed() => {
                warn!(
                    invoice = %invoice.number,
                    error = %e,
                    "signing failed; transmitting unsigned in degraded mode"
                );
                (xml, false)
            }
            Err(e) => return Err(e),
        };

        let stem = invoice
            .number
            .archive_stem(&self.config.issuer.ruc, invoice.kind);
        let archive = pack_document(payload.as_bytes(), &stem)?;
        let filename = format!("{stem}.zip");

        info!(invoice = %invoice.number, %filename, resend, signed, "submitting to bill service");

        // From here the submission is committed network-side. The invoice
        // stays PENDING until an outcome is persisted, so an abort mid-way
        // is detectable by reconciliation instead of stuck at SENT.
        let result = match self.sender.send_bill(&filename, &archive).await {
            Ok(reply) => match interpret(&reply) {
                Ok(result) => result,
                Err(e) => {
                    error!(invoice = %invoice.number, error = %e, "unintelligible reply");
                    self.store.set_status(invoice_id, InvoiceStatus::Rejected)?;
                    return Err(e);
                }
            },
            Err(e) => {
                error!(invoice = %invoice.number, error = %e, "submission failed");
                self.store.set_status(invoice_id, InvoiceStatus::Rejected)?;
                return Err(e);
            }
        };

        let status = result.final_status();
        self.store.set_status(invoice_id, status)?;
        self.store.record_submission(invoice_id, &result)?;
        invoice.status = status;

        info!(
            invoice = %invoice.number,
            outcome = ?result.outcome,
            code = result.response_code.as_deref().unwrap_or("-"),
            "submission outcome persisted"
        );

        if status == InvoiceStatus::Accepted {
            self.notify(&invoice, &stem, payload.as_bytes(), &archive, &result)
                .await;
        }

        Ok(invoice)
    }

    /// Request delivery of the document set to the counterparty.
    /// Fire-and-forget: a delivery failure never affects the invoice.
    async fn notify(
        &self,
        invoice: &Invoice,
        stem: &str,
        xml: &[u8],
        archive: &[u8],
        result: &SubmissionResult,
    ) {
        let Some(sink) = &self.sink else { return };
        let Some(recipient) = &invoice.customer.email else {
            return;
        };

        let mut attachments = vec![
            Attachment {
                filename: format!("{stem}.xml"),
                bytes: xml.to_vec(),
                mime_type: "text/xml".into(),
            },
            Attachment {
                filename: format!("{stem}.zip"),
                bytes: archive.to_vec(),
                mime_type: "application/zip".into(),
            },
        ];
        if !result.receipt_xml.is_empty() {
            attachments.push(Attachment {
                filename: format!("R-{stem}.xml"),
                bytes: result.receipt_xml.clone(),
                mime_type: "text/xml".into(),
            });
        }

        let notification = Notification {
            recipient: recipient.clone(),
            subject: format!("Comprobante electrónico {}", invoice.number),
            body: format!(
                "{} le envía su comprobante electrónico {}.",
                self.config.issuer.registration_name, invoice.number
            ),
            attachments,
        };

        if let Err(e) = sink.deliver(notification).await {
            warn!(invoice = %invoice.number, error = %e, "notification delivery failed");
        }
    }
}

/// Marks an invoice as having a submission in progress; cleared on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<u64>>,
    invoice_id: u64,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(
        set: &'a Mutex<HashSet<u64>>,
        invoice_id: u64,
    ) -> Result<Self, ComprobanteError> {
        let mut guard = lock_in_flight(set);
        if !guard.insert(invoice_id) {
            return Err(ComprobanteError::InFlight(invoice_id));
        }
        Ok(Self { set, invoice_id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_in_flight(self.set).remove(&self.invoice_id);
    }
}

fn lock_in_flight(set: &Mutex<HashSet<u64>>) -> std::sync::MutexGuard<'_, HashSet<u64>> {
    // A poisoned lock only means another pipeline panicked; the set of
    // in-flight IDs is still coherent.
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
