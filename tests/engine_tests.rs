use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, TimeZone, Utc};
use comprobante::core::*;
use comprobante::engine::{InvoiceStore, IssuanceEngine, Notification, NotificationSink};
use comprobante::packaging::{pack_document, unpack_single};
use comprobante::sign::{Ed25519Signer, XmlSigner};
use comprobante::soap::{BillSender, SoapReply};
use comprobante::ubl;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn issuer() -> Issuer {
    Issuer {
        ruc: "20123456789".into(),
        registration_name: "LABORATORIO CLINICO SAN MARTIN SAC".into(),
        trade_name: None,
        street: Some("Av. Arequipa 1234".into()),
        city: "LIMA".into(),
        district: "LINCE".into(),
        subdivision: "LIMA".into(),
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        environment: Environment::Beta,
        endpoint_override: None,
        credentials: SolCredentials {
            ruc: "20123456789".into(),
            sol_user: "MODDATOS".into(),
            sol_password: "MODDATOS".into(),
        },
        issuer: issuer(),
        tax_rate: dec!(0.18),
        allow_unsigned: false,
        smtp: None,
    }
}

fn boleta(id: u64, status: InvoiceStatus) -> Invoice {
    let lines = vec![InvoiceLine {
        service_code: "LAB001".into(),
        description: "Hemograma completo".into(),
        quantity: 1,
        unit_price: dec!(59.00),
        line_total: dec!(59.00),
    }];
    let total: Decimal = lines.iter().map(|l| l.line_total).sum();
    Invoice {
        id,
        number: "B001-00000007".parse().unwrap(),
        kind: DocumentKind::Receipt,
        status,
        customer: Counterparty {
            identity: IdentityDocument::Dni,
            identity_number: "44556677".into(),
            name: "María Quispe Huamán".into(),
            address: None,
            email: Some("maria.quispe@example.pe".into()),
        },
        subtotal: dec!(50.00),
        tax: dec!(9.00),
        total,
        issue_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        created_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
        lines,
    }
}

fn signer() -> Ed25519Signer {
    Ed25519Signer::from_seed(&[9u8; 32], "20123456789")
}

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct MemStore {
    invoices: Arc<Mutex<HashMap<u64, Invoice>>>,
    submissions: Arc<Mutex<Vec<(u64, SubmissionResult)>>>,
}

impl MemStore {
    fn with(invoice: Invoice) -> Self {
        let store = Self::default();
        store
            .invoices
            .lock()
            .unwrap()
            .insert(invoice.id, invoice);
        store
    }

    fn status_of(&self, id: u64) -> InvoiceStatus {
        self.invoices.lock().unwrap()[&id].status
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

impl InvoiceStore for MemStore {
    fn load(&self, invoice_id: u64) -> Result<Invoice, ComprobanteError> {
        self.invoices
            .lock()
            .unwrap()
            .get(&invoice_id)
            .cloned()
            .ok_or(ComprobanteError::NotFound(invoice_id))
    }

    fn set_status(&self, invoice_id: u64, status: InvoiceStatus) -> Result<(), ComprobanteError> {
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices
            .get_mut(&invoice_id)
            .ok_or(ComprobanteError::NotFound(invoice_id))?;
        invoice.status = status;
        Ok(())
    }

    fn record_submission(
        &self,
        invoice_id: u64,
        result: &SubmissionResult,
    ) -> Result<(), ComprobanteError> {
        self.submissions
            .lock()
            .unwrap()
            .push((invoice_id, result.clone()));
        Ok(())
    }
}

enum StubBehavior {
    Reply(SoapReply),
    TransportError,
}

struct StubSender {
    behavior: StubBehavior,
    calls: AtomicUsize,
    last_request: Mutex<Option<(String, Vec<u8>)>>,
    delay: Option<Duration>,
}

impl StubSender {
    fn replying(reply: SoapReply) -> Self {
        Self {
            behavior: StubBehavior::Reply(reply),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            delay: None,
        }
    }

    fn failing() -> Self {
        Self {
            behavior: StubBehavior::TransportError,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            delay: None,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BillSender for &StubSender {
    async fn send_bill(
        &self,
        filename: &str,
        archive: &[u8],
    ) -> Result<SoapReply, ComprobanteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some((filename.to_string(), archive.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            StubBehavior::Reply(reply) => Ok(reply.clone()),
            StubBehavior::TransportError => {
                Err(ComprobanteError::Transport("connection refused".into()))
            }
        }
    }
}

/// Accepted reply carrying a real zipped CDR.
fn accepted_reply() -> SoapReply {
    let cdr = r#"<ar:ApplicationResponse xmlns:ar="urn:oasis:names:specification:ubl:schema:xsd:ApplicationResponse-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
        <cbc:ResponseCode>0</cbc:ResponseCode>
        <cbc:Description>La Boleta ha sido aceptada</cbc:Description>
    </ar:ApplicationResponse>"#;
    let archive = pack_document(cdr.as_bytes(), "R-20123456789-03-B001-00000007").unwrap();
    SoapReply::Receipt(Some(BASE64.encode(archive)))
}

struct FailingSigner;

impl XmlSigner for FailingSigner {
    fn sign(&self, _xml: &str) -> Result<String, ComprobanteError> {
        Err(ComprobanteError::Signing("certificate not loaded".into()))
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    delivered: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: Notification) -> Result<(), ComprobanteError> {
        self.delivered.lock().unwrap().push(notification);
        if self.fail {
            Err(ComprobanteError::Transport("smtp unreachable".into()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Happy path & outcome mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn issue_accepts_and_persists() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer()).unwrap();

    let invoice = engine.issue(7).await.unwrap();

    assert_eq!(invoice.status, InvoiceStatus::Accepted);
    assert_eq!(store.status_of(7), InvoiceStatus::Accepted);
    assert_eq!(store.submission_count(), 1);
    assert_eq!(sender.call_count(), 1);
}

#[tokio::test]
async fn archive_follows_naming_convention() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store, &sender, signer()).unwrap();

    engine.issue(7).await.unwrap();

    let (filename, archive) = sender.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(filename, "20123456789-03-B001-00000007.zip");
    let xml = unpack_single(&archive).unwrap().unwrap();
    assert!(String::from_utf8(xml).unwrap().contains("B001-00000007"));
}

#[tokio::test]
async fn fault_rejects_invoice() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::replying(SoapReply::Fault {
        code: "Client.2335".into(),
        reason: "El documento ya fue informado".into(),
    });
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer()).unwrap();

    let invoice = engine.issue(7).await.unwrap();

    assert_eq!(invoice.status, InvoiceStatus::Rejected);
    assert_eq!(store.status_of(7), InvoiceStatus::Rejected);
}

#[tokio::test]
async fn missing_receipt_still_accepts() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::replying(SoapReply::Receipt(None));
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer()).unwrap();

    let invoice = engine.issue(7).await.unwrap();

    assert_eq!(invoice.status, InvoiceStatus::Accepted);
    let submissions = store.submissions.lock().unwrap();
    assert_eq!(submissions[0].1.notes, vec!["receipt unavailable".to_string()]);
}

#[tokio::test]
async fn transport_error_rejects_and_reraises() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::failing();
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer()).unwrap();

    let err = engine.issue(7).await.unwrap_err();

    assert!(matches!(err, ComprobanteError::Transport(_)));
    assert!(err.is_retryable());
    // Forced to REJECTED, never left ambiguous
    assert_eq!(store.status_of(7), InvoiceStatus::Rejected);
    assert_eq!(store.submission_count(), 0);
}

#[tokio::test]
async fn missing_invoice_is_not_found() {
    let store = MemStore::default();
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store, &sender, signer()).unwrap();

    let err = engine.issue(99).await.unwrap_err();
    assert!(matches!(err, ComprobanteError::NotFound(99)));
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_fails_fast_without_network() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Cancelled));
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer()).unwrap();

    assert!(matches!(
        engine.issue(7).await.unwrap_err(),
        ComprobanteError::InvalidState(_)
    ));
    assert!(matches!(
        engine.resend(7).await.unwrap_err(),
        ComprobanteError::InvalidState(_)
    ));
    assert_eq!(sender.call_count(), 0);
    assert_eq!(store.status_of(7), InvoiceStatus::Cancelled);
}

#[tokio::test]
async fn draft_cannot_be_issued() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Draft));
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store, &sender, signer()).unwrap();

    assert!(matches!(
        engine.issue(7).await.unwrap_err(),
        ComprobanteError::InvalidState(_)
    ));
    assert_eq!(sender.call_count(), 0);
}

#[tokio::test]
async fn accepted_requires_explicit_resend() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Accepted));
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer()).unwrap();

    assert!(matches!(
        engine.issue(7).await.unwrap_err(),
        ComprobanteError::InvalidState(_)
    ));
    assert_eq!(sender.call_count(), 0);

    let invoice = engine.resend(7).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Accepted);
    assert_eq!(sender.call_count(), 1);
}

#[tokio::test]
async fn resend_is_idempotent() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Rejected));
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer()).unwrap();

    let first = engine.resend(7).await.unwrap();
    let second = engine.resend(7).await.unwrap();

    assert_eq!(first.status, InvoiceStatus::Accepted);
    assert_eq!(second.status, InvoiceStatus::Accepted);
    // Same document number both times — never regenerated
    assert_eq!(first.number, second.number);
    let (filename, _) = sender.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(filename, "20123456789-03-B001-00000007.zip");
    assert_eq!(sender.call_count(), 2);
}

#[tokio::test]
async fn rejected_then_resend_recovers() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let failing = StubSender::failing();
    let engine = IssuanceEngine::new(config(), store.clone(), &failing, signer()).unwrap();
    engine.issue(7).await.unwrap_err();
    assert_eq!(store.status_of(7), InvoiceStatus::Rejected);
    drop(engine);

    let ok = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store.clone(), &ok, signer()).unwrap();
    let invoice = engine.resend(7).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Accepted);
}

// ---------------------------------------------------------------------------
// Mutual exclusion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_submissions_of_same_invoice_are_exclusive() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender: &'static StubSender = Box::leak(Box::new(
        StubSender::replying(accepted_reply()).slow(Duration::from_millis(200)),
    ));
    let engine = Arc::new(IssuanceEngine::new(config(), store, sender, signer()).unwrap());

    let a = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.issue(7).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let b = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.issue(7).await }
    });

    let first = a.await.unwrap();
    let second = b.await.unwrap();

    assert!(first.is_ok());
    assert!(matches!(second, Err(ComprobanteError::InFlight(7))));
    // Exactly one pipeline reached the remote
    assert_eq!(sender.call_count(), 1);
}

// ---------------------------------------------------------------------------
// Degraded signing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn degraded_signing_sends_builder_output_verbatim() {
    let mut config = config();
    config.allow_unsigned = true;
    let invoice = boleta(7, InvoiceStatus::Pending);
    let expected = ubl::to_ubl_xml(&invoice, &config.issuer, config.tax_rate).unwrap();

    let store = MemStore::with(invoice);
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config, store, &sender, FailingSigner).unwrap();

    engine.issue(7).await.unwrap();

    let (_, archive) = sender.last_request.lock().unwrap().clone().unwrap();
    let sent = unpack_single(&archive).unwrap().unwrap();
    assert_eq!(sent, expected.as_bytes());
}

#[tokio::test]
async fn signing_failure_is_fatal_without_degraded_mode() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::replying(accepted_reply());
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, FailingSigner).unwrap();

    let err = engine.issue(7).await.unwrap_err();

    assert!(matches!(err, ComprobanteError::Signing(_)));
    // Failed before any network call; still resendable
    assert_eq!(sender.call_count(), 0);
    assert_eq!(store.status_of(7), InvoiceStatus::Pending);
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accepted_invoice_notifies_with_attachments() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::replying(accepted_reply());
    let sink = RecordingSink::default();
    let engine = IssuanceEngine::new(config(), store, &sender, signer())
        .unwrap()
        .with_notifications(sink.clone());

    engine.issue(7).await.unwrap();

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    let notification = &delivered[0];
    assert_eq!(notification.recipient, "maria.quispe@example.pe");
    assert!(notification.subject.contains("B001-00000007"));
    let names: Vec<&str> = notification
        .attachments
        .iter()
        .map(|a| a.filename.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "20123456789-03-B001-00000007.xml",
            "20123456789-03-B001-00000007.zip",
            "R-20123456789-03-B001-00000007.xml",
        ]
    );
}

#[tokio::test]
async fn notification_failure_never_reverts_acceptance() {
    let store = MemStore::with(boleta(7, InvoiceStatus::Pending));
    let sender = StubSender::replying(accepted_reply());
    let sink = RecordingSink {
        fail: true,
        ..RecordingSink::default()
    };
    let engine = IssuanceEngine::new(config(), store.clone(), &sender, signer())
        .unwrap()
        .with_notifications(sink);

    let invoice = engine.issue(7).await.unwrap();

    assert_eq!(invoice.status, InvoiceStatus::Accepted);
    assert_eq!(store.status_of(7), InvoiceStatus::Accepted);
}

#[tokio::test]
async fn no_contact_address_skips_notification() {
    let mut invoice = boleta(7, InvoiceStatus::Pending);
    invoice.customer.email = None;
    let store = MemStore::with(invoice);
    let sender = StubSender::replying(accepted_reply());
    let sink = RecordingSink::default();
    let engine = IssuanceEngine::new(config(), store, &sender, signer())
        .unwrap()
        .with_notifications(sink.clone());

    engine.issue(7).await.unwrap();

    assert!(sink.delivered.lock().unwrap().is_empty());
}
