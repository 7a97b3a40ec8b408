use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use tracing::{debug, error};

use crate::core::{ComprobanteError, EngineConfig, SolCredentials};

/// The sendBill service must answer within this window.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw reply from the bill service, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoapReply {
    /// SOAP Fault in an otherwise well-formed response.
    Fault { code: String, reason: String },
    /// `sendBillResponse` was present. `None` when the
    /// `applicationResponse` field was absent or blank — the test
    /// environment accepts without issuing a receipt.
    Receipt(Option<String>),
}

/// Seam between the orchestrator and the wire. The production
/// implementation is [`SoapBillClient`]; tests substitute stubs.
pub trait BillSender {
    /// Submit a packaged document. `filename` is `{stem}.zip`.
    fn send_bill(
        &self,
        filename: &str,
        archive: &[u8],
    ) -> impl Future<Output = Result<SoapReply, ComprobanteError>> + Send;
}

/// SOAP client for the SUNAT bill service.
///
/// Constructed explicitly with its endpoint and credentials and passed
/// into the engine — no process-wide singleton.
#[derive(Debug, Clone)]
pub struct SoapBillClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: SolCredentials,
}

impl SoapBillClient {
    pub fn new(config: &EngineConfig) -> Result<Self, ComprobanteError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ComprobanteError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint().to_string(),
            credentials: config.credentials.clone(),
        })
    }

    /// SOAP envelope with a WS-Security UsernameToken header. The
    /// protocol mandates a cleartext password.
    fn envelope(&self, filename: &str, archive: &[u8]) -> String {
        let username = self.credentials.username();
        let content = BASE64.encode(archive);
        format!(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ser="http://service.sunat.gob.pe" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
<soapenv:Header>
<wsse:Security>
<wsse:UsernameToken>
<wsse:Username>{}</wsse:Username>
<wsse:Password>{}</wsse:Password>
</wsse:UsernameToken>
</wsse:Security>
</soapenv:Header>
<soapenv:Body>
<ser:sendBill>
<fileName>{}</fileName>
<contentFile>{}</contentFile>
</ser:sendBill>
</soapenv:Body>
</soapenv:Envelope>"#,
            escape(&username),
            escape(&self.credentials.sol_password),
            escape(filename),
            content,
        )
    }
}

impl BillSender for SoapBillClient {
    async fn send_bill(
        &self,
        filename: &str,
        archive: &[u8],
    ) -> Result<SoapReply, ComprobanteError> {
        let envelope = self.envelope(filename, archive);
        debug!(filename, archive_bytes = archive.len(), "submitting sendBill");

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope)
            .send()
            .await
            .map_err(|e| ComprobanteError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ComprobanteError::Transport(e.to_string()))?;

        if !status.is_success() {
            error!(%status, body = %truncate(&body, 1000), "bill service returned non-200");
            return Err(ComprobanteError::Transport(format!(
                "bill service returned HTTP {status}"
            )));
        }

        parse_reply(&body)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Split a 200 response body into fault / receipt. Namespace prefixes
/// vary between environments, so elements are matched by local name.
pub fn parse_reply(body: &str) -> Result<SoapReply, ComprobanteError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut in_fault = false;
    let mut saw_response = false;
    let mut current: Vec<u8> = Vec::new();
    let mut fault_code = String::new();
    let mut fault_reason = String::new();
    let mut application_response: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = e.local_name().as_ref().to_vec();
                match current.as_slice() {
                    b"Fault" => in_fault = true,
                    b"sendBillResponse" => saw_response = true,
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ComprobanteError::Protocol(format!("bad response text: {e}")))?;
                match current.as_slice() {
                    b"faultcode" if in_fault => fault_code = text.into_owned(),
                    b"faultstring" if in_fault => fault_reason = text.into_owned(),
                    b"applicationResponse" => {
                        let trimmed = text.trim().to_string();
                        if !trimmed.is_empty() {
                            application_response = Some(trimmed);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current.clear(),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ComprobanteError::Protocol(format!(
                    "malformed SOAP response: {e}"
                )));
            }
            _ => {}
        }
    }

    if in_fault {
        return Ok(SoapReply::Fault {
            code: fault_code,
            reason: fault_reason,
        });
    }
    if saw_response {
        return Ok(SoapReply::Receipt(application_response));
    }
    Err(ComprobanteError::Protocol(
        "response carried neither sendBillResponse nor Fault".into(),
    ))
}
