//! CDR (constancia de recepción) interpretation.
//!
//! The receipt arrives as base64 of a single-entry ZIP holding one XML
//! document. Absent and empty receipts are expected shapes in the test
//! environment and map to an accepted outcome with a distinguishing note,
//! not to an error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;

use super::client::SoapReply;
use crate::core::{ComprobanteError, Outcome, SubmissionResult};
use crate::packaging::unpack_single;

/// Map a CDR response code to the normalized outcome: `"0"` accepted,
/// any other code starting with `0` accepted with observations, anything
/// else rejected.
pub fn outcome_for_code(code: &str) -> Outcome {
    if code == "0" {
        Outcome::Accepted
    } else if code.starts_with('0') {
        Outcome::AcceptedWithNotes
    } else {
        Outcome::Rejected
    }
}

/// Turn a raw SOAP reply into a normalized [`SubmissionResult`].
pub fn interpret(reply: &SoapReply) -> Result<SubmissionResult, ComprobanteError> {
    match reply {
        SoapReply::Fault { code, reason } => Ok(SubmissionResult {
            outcome: Outcome::Rejected,
            response_code: Some(code.clone()),
            response_description: Some(reason.clone()),
            notes: vec![],
            receipt_xml: vec![],
        }),
        SoapReply::Receipt(None) => {
            warn!("authority accepted the document without issuing a receipt");
            Ok(accepted_without_receipt("receipt unavailable"))
        }
        SoapReply::Receipt(Some(encoded)) => {
            let archive = BASE64
                .decode(encoded)
                .map_err(|e| ComprobanteError::Protocol(format!("receipt is not base64: {e}")))?;
            let xml = match unpack_single(&archive)? {
                Some(xml) if !xml.iter().all(u8::is_ascii_whitespace) => xml,
                _ => {
                    warn!("authority returned an empty receipt archive");
                    return Ok(accepted_without_receipt("empty receipt returned"));
                }
            };

            let fields = parse_receipt(&xml)?;
            let code = fields.response_code.ok_or_else(|| {
                ComprobanteError::Protocol("receipt carries no response code".into())
            })?;
            Ok(SubmissionResult {
                outcome: outcome_for_code(&code),
                response_code: Some(code),
                response_description: fields.description,
                notes: fields.notes,
                receipt_xml: xml,
            })
        }
    }
}

fn accepted_without_receipt(note: &str) -> SubmissionResult {
    SubmissionResult {
        outcome: Outcome::Accepted,
        response_code: None,
        response_description: None,
        notes: vec![note.to_string()],
        receipt_xml: vec![],
    }
}

#[derive(Debug, Default)]
struct ReceiptFields {
    response_code: Option<String>,
    description: Option<String>,
    notes: Vec<String>,
}

/// Pull ResponseCode, Description, and Notes out of the receipt XML.
/// Matched by local name; the receipt's namespace prefixes vary.
fn parse_receipt(xml: &[u8]) -> Result<ReceiptFields, ComprobanteError> {
    let text = std::str::from_utf8(xml)
        .map_err(|e| ComprobanteError::Protocol(format!("receipt is not UTF-8: {e}")))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut fields = ReceiptFields::default();
    let mut current: Vec<u8> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => current = e.local_name().as_ref().to_vec(),
            Ok(Event::Text(t)) => {
                let value = t
                    .unescape()
                    .map_err(|e| ComprobanteError::Protocol(format!("bad receipt text: {e}")))?;
                match current.as_slice() {
                    b"ResponseCode" if fields.response_code.is_none() => {
                        fields.response_code = Some(value.into_owned());
                    }
                    b"Description" if fields.description.is_none() => {
                        fields.description = Some(value.into_owned());
                    }
                    b"Note" => fields.notes.push(value.into_owned()),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current.clear(),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ComprobanteError::Protocol(format!(
                    "malformed receipt XML: {e}"
                )));
            }
            _ => {}
        }
    }
    Ok(fields)
}
