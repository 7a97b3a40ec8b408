use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ComprobanteError;
use super::types::DocumentKind;

/// Two-part human document identifier: series + sequential number,
/// rendered `{series}-{8-digit sequence}` (e.g. `F001-00000042`).
///
/// The series is a letter followed by three digits — `F...` for facturas,
/// `B...` for boletas. SUNAT requires gapless sequences per series; the
/// number itself is assigned at invoice creation, never regenerated by a
/// resend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesNumber {
    series: String,
    sequence: u64,
}

impl SeriesNumber {
    /// Build from series and sequence, validating the series shape.
    pub fn new(series: impl Into<String>, sequence: u64) -> Result<Self, ComprobanteError> {
        let series = series.into();
        if !is_valid_series(&series) {
            return Err(ComprobanteError::Validation(format!(
                "invalid series '{series}': expected a letter followed by three digits"
            )));
        }
        if sequence == 0 || sequence > 99_999_999 {
            return Err(ComprobanteError::Validation(format!(
                "sequence {sequence} out of range 1..=99999999"
            )));
        }
        Ok(Self { series, sequence })
    }

    /// Series part, e.g. `F001`.
    pub fn series(&self) -> &str {
        &self.series
    }

    /// Sequence part, e.g. 42.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Zero-padded sequence as it appears in the document ID.
    pub fn padded_sequence(&self) -> String {
        format!("{:08}", self.sequence)
    }

    /// Whether the series prefix letter matches the document kind
    /// (`F` for facturas, `B` for boletas).
    pub fn matches_kind(&self, kind: DocumentKind) -> bool {
        let expected = match kind {
            DocumentKind::Invoice => 'F',
            DocumentKind::Receipt => 'B',
        };
        self.series.starts_with(expected)
    }

    /// Filename stem mandated by the submission protocol:
    /// `{issuerRuc}-{documentTypeCode}-{series}-{sequence}`.
    ///
    /// The ZIP sent to the authority is `{stem}.zip` with a single
    /// `{stem}.xml` entry.
    pub fn archive_stem(&self, issuer_ruc: &str, kind: DocumentKind) -> String {
        format!(
            "{}-{}-{}-{}",
            issuer_ruc,
            kind.code(),
            self.series,
            self.padded_sequence()
        )
    }
}

fn is_valid_series(series: &str) -> bool {
    let bytes = series.as_bytes();
    bytes.len() == 4
        && bytes[0].is_ascii_uppercase()
        && bytes[1..].iter().all(u8::is_ascii_digit)
}

impl fmt::Display for SeriesNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.series, self.padded_sequence())
    }
}

impl FromStr for SeriesNumber {
    type Err = ComprobanteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (series, seq) = s.split_once('-').ok_or_else(|| {
            ComprobanteError::Validation(format!(
                "invalid document number '{s}': expected SERIES-SEQUENCE"
            ))
        })?;
        if seq.len() != 8 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ComprobanteError::Validation(format!(
                "invalid sequence '{seq}': expected eight digits"
            )));
        }
        let sequence: u64 = seq
            .parse()
            .map_err(|_| ComprobanteError::Validation(format!("invalid sequence '{seq}'")))?;
        Self::new(series, sequence)
    }
}

impl TryFrom<String> for SeriesNumber {
    type Error = ComprobanteError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SeriesNumber> for String {
    fn from(n: SeriesNumber) -> Self {
        n.to_string()
    }
}
