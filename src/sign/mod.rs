//! Enveloped digital signature for the UBL document.
//!
//! The signature lands inside `ext:ExtensionContent`, not at the document
//! root — generic XML-signature tooling appends at the root, so the
//! produced `ds:Signature` block is spliced into the extension placeholder
//! the builder left behind.
//!
//! The default implementation signs with Ed25519 (RFC 9231 algorithm URI)
//! over a SHA-256 digest. A certificate-backed signer can replace it
//! behind [`XmlSigner`] without touching the engine.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer as _, SigningKey};
use sha2::{Digest, Sha256};

use crate::core::ComprobanteError;

/// Algorithm URIs used in the SignedInfo block.
const C14N_URI: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const ENVELOPED_URI: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const SHA256_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const ED25519_URI: &str = "http://www.w3.org/2021/04/xmldsig-more#eddsa-ed25519";

/// Seam between the engine and the signing backend.
pub trait XmlSigner {
    /// Wrap the document in an enveloped signature. Returns the full
    /// document with the `ds:Signature` inside `ext:ExtensionContent`.
    fn sign(&self, xml: &str) -> Result<String, ComprobanteError>;
}

/// Ed25519-based enveloped signer.
pub struct Ed25519Signer {
    key: SigningKey,
    /// Signature element ID; conventionally the issuer RUC.
    signature_id: String,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey, signature_id: impl Into<String>) -> Self {
        Self {
            key,
            signature_id: signature_id.into(),
        }
    }

    /// Construct from a raw 32-byte seed.
    pub fn from_seed(seed: &[u8; 32], signature_id: impl Into<String>) -> Self {
        Self::new(SigningKey::from_bytes(seed), signature_id)
    }

    fn signature_block(&self, xml: &str) -> String {
        let digest = BASE64.encode(Sha256::digest(xml.as_bytes()));

        let signed_info = format!(
            r#"<ds:SignedInfo><ds:CanonicalizationMethod Algorithm="{C14N_URI}"/><ds:SignatureMethod Algorithm="{ED25519_URI}"/><ds:Reference URI=""><ds:Transforms><ds:Transform Algorithm="{ENVELOPED_URI}"/></ds:Transforms><ds:DigestMethod Algorithm="{SHA256_URI}"/><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"#
        );

        let signature_value = BASE64.encode(self.key.sign(signed_info.as_bytes()).to_bytes());
        let public_key = BASE64.encode(self.key.verifying_key().to_bytes());

        format!(
            r#"<ds:Signature Id="{id}">{signed_info}<ds:SignatureValue>{signature_value}</ds:SignatureValue><ds:KeyInfo><ds:KeyName>{id}</ds:KeyName><ds:KeyValue>{public_key}</ds:KeyValue></ds:KeyInfo></ds:Signature>"#,
            id = self.signature_id,
        )
    }
}

impl XmlSigner for Ed25519Signer {
    fn sign(&self, xml: &str) -> Result<String, ComprobanteError> {
        let block = self.signature_block(xml);
        insert_into_extension(xml, &block)
    }
}

/// Splice a signature block into the empty `ext:ExtensionContent`
/// placeholder. Fails if the document carries no placeholder or is
/// already signed.
fn insert_into_extension(xml: &str, signature: &str) -> Result<String, ComprobanteError> {
    const EMPTY: &str = "<ext:ExtensionContent/>";
    if !xml.contains(EMPTY) {
        return Err(ComprobanteError::Signing(
            "document has no empty ext:ExtensionContent placeholder".into(),
        ));
    }
    let filled = format!("<ext:ExtensionContent>{signature}</ext:ExtensionContent>");
    Ok(xml.replacen(EMPTY, &filled, 1))
}
