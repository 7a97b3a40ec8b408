//! UBL 2.1 document generation for SUNAT electronic invoicing.
//!
//! Produces the namespace-qualified `Invoice` document submitted via
//! sendBill: extension placeholder for the digital signature, document
//! identifiers, supplier and customer party blocks, IGV tax total, legal
//! monetary total, and one line block per service. Taxable bases are
//! reverse-computed from IGV-inclusive prices.

mod builder;
pub(crate) mod xml_utils;

pub use builder::{DocumentTotals, LineAmounts, line_amounts, reconstruct_totals, to_ubl_xml};

/// SUNAT UBL customization version (cbc:CustomizationID).
pub const CUSTOMIZATION_ID: &str = "2.0";

/// Invoice currency. The engine bills in soles only.
pub const CURRENCY: &str = "PEN";

/// UNECE Rec 20 unit code for "number of units".
pub const UNIT_CODE: &str = "NIU";

/// UBL 2.1 namespace URIs.
pub mod ubl_ns {
    pub const INVOICE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
    pub const CAC: &str =
        "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
    pub const CBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
    pub const EXT: &str =
        "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";
    pub const DS: &str = "http://www.w3.org/2000/09/xmldsig#";
    pub const SAC: &str =
        "urn:sunat:names:specification:ubl:peru:schema:xsd:SunatAggregateComponents-1";
}

/// SUNAT catalog values fixed for this document profile.
pub mod catalog {
    /// Catalog 05: IGV tax scheme ID.
    pub const TAX_SCHEME_ID: &str = "1000";
    pub const TAX_SCHEME_NAME: &str = "IGV";
    pub const TAX_TYPE_CODE: &str = "VAT";
    /// UNTDID 5305: standard-rated category.
    pub const TAX_CATEGORY: &str = "S";
    /// Catalog 07: gravado — operación onerosa.
    pub const EXEMPTION_REASON: &str = "10";
    /// Catalog 16: unit price includes IGV.
    pub const PRICE_TYPE: &str = "01";
    /// Catalog 01 list ID for cbc:InvoiceTypeCode.
    pub const TYPE_CODE_LIST: &str = "0101";
}
