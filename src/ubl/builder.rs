use rust_decimal::Decimal;
use rust_decimal::prelude::RoundingStrategy;

use super::xml_utils::{XmlResult, XmlWriter, format_amount, format_percent};
use super::{CURRENCY, CUSTOMIZATION_ID, UNIT_CODE, catalog, ubl_ns};
use crate::core::{ComprobanteError, Counterparty, Invoice, InvoiceLine, Issuer};

/// Reverse-computed amounts for one line, derived from its IGV-inclusive
/// unit price. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmounts {
    /// Tax-inclusive line amount (`unit_price * quantity`).
    pub gross: Decimal,
    /// Taxable base for the line.
    pub taxable: Decimal,
    /// IGV for the line; `gross - taxable`, so the pair always sums back
    /// to the gross amount exactly.
    pub tax: Decimal,
}

/// Document-level totals recomputed from the lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTotals {
    pub taxable: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
    pub lines: Vec<LineAmounts>,
}

/// Largest tolerated drift between the recomputed tax-inclusive total and
/// the persisted invoice total.
const ROUNDING_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

fn round_money(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Split one IGV-inclusive line into taxable base and tax at the given
/// rate. The base is rounded to 2 dp; the tax takes the remainder so the
/// two always add up to the rounded gross amount.
pub fn line_amounts(line: &InvoiceLine, tax_rate: Decimal) -> LineAmounts {
    let gross = round_money(line.unit_price * Decimal::from(line.quantity));
    let taxable = round_money(gross / (Decimal::ONE + tax_rate));
    LineAmounts {
        gross,
        taxable,
        tax: gross - taxable,
    }
}

/// Recompute document totals as the sum of per-line bases and taxes.
///
/// The persisted `subtotal`/`tax` aggregates are deliberately ignored —
/// rounding drift between them and the line-level recomputation is
/// absorbed here. The recomputed gross total must still match the
/// persisted `total` within 0.01; a larger divergence is a data-integrity
/// defect and is surfaced, never silently adjusted.
pub fn reconstruct_totals(
    invoice: &Invoice,
    tax_rate: Decimal,
) -> Result<DocumentTotals, ComprobanteError> {
    let lines: Vec<LineAmounts> = invoice
        .lines
        .iter()
        .map(|l| line_amounts(l, tax_rate))
        .collect();
    let taxable: Decimal = lines.iter().map(|l| l.taxable).sum();
    let tax: Decimal = lines.iter().map(|l| l.tax).sum();
    let gross: Decimal = lines.iter().map(|l| l.gross).sum();

    let drift = (gross - invoice.total).abs();
    if drift > ROUNDING_EPSILON {
        return Err(ComprobanteError::Integrity(format!(
            "{}: recomputed total {} diverges from persisted total {} by {}",
            invoice.number, gross, invoice.total, drift
        )));
    }

    Ok(DocumentTotals {
        taxable,
        tax,
        gross,
        lines,
    })
}

/// Generate the SUNAT UBL 2.1 Invoice document.
///
/// Pure with respect to its inputs; the only failure modes are
/// precondition violations and the totals integrity check.
pub fn to_ubl_xml(invoice: &Invoice, issuer: &Issuer, tax_rate: Decimal) -> XmlResult {
    invoice.check_issuable()?;
    let totals = reconstruct_totals(invoice, tax_rate)?;

    let mut w = XmlWriter::new()?;
    w.start_element_with_attrs(
        "Invoice",
        &[
            ("xmlns", ubl_ns::INVOICE),
            ("xmlns:cac", ubl_ns::CAC),
            ("xmlns:cbc", ubl_ns::CBC),
            ("xmlns:ext", ubl_ns::EXT),
            ("xmlns:ds", ubl_ns::DS),
            ("xmlns:sac", ubl_ns::SAC),
        ],
    )?;

    // Placeholder the signer fills in; must stay first in document order.
    w.start_element("ext:UBLExtensions")?;
    w.start_element("ext:UBLExtension")?;
    w.empty_element("ext:ExtensionContent")?;
    w.end_element("ext:UBLExtension")?;
    w.end_element("ext:UBLExtensions")?;

    w.text_element("cbc:UBLVersionID", "2.1")?;
    w.text_element("cbc:CustomizationID", CUSTOMIZATION_ID)?;
    w.text_element("cbc:ID", &invoice.number.to_string())?;
    w.text_element("cbc:IssueDate", &invoice.issue_date.to_string())?;
    w.text_element(
        "cbc:IssueTime",
        &invoice.created_at.time().format("%H:%M:%S").to_string(),
    )?;
    w.text_element_with_attrs(
        "cbc:InvoiceTypeCode",
        invoice.kind.code(),
        &[("listID", catalog::TYPE_CODE_LIST)],
    )?;
    w.text_element("cbc:DocumentCurrencyCode", CURRENCY)?;

    write_signature_placeholder(&mut w, issuer)?;
    write_supplier_party(&mut w, issuer)?;
    write_customer_party(&mut w, &invoice.customer)?;
    write_tax_total(&mut w, &totals)?;
    write_monetary_total(&mut w, &totals)?;

    for (idx, (line, amounts)) in invoice.lines.iter().zip(&totals.lines).enumerate() {
        write_invoice_line(&mut w, idx + 1, line, amounts, tax_rate)?;
    }

    w.end_element("Invoice")?;
    w.into_string()
}

fn write_signature_placeholder(w: &mut XmlWriter, issuer: &Issuer) -> Result<(), ComprobanteError> {
    w.start_element("cac:Signature")?;
    w.text_element("cbc:ID", &issuer.ruc)?;
    w.start_element("cac:SignatoryParty")?;
    w.start_element("cac:PartyIdentification")?;
    w.text_element("cbc:ID", &issuer.ruc)?;
    w.end_element("cac:PartyIdentification")?;
    w.start_element("cac:PartyName")?;
    w.text_element("cbc:Name", &issuer.registration_name)?;
    w.end_element("cac:PartyName")?;
    w.end_element("cac:SignatoryParty")?;
    w.start_element("cac:DigitalSignatureAttachment")?;
    w.start_element("cac:ExternalReference")?;
    w.text_element("cbc:URI", &format!("#{}", issuer.ruc))?;
    w.end_element("cac:ExternalReference")?;
    w.end_element("cac:DigitalSignatureAttachment")?;
    w.end_element("cac:Signature")?;
    Ok(())
}

fn write_supplier_party(w: &mut XmlWriter, issuer: &Issuer) -> Result<(), ComprobanteError> {
    w.start_element("cac:AccountingSupplierParty")?;
    w.start_element("cac:Party")?;

    w.start_element("cac:PartyIdentification")?;
    w.text_element_with_attrs("cbc:ID", &issuer.ruc, &[("schemeID", "6")])?;
    w.end_element("cac:PartyIdentification")?;

    if let Some(trade_name) = &issuer.trade_name {
        w.start_element("cac:PartyName")?;
        w.text_element("cbc:Name", trade_name)?;
        w.end_element("cac:PartyName")?;
    }

    w.start_element("cac:PostalAddress")?;
    if let Some(street) = &issuer.street {
        w.text_element("cbc:StreetName", street)?;
    }
    w.text_element("cbc:CityName", &issuer.city)?;
    w.text_element("cbc:CountrySubentity", &issuer.subdivision)?;
    w.text_element("cbc:District", &issuer.district)?;
    w.start_element("cac:Country")?;
    w.text_element("cbc:IdentificationCode", "PE")?;
    w.end_element("cac:Country")?;
    w.end_element("cac:PostalAddress")?;

    w.start_element("cac:PartyLegalEntity")?;
    w.text_element("cbc:RegistrationName", &issuer.registration_name)?;
    w.end_element("cac:PartyLegalEntity")?;

    w.end_element("cac:Party")?;
    w.end_element("cac:AccountingSupplierParty")?;
    Ok(())
}

fn write_customer_party(w: &mut XmlWriter, customer: &Counterparty) -> Result<(), ComprobanteError> {
    w.start_element("cac:AccountingCustomerParty")?;
    w.start_element("cac:Party")?;

    w.start_element("cac:PartyIdentification")?;
    w.text_element_with_attrs(
        "cbc:ID",
        &customer.identity_number,
        &[("schemeID", customer.identity.code())],
    )?;
    w.end_element("cac:PartyIdentification")?;

    w.start_element("cac:PartyLegalEntity")?;
    w.text_element("cbc:RegistrationName", &customer.name)?;
    if let Some(address) = &customer.address {
        w.start_element("cac:RegistrationAddress")?;
        w.start_element("cac:AddressLine")?;
        w.text_element("cbc:Line", address)?;
        w.end_element("cac:AddressLine")?;
        w.end_element("cac:RegistrationAddress")?;
    }
    w.end_element("cac:PartyLegalEntity")?;

    w.end_element("cac:Party")?;
    w.end_element("cac:AccountingCustomerParty")?;
    Ok(())
}

fn write_tax_category(w: &mut XmlWriter, tax_rate: Decimal) -> Result<(), ComprobanteError> {
    w.start_element("cac:TaxCategory")?;
    w.text_element("cbc:ID", catalog::TAX_CATEGORY)?;
    w.text_element("cbc:Percent", &format_percent(tax_rate))?;
    w.text_element("cbc:TaxExemptionReasonCode", catalog::EXEMPTION_REASON)?;
    w.start_element("cac:TaxScheme")?;
    w.text_element("cbc:ID", catalog::TAX_SCHEME_ID)?;
    w.text_element("cbc:Name", catalog::TAX_SCHEME_NAME)?;
    w.text_element("cbc:TaxTypeCode", catalog::TAX_TYPE_CODE)?;
    w.end_element("cac:TaxScheme")?;
    w.end_element("cac:TaxCategory")?;
    Ok(())
}

fn write_tax_total(w: &mut XmlWriter, totals: &DocumentTotals) -> Result<(), ComprobanteError> {
    w.start_element("cac:TaxTotal")?;
    w.amount_element("cbc:TaxAmount", totals.tax, CURRENCY)?;
    // Single subtotal: everything is standard-rated IGV.
    w.start_element("cac:TaxSubtotal")?;
    w.amount_element("cbc:TaxableAmount", totals.taxable, CURRENCY)?;
    w.amount_element("cbc:TaxAmount", totals.tax, CURRENCY)?;
    w.start_element("cac:TaxCategory")?;
    w.text_element("cbc:ID", catalog::TAX_CATEGORY)?;
    w.start_element("cac:TaxScheme")?;
    w.text_element("cbc:ID", catalog::TAX_SCHEME_ID)?;
    w.text_element("cbc:Name", catalog::TAX_SCHEME_NAME)?;
    w.text_element("cbc:TaxTypeCode", catalog::TAX_TYPE_CODE)?;
    w.end_element("cac:TaxScheme")?;
    w.end_element("cac:TaxCategory")?;
    w.end_element("cac:TaxSubtotal")?;
    w.end_element("cac:TaxTotal")?;
    Ok(())
}

fn write_monetary_total(w: &mut XmlWriter, totals: &DocumentTotals) -> Result<(), ComprobanteError> {
    // All three amounts are required by the receiving validator even
    // though two are derivable.
    w.start_element("cac:LegalMonetaryTotal")?;
    w.amount_element("cbc:LineExtensionAmount", totals.taxable, CURRENCY)?;
    w.amount_element("cbc:TaxInclusiveAmount", totals.gross, CURRENCY)?;
    w.amount_element("cbc:PayableAmount", totals.gross, CURRENCY)?;
    w.end_element("cac:LegalMonetaryTotal")?;
    Ok(())
}

fn write_invoice_line(
    w: &mut XmlWriter,
    id: usize,
    line: &InvoiceLine,
    amounts: &LineAmounts,
    tax_rate: Decimal,
) -> Result<(), ComprobanteError> {
    let taxable_unit = line.unit_price / (Decimal::ONE + tax_rate);

    w.start_element("cac:InvoiceLine")?;
    w.text_element("cbc:ID", &id.to_string())?;
    w.quantity_element("cbc:InvoicedQuantity", line.quantity, UNIT_CODE)?;
    w.amount_element("cbc:LineExtensionAmount", amounts.taxable, CURRENCY)?;

    // Tax-inclusive unit price goes in the pricing reference, not cac:Price.
    w.start_element("cac:PricingReference")?;
    w.start_element("cac:AlternativeConditionPrice")?;
    w.amount_element("cbc:PriceAmount", line.unit_price, CURRENCY)?;
    w.text_element("cbc:PriceTypeCode", catalog::PRICE_TYPE)?;
    w.end_element("cac:AlternativeConditionPrice")?;
    w.end_element("cac:PricingReference")?;

    w.start_element("cac:TaxTotal")?;
    w.amount_element("cbc:TaxAmount", amounts.tax, CURRENCY)?;
    w.start_element("cac:TaxSubtotal")?;
    w.amount_element("cbc:TaxableAmount", amounts.taxable, CURRENCY)?;
    w.amount_element("cbc:TaxAmount", amounts.tax, CURRENCY)?;
    write_tax_category(w, tax_rate)?;
    w.end_element("cac:TaxSubtotal")?;
    w.end_element("cac:TaxTotal")?;

    w.start_element("cac:Item")?;
    w.text_element("cbc:Description", &line.description)?;
    w.start_element("cac:SellersItemIdentification")?;
    w.text_element("cbc:ID", &line.service_code)?;
    w.end_element("cac:SellersItemIdentification")?;
    w.end_element("cac:Item")?;

    w.start_element("cac:Price")?;
    w.amount_element("cbc:PriceAmount", taxable_unit, CURRENCY)?;
    w.end_element("cac:Price")?;

    w.end_element("cac:InvoiceLine")?;
    Ok(())
}
