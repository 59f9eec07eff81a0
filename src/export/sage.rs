use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{find_value, FieldKey, Invoice, InvoiceField};

/// Purchase invoice record in the shape the Sage import expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SagePayload {
    pub num_facture: String,
    pub date_facture: String,
    pub date_echeance: String,
    pub fournisseur: String,
    #[serde(rename = "MontantHT", with = "rust_decimal::serde::float")]
    pub montant_ht: Decimal,
    #[serde(rename = "MontantTVA", with = "rust_decimal::serde::float")]
    pub montant_tva: Decimal,
    #[serde(rename = "MontantTTC", with = "rust_decimal::serde::float")]
    pub montant_ttc: Decimal,
    pub reference: String,
    pub description: String,
    pub type_document: String,
    pub code_journal: String,
    pub devise_code: String,
}

pub const DOCUMENT_TYPE: &str = "FACTURE";
pub const PURCHASE_JOURNAL: &str = "ACH";

pub fn build_payload(invoice: &Invoice, fields: &[InvoiceField], currency: &str) -> SagePayload {
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    let field = |key: FieldKey| find_value(fields, &key).unwrap_or_default().to_string();

    let montant_ht = match (invoice.total_amount, invoice.tax_amount) {
        (Some(total), Some(tax)) => total - tax,
        _ => Decimal::ZERO,
    };

    SagePayload {
        num_facture: text(&invoice.invoice_number),
        date_facture: text(&invoice.invoice_date),
        date_echeance: text(&invoice.due_date),
        fournisseur: text(&invoice.supplier),
        montant_ht,
        montant_tva: invoice.tax_amount.unwrap_or(Decimal::ZERO),
        montant_ttc: invoice.total_amount.unwrap_or(Decimal::ZERO),
        reference: field(FieldKey::Reference),
        description: field(FieldKey::Description),
        type_document: DOCUMENT_TYPE.to_string(),
        code_journal: PURCHASE_JOURNAL.to_string(),
        devise_code: currency.to_string(),
    }
}
