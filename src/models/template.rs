use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::field::{FieldKey, InvoiceField};
use crate::core::{InvoiceError, InvoiceResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub label: String,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    fn new(label: &str, required: bool) -> Self {
        FieldSpec {
            label: label.to_string(),
            required,
        }
    }
}

/// Field key -> `{label, required}`, persisted as a JSON object. Deserializing
/// goes through [`ExtractionSchema::new`], so a schema read from a request
/// or the database always has valid keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, FieldSpec>",
    into = "BTreeMap<String, FieldSpec>"
)]
pub struct ExtractionSchema(BTreeMap<String, FieldSpec>);

impl TryFrom<BTreeMap<String, FieldSpec>> for ExtractionSchema {
    type Error = InvoiceError;

    fn try_from(fields: BTreeMap<String, FieldSpec>) -> Result<Self, Self::Error> {
        ExtractionSchema::new(fields)
    }
}

impl From<ExtractionSchema> for BTreeMap<String, FieldSpec> {
    fn from(schema: ExtractionSchema) -> Self {
        schema.0
    }
}

impl Default for ExtractionSchema {
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("invoice_number".into(), FieldSpec::new("Numéro de facture", true));
        fields.insert("date".into(), FieldSpec::new("Date de facture", true));
        fields.insert("due_date".into(), FieldSpec::new("Date d'échéance", false));
        fields.insert("supplier".into(), FieldSpec::new("Fournisseur", true));
        fields.insert("total_amount".into(), FieldSpec::new("Montant total", true));
        fields.insert("tax_amount".into(), FieldSpec::new("Montant TVA", false));
        fields.insert("reference".into(), FieldSpec::new("Référence", false));
        fields.insert("description".into(), FieldSpec::new("Description", false));
        ExtractionSchema(fields)
    }
}

impl ExtractionSchema {
    pub fn new(fields: BTreeMap<String, FieldSpec>) -> InvoiceResult<Self> {
        if fields.is_empty() {
            return Err(InvoiceError::InvalidField {
                field: "schema".to_string(),
                reason: "must define at least one field".to_string(),
            });
        }
        if let Some(key) = fields.keys().find(|k| !is_valid_key(k)) {
            return Err(InvoiceError::InvalidField {
                field: "schema".to_string(),
                reason: format!("`{}` is not a valid field key", key),
            });
        }
        Ok(ExtractionSchema(fields))
    }

    pub fn required_keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.0
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(k, _)| FieldKey::from(k.as_str()))
    }

    /// Required keys left without a non-empty value. A key present in
    /// `confirmed` is judged on the confirmed value alone; otherwise the
    /// stored `fields` are consulted.
    pub fn missing_required(
        &self,
        fields: &[InvoiceField],
        confirmed: &BTreeMap<FieldKey, String>,
    ) -> Vec<String> {
        self.required_keys()
            .filter(|key| match confirmed.get(key) {
                Some(value) => value.trim().is_empty(),
                None => !fields.iter().any(|f| &f.field_name == key && f.has_value()),
            })
            .map(String::from)
            .collect()
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTemplate {
    pub id: Uuid,
    pub name: String,
    pub user_id: Option<Uuid>,
    pub is_public: bool,
    pub schema: ExtractionSchema,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionTemplate {
    pub fn visible_to(&self, user_id: Uuid) -> bool {
        self.is_public || self.user_id.is_none() || self.user_id == Some(user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub schema: ExtractionSchema,
    #[serde(default)]
    pub is_public: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(key: FieldKey, value: Option<&str>) -> InvoiceField {
        let now = Utc::now();
        InvoiceField {
            id: Uuid::new_v4(),
            invoice_id: Uuid::nil(),
            field_name: key,
            field_value: value.map(str::to_string),
            confidence: None,
            position: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn default_schema_requires_four_fields() {
        let schema = ExtractionSchema::default();
        let mut required: Vec<String> = schema.required_keys().map(String::from).collect();
        required.sort();
        assert_eq!(required, vec!["date", "invoice_number", "supplier", "total_amount"]);
        assert_eq!(BTreeMap::from(schema).len(), 8);
    }

    #[test]
    fn blank_values_count_as_missing() {
        let schema = ExtractionSchema::default();
        let fields = vec![
            field(FieldKey::InvoiceNumber, Some("F-1")),
            field(FieldKey::Date, Some("2024-01-01")),
            field(FieldKey::Supplier, Some("   ")),
        ];
        assert_eq!(
            schema.missing_required(&fields, &BTreeMap::new()),
            vec!["supplier", "total_amount"]
        );
    }

    #[test]
    fn confirmed_values_override_stored_fields() {
        let schema = ExtractionSchema::default();
        let fields = vec![
            field(FieldKey::InvoiceNumber, Some("F-1")),
            field(FieldKey::Date, Some("2024-01-01")),
            field(FieldKey::Supplier, Some("EDF")),
            field(FieldKey::TotalAmount, Some("10,00")),
        ];
        let mut confirmed = BTreeMap::new();
        confirmed.insert(FieldKey::Supplier, " ".to_string());
        confirmed.insert(FieldKey::Custom("iban".into()), "FR76".to_string());
        assert_eq!(schema.missing_required(&fields, &confirmed), vec!["supplier"]);

        confirmed.insert(FieldKey::Supplier, "Engie".to_string());
        assert!(schema.missing_required(&fields, &confirmed).is_empty());
    }

    #[test]
    fn schema_json_shape() {
        let schema: ExtractionSchema = serde_json::from_value(serde_json::json!({
            "iban": { "label": "IBAN", "required": true }
        }))
        .unwrap();
        assert_eq!(schema.required_keys().collect::<Vec<_>>(), vec![FieldKey::from("iban")]);
        assert_eq!(
            serde_json::to_value(&schema).unwrap(),
            serde_json::json!({ "iban": { "label": "IBAN", "required": true } })
        );
    }

    #[test]
    fn deserializing_enforces_key_rules() {
        let bad = serde_json::json!({ "Bad Key!": { "label": "x" } });
        assert!(serde_json::from_value::<ExtractionSchema>(bad).is_err());
        assert!(serde_json::from_value::<ExtractionSchema>(serde_json::json!({})).is_err());
    }

    #[test]
    fn schema_rejects_bad_keys() {
        let mut fields = BTreeMap::new();
        fields.insert("Bad Key".to_string(), FieldSpec::new("x", false));
        assert!(ExtractionSchema::new(fields).is_err());
        assert!(ExtractionSchema::new(BTreeMap::new()).is_err());
    }
}
