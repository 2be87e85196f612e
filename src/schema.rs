//! The document model that recognised text is mapped into.
//!
//! Every field except [`Document::document_type`] is optional. Absence means
//! "not found in the source text" and is a valid state, not an error, so the
//! canonical JSON form **omits** absent fields instead of writing `null`. A
//! consumer testing `"payment" in doc` gets the same answer before and after
//! a round-trip.
//!
//! The five numeric fields that carry a default (`tax_rate`, `tax_amount`,
//! `discount`, `shipping`, `amount_paid`) are plain `f64`: a missing or
//! `null` value in model output becomes `0.0`, and they are always written.
//!
//! Numeric bounds are checked by [`Document::validate`] and never clamped.

use crate::error::ExtractionError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Literal discriminator of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Receipt,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Receipt => "receipt",
        }
    }
}

/// Supplier or customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Contact phone number, including the country code when printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
}

/// A single line item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Must be strictly positive when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    /// Line total, typically `quantity * unit_price`. Not recomputed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
    /// Decimal rate in `[0, 1]` (0.10 = 10 %).
    #[serde(default, deserialize_with = "null_as_zero")]
    pub tax_rate: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub tax_amount: f64,
}

/// Aggregated financial totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_total: Option<f64>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub discount: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub shipping: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grand_total: Option<f64>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub amount_paid: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_due: Option<f64>,
}

/// Payment details, if a payment was recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<String>,
}

/// Root of the extraction target: one invoice or receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_type: DocumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// Three-letter currency code as printed (e.g. USD, EUR).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<Party>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<Party>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<Totals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Document {
    /// An otherwise empty document of the given type.
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            document_type,
            document_number: None,
            issue_date: None,
            due_date: None,
            currency: None,
            supplier: None,
            customer: None,
            items: None,
            totals: None,
            payment: None,
            notes: None,
        }
    }

    /// Parse and validate a JSON payload.
    ///
    /// Shape errors (not JSON, missing or unknown `document_type`, a string
    /// where a number belongs) become [`ExtractionError::InvalidPayload`];
    /// bound violations become [`ExtractionError::SchemaViolation`].
    pub fn from_json(payload: &str) -> Result<Self, ExtractionError> {
        let doc: Document =
            serde_json::from_str(payload).map_err(|e| ExtractionError::InvalidPayload {
                detail: e.to_string(),
            })?;
        doc.validate()?;
        Ok(doc)
    }

    /// Same as [`Document::from_json`] for an already parsed value.
    pub fn from_value(value: Value) -> Result<Self, ExtractionError> {
        let doc: Document =
            serde_json::from_value(value).map_err(|e| ExtractionError::InvalidPayload {
                detail: e.to_string(),
            })?;
        doc.validate()?;
        Ok(doc)
    }

    /// Canonical pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check every numeric bound, collecting all violations.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        let mut v = Violations::default();

        if let Some(items) = &self.items {
            for (i, item) in items.iter().enumerate() {
                let p = |field: &str| format!("items[{i}].{field}");
                v.positive(&p("quantity"), item.quantity);
                v.non_negative(&p("unit_price"), item.unit_price);
                v.non_negative(&p("total_price"), item.total_price);
                v.non_negative(&p("tax_rate"), Some(item.tax_rate));
                v.at_most_one(&p("tax_rate"), item.tax_rate);
                v.non_negative(&p("tax_amount"), Some(item.tax_amount));
            }
        }

        if let Some(t) = &self.totals {
            v.non_negative("totals.subtotal", t.subtotal);
            v.non_negative("totals.tax_total", t.tax_total);
            v.non_negative("totals.discount", Some(t.discount));
            v.non_negative("totals.shipping", Some(t.shipping));
            v.non_negative("totals.grand_total", t.grand_total);
            v.non_negative("totals.amount_paid", Some(t.amount_paid));
            v.non_negative("totals.balance_due", t.balance_due);
        }

        v.into_result()
    }
}

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn finite(&mut self, path: &str, value: f64) -> bool {
        if value.is_finite() {
            true
        } else {
            self.0.push(format!("{path} must be a finite number (got {value})"));
            false
        }
    }

    fn positive(&mut self, path: &str, value: Option<f64>) {
        if let Some(x) = value {
            if self.finite(path, x) && x <= 0.0 {
                self.0.push(format!("{path} must be > 0 (got {x})"));
            }
        }
    }

    fn non_negative(&mut self, path: &str, value: Option<f64>) {
        if let Some(x) = value {
            if self.finite(path, x) && x < 0.0 {
                self.0.push(format!("{path} must be >= 0 (got {x})"));
            }
        }
    }

    fn at_most_one(&mut self, path: &str, x: f64) {
        if x.is_finite() && x > 1.0 {
            self.0.push(format!("{path} must be <= 1 (got {x})"));
        }
    }

    fn into_result(self) -> Result<(), ExtractionError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ExtractionError::SchemaViolation { violations: self.0 })
        }
    }
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

// ── Response schema ──────────────────────────────────────────────────────

fn string(description: &str) -> Value {
    json!({ "type": "STRING", "nullable": true, "description": description })
}

fn number(description: &str, minimum: f64) -> Value {
    json!({ "type": "NUMBER", "nullable": true, "minimum": minimum, "description": description })
}

fn party(description: &str) -> Value {
    json!({
        "type": "OBJECT",
        "nullable": true,
        "description": description,
        "properties": {
            "name": string("Full name of the party"),
            "address": string("Postal address of the party"),
            "email": string("Contact email address"),
            "phone": string("Contact phone number; include country code if needed"),
            "tax_id": string("Tax identification number, if available"),
        }
    })
}

static DOCUMENT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "OBJECT",
        "description": "Master schema for any invoice or receipt document",
        "properties": {
            "document_type": {
                "type": "STRING",
                "enum": ["invoice", "receipt"],
                "description": "Type of document: 'invoice' or 'receipt'"
            },
            "document_number": string("Unique identifier of the document"),
            "issue_date": string("Date when the document was issued"),
            "due_date": string("Payment due date; applicable for invoices"),
            "currency": string("Three-letter currency code (e.g., USD, EUR)"),
            "supplier": party("Entity issuing the document"),
            "customer": party("Entity receiving the goods or services"),
            "items": {
                "type": "ARRAY",
                "nullable": true,
                "description": "List of items or services provided",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "description": string("Description of the product or service"),
                        "quantity": number("Quantity of the item; must be greater than 0", 0.0),
                        "unit_price": number("Price per unit; must be non-negative", 0.0),
                        "total_price": number("Total for this line; typically quantity * unit_price", 0.0),
                        "tax_rate": {
                            "type": "NUMBER",
                            "nullable": true,
                            "minimum": 0.0,
                            "maximum": 1.0,
                            "description": "Tax rate as a decimal (e.g., 0.10 for 10%); 0 if not shown"
                        },
                        "tax_amount": number("Calculated tax amount for this line; 0 if not shown", 0.0),
                    }
                }
            },
            "totals": {
                "type": "OBJECT",
                "nullable": true,
                "description": "Aggregated financial totals for the document",
                "properties": {
                    "subtotal": number("Sum of all line item totals before tax and discounts", 0.0),
                    "tax_total": number("Total tax amount for all items", 0.0),
                    "discount": number("Total discount applied; 0 if none", 0.0),
                    "shipping": number("Shipping or handling charges; 0 if none", 0.0),
                    "grand_total": number("Total due including taxes, shipping, and discounts", 0.0),
                    "amount_paid": number("Amount already paid toward this document; 0 if none", 0.0),
                    "balance_due": number("Remaining balance after payments", 0.0),
                }
            },
            "payment": {
                "type": "OBJECT",
                "nullable": true,
                "description": "Payment details, if payment has been recorded",
                "properties": {
                    "method": string("Payment method (e.g., Credit Card, Bank Transfer)"),
                    "transaction_id": string("Identifier for the payment transaction"),
                    "payment_date": string("Date when payment was made"),
                }
            },
            "notes": string("Additional remarks or notes about the transaction"),
        },
        "required": ["document_type"]
    })
});

/// Response schema describing [`Document`], in the OpenAPI subset accepted
/// by schema-constrained generation endpoints.
pub fn document_schema() -> &'static Value {
    &DOCUMENT_SCHEMA
}
