//! Prompts for schema-constrained extraction.
//!
//! Callers can override the system prompt via
//! [`crate::config::ParserConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

use crate::schema::document_schema;

/// Default system prompt.
///
/// Backends with native schema support (Gemini's `responseSchema`) send the
/// schema out of band; the others get it appended by [`system_prompt_with_schema`].
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You extract structured data from the OCR text of a single invoice or receipt.

Follow these rules precisely:

1. CLASSIFY
   - document_type is "invoice" when the document requests payment, "receipt" when it confirms payment
   - When unsure, choose "receipt" for point-of-sale slips and "invoice" otherwise

2. TRANSCRIBE, DO NOT INVENT
   - Copy identifiers, names and addresses exactly as they appear
   - Omit any field the text does not support; never guess
   - Dates keep the format printed on the document

3. NUMBERS
   - Amounts are plain numbers without currency symbols or thousands separators
   - currency is the ISO 4217 code when it can be inferred from symbols or text
   - tax_rate is a fraction between 0 and 1 (19% becomes 0.19)
   - tax_rate, tax_amount, discount, shipping and amount_paid are 0 when absent

4. LINE ITEMS
   - One entry per purchased line, in document order
   - quantity defaults to 1 when a line shows only a price

5. OUTPUT FORMAT
   - Output ONLY a single JSON object
   - Do NOT wrap it in ``` fences
   - Do NOT add commentary or explanations"#;

/// User-turn frame around the recognised text.
///
/// The placeholder `{text}` is replaced with the OCR output.
pub const EXTRACTION_INSTRUCTION: &str =
    "Convert the following text into the structured format described by the schema.\n\n{text}\n";

/// Build the user instruction for one document.
pub fn instruction(text: &str) -> String {
    EXTRACTION_INSTRUCTION.replace("{text}", text)
}

/// `base` followed by the JSON schema the reply must satisfy.
///
/// Used by backends that cannot attach a response schema to the request.
pub fn system_prompt_with_schema(base: &str) -> String {
    let schema = serde_json::to_string_pretty(document_schema())
        .unwrap_or_else(|_| document_schema().to_string());
    format!(
        "{base}\n\nThe reply must be a JSON object conforming to this schema \
         (OpenAPI subset; NUMBER fields are JSON numbers, nullable fields may be omitted):\n{schema}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_not_empty() {
        assert!(!DEFAULT_SYSTEM_PROMPT.is_empty());
    }

    #[test]
    fn prompt_states_tax_rate_is_a_fraction() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("between 0 and 1"));
    }

    #[test]
    fn prompt_forbids_fences() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Do NOT wrap"));
    }

    #[test]
    fn instruction_embeds_text_verbatim() {
        let text = "Receipt #123\nTotal: $10";
        let out = instruction(text);
        assert!(out.contains(text));
        assert!(out.starts_with("Convert the following text"));
        assert!(!out.contains("{text}"));
    }

    #[test]
    fn schema_prompt_names_every_top_level_field() {
        let p = system_prompt_with_schema(DEFAULT_SYSTEM_PROMPT);
        for field in ["document_type", "supplier", "customer", "items", "totals", "payment"] {
            assert!(p.contains(field), "missing {field}");
        }
    }
}
