//! Turns the advisor conversation into a concrete plan proposal.
//!
//! The completion service is asked for strict JSON but is not trusted to
//! comply: the reply is scanned for the first balanced `{...}` object, parsed,
//! and validated before anything monetary is built from it.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::errors::{Result, SaveFiError};
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest};
use crate::units;

const EXTRACTION_TEMPERATURE: f32 = 0.5;
const EXTRACTION_MAX_TOKENS: u32 = 1000;
pub const MIN_TOTAL_DEPOSIT_DAYS: u64 = 1;

/// A plan the user may confirm; consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedPlanProposal {
    pub amount_per_deposit: Decimal,
    pub total_deposit_days: u64,
}

pub struct PlanExtractor {
    llm: Arc<dyn CompletionClient>,
    prompt: String,
    token_decimals: u32,
}

impl PlanExtractor {
    pub fn new(llm: Arc<dyn CompletionClient>, prompt: impl Into<String>, token_decimals: u32) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
            token_decimals,
        }
    }

    pub async fn extract(&self, transcript: &[ChatMessage]) -> Result<ExtractedPlanProposal> {
        if transcript.is_empty() {
            return Err(SaveFiError::Validation(
                "conversation is empty; nothing to extract".to_string(),
            ));
        }

        let text = self
            .llm
            .complete(CompletionRequest {
                system_prompt: self.prompt.clone(),
                messages: transcript.to_vec(),
                temperature: EXTRACTION_TEMPERATURE,
                max_tokens: EXTRACTION_MAX_TOKENS,
            })
            .await?;
        debug!(len = text.len(), "extract: completion received");

        let proposal = parse_proposal(&text, self.token_decimals)?;
        info!(
            "Extracted plan: {} per deposit for {} days",
            proposal.amount_per_deposit, proposal.total_deposit_days
        );
        Ok(proposal)
    }
}

/// Parse and validate a proposal out of free-form completion text.
pub fn parse_proposal(text: &str, token_decimals: u32) -> Result<ExtractedPlanProposal> {
    let extraction_error = |reason: &str| SaveFiError::Extraction {
        reason: reason.to_string(),
        raw: text.to_string(),
    };

    let span = first_json_object(text).ok_or_else(|| extraction_error("no JSON object in response"))?;
    let value: Value = serde_json::from_str(span).map_err(|e| extraction_error(&format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| extraction_error("response JSON is not an object"))?;

    let amount = number_field(object, "amountPerDeposit").ok_or_else(|| {
        extraction_error("amountPerDeposit is missing or not a number")
    })?;
    let amount = Decimal::from_str(&amount.to_string())
        .or_else(|_| Decimal::from_scientific(&amount.to_string()))
        .map_err(|_| extraction_error("amountPerDeposit is not a representable decimal"))?;

    let days = number_field(object, "totalDepositDays")
        .ok_or_else(|| extraction_error("totalDepositDays is missing or not a number"))?;
    let days = match (days.as_u64(), days.as_i64()) {
        (Some(d), _) => d,
        (None, Some(_)) => {
            return Err(SaveFiError::Validation(format!(
                "totalDepositDays must be at least {MIN_TOTAL_DEPOSIT_DAYS}, got {days}"
            )))
        }
        (None, None) => return Err(extraction_error("totalDepositDays is not a whole number")),
    };

    validate(amount, days, token_decimals)?;
    Ok(ExtractedPlanProposal {
        amount_per_deposit: amount.normalize(),
        total_deposit_days: days,
    })
}

/// Bounds checks applied before a proposal may drive a transaction.
pub fn validate(amount: Decimal, days: u64, token_decimals: u32) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(SaveFiError::Validation(format!(
            "amountPerDeposit must be greater than 0, got {amount}"
        )));
    }
    units::to_base_units(amount, token_decimals)?;
    if days < MIN_TOTAL_DEPOSIT_DAYS {
        return Err(SaveFiError::Validation(format!(
            "totalDepositDays must be at least {MIN_TOTAL_DEPOSIT_DAYS}, got {days}"
        )));
    }
    Ok(())
}

fn number_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a serde_json::Number> {
    match object.get(key) {
        Some(Value::Number(n)) => Some(n),
        _ => None,
    }
}

/// The first balanced `{...}` span, ignoring braces inside JSON strings.
/// An opening brace that never closes is skipped and the scan resumes at the
/// next one.
fn first_json_object(text: &str) -> Option<&str> {
    text.match_indices('{')
        .find_map(|(start, _)| balanced_end(&text[start..]).map(|end| &text[start..=start + end]))
}

/// Byte offset of the brace closing the object that opens at `text[0]`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockCompletionClient;

    #[test]
    fn parses_trailing_json_block() {
        let text = "Great news! I recommend saving $438 per month for 24 months (approx. 2 years).\n\
                    {\"amountPerDeposit\":438,\"totalDepositDays\":720}";
        let proposal = parse_proposal(text, 6).unwrap();
        assert_eq!(
            proposal,
            ExtractedPlanProposal {
                amount_per_deposit: Decimal::new(438, 0),
                total_deposit_days: 720,
            }
        );
    }

    #[test]
    fn takes_first_balanced_object_only() {
        let text = r#"```json
{"amountPerDeposit": 12.5, "totalDepositDays": 360, "note": "a } inside"}
```
Also: {"amountPerDeposit": 999, "totalDepositDays": 30}"#;
        let proposal = parse_proposal(text, 6).unwrap();
        assert_eq!(proposal.amount_per_deposit, Decimal::new(125, 1));
        assert_eq!(proposal.total_deposit_days, 360);
    }

    #[test]
    fn unclosed_brace_in_prose_does_not_hide_later_object() {
        let text = "Template: { amount per month\n{\"amountPerDeposit\":438,\"totalDepositDays\":720}";
        let proposal = parse_proposal(text, 6).unwrap();
        assert_eq!(proposal.amount_per_deposit, Decimal::new(438, 0));
        assert_eq!(proposal.total_deposit_days, 720);
    }

    #[test]
    fn no_object_is_extraction_error_with_raw_text() {
        let text = "Sorry, the monthly amount is missing from the conversation.";
        let err = parse_proposal(text, 6).unwrap_err();
        assert_eq!(err.kind(), "extraction_error");
        assert_eq!(err.raw_text(), Some(text));

        let unbalanced = parse_proposal("{\"amountPerDeposit\": 5", 6).unwrap_err();
        assert_eq!(unbalanced.kind(), "extraction_error");
    }

    #[test]
    fn missing_or_mistyped_fields_are_not_coerced() {
        for text in [
            r#"{"amountPerDeposit": 438}"#,
            r#"{"amountPerDeposit": "438", "totalDepositDays": 720}"#,
            r#"{"amountPerDeposit": 438, "totalDepositDays": 720.5}"#,
            r#"{"amountPerDeposit": 438, "totalDepositDays": null}"#,
        ] {
            let err = parse_proposal(text, 6).unwrap_err();
            assert_eq!(err.kind(), "extraction_error", "input: {text}");
        }
    }

    #[test]
    fn out_of_bounds_values_are_validation_errors() {
        for text in [
            r#"{"amountPerDeposit": 0, "totalDepositDays": 720}"#,
            r#"{"amountPerDeposit": -5, "totalDepositDays": 720}"#,
            r#"{"amountPerDeposit": 5, "totalDepositDays": 0}"#,
            r#"{"amountPerDeposit": 5, "totalDepositDays": -30}"#,
            r#"{"amountPerDeposit": 1.0000001, "totalDepositDays": 30}"#,
        ] {
            let err = parse_proposal(text, 6).unwrap_err();
            assert_eq!(err.kind(), "validation_error", "input: {text}");
        }
    }

    #[tokio::test]
    async fn extract_sends_transcript_with_extraction_prompt() {
        let llm = Arc::new(MockCompletionClient::new(vec![
            r#"{"amountPerDeposit": 200, "totalDepositDays": 540}"#,
        ]));
        let extractor = PlanExtractor::new(llm.clone(), "EXTRACT", 6);
        let transcript = vec![
            ChatMessage::user("I earn $3000 and spend $2000"),
            ChatMessage::assistant("I recommend saving $200 per month for 18 months."),
        ];

        let proposal = extractor.extract(&transcript).await.unwrap();
        assert_eq!(proposal.total_deposit_days, 540);

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system_prompt, "EXTRACT");
        assert_eq!(requests[0].messages, transcript);
        assert_eq!(requests[0].temperature, 0.5);
    }

    #[tokio::test]
    async fn empty_transcript_never_reaches_the_service() {
        let llm = Arc::new(MockCompletionClient::new(vec![]));
        let extractor = PlanExtractor::new(llm.clone(), "EXTRACT", 6);
        assert!(extractor.extract(&[]).await.is_err());
        assert_eq!(llm.call_count(), 0);
    }
}
