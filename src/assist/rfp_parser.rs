//! Free-text purchasing request → structured RFP.

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use crate::assist::{complete_json, non_blank};
use crate::error::AssistError;
use crate::llm::LlmProvider;
use crate::model::{Budget, DEFAULT_CURRENCY, Requirement, Rfp, Timeline};

const TASK: &str = "parse_rfp";
const MAX_TOKENS: u32 = 2048;

const SYSTEM_PROMPT: &str = "\
You are an expert procurement assistant. Turn a buyer's free-text purchasing \
request into a structured Request For Proposal.

Return ONLY a JSON object with this structure, no additional text:
{
  \"title\": \"Brief title for the RFP\",
  \"description\": \"Detailed description\",
  \"budget\": {\"amount\": number, \"currency\": \"USD\"},
  \"requirements\": [
    {\"item\": \"item name\", \"quantity\": number, \"specifications\": \"specifications\"}
  ],
  \"deliveryTimeline\": {\"value\": number, \"unit\": \"days|weeks|months\"},
  \"paymentTerms\": \"payment terms like Net 30\",
  \"warranty\": \"warranty requirements\",
  \"additionalTerms\": \"any additional terms\"
}

Use null for anything the request does not mention.";

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedBudget {
    #[serde(default, deserialize_with = "crate::model::lenient_opt_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedTimeline {
    #[serde(default, deserialize_with = "crate::model::lenient_opt_u32")]
    pub value: Option<u32>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// The model's reading of a purchasing request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedRfp {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub budget: Option<ParsedBudget>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub delivery_timeline: Option<ParsedTimeline>,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub warranty: Option<String>,
    #[serde(default)]
    pub additional_terms: Option<String>,
}

impl ParsedRfp {
    /// Build a draft RFP. A title and a budget amount are required.
    pub fn into_rfp(self, raw_input: &str) -> Result<Rfp, AssistError> {
        let title = non_blank(self.title).ok_or_else(|| AssistError::Incomplete {
            task: TASK,
            reason: "model returned no title".to_string(),
        })?;
        let budget = self.budget.unwrap_or(ParsedBudget {
            amount: None,
            currency: None,
        });
        let amount = budget.amount.ok_or_else(|| AssistError::Incomplete {
            task: TASK,
            reason: "no budget amount; state a budget in the request".to_string(),
        })?;
        let currency = non_blank(budget.currency)
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let description = non_blank(self.description).unwrap_or_else(|| raw_input.trim().to_string());
        let mut rfp = Rfp::new(title, description, Budget { amount, currency });

        rfp.requirements = self
            .requirements
            .into_iter()
            .filter(|r| !r.item.trim().is_empty())
            .collect();
        rfp.delivery_timeline = self.delivery_timeline.and_then(|t| {
            Some(Timeline {
                value: t.value?,
                unit: t.unit.and_then(|u| u.parse().ok()).unwrap_or_default(),
            })
        });
        if let Some(terms) = non_blank(self.payment_terms) {
            rfp.payment_terms = terms;
        }
        rfp.warranty = non_blank(self.warranty);
        rfp.additional_terms = non_blank(self.additional_terms);
        rfp.raw_input = Some(raw_input.to_string());
        Ok(rfp)
    }
}

/// Ask the model to structure a free-text request and build a draft RFP.
pub async fn parse_rfp(llm: &dyn LlmProvider, natural_language: &str) -> Result<Rfp, AssistError> {
    let user_prompt = format!("Purchasing request:\n\"\"\"\n{}\n\"\"\"", natural_language.trim());
    let parsed: ParsedRfp = complete_json(llm, TASK, SYSTEM_PROMPT, user_prompt, MAX_TOKENS).await?;
    let rfp = parsed.into_rfp(natural_language)?;
    info!(rfp_id = %rfp.id, title = %rfp.title, requirements = rfp.requirements.len(), "RFP structured");
    Ok(rfp)
}
