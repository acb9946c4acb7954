//! Vendor reply email → structured proposal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assist::{complete_json, non_blank};
use crate::error::AssistError;
use crate::llm::LlmProvider;
use crate::model::{
    Budget, DEFAULT_CURRENCY, LineItem, OfferedTimeline, Pricing, Proposal, Requirement, Rfp,
    clamp_score,
};

const TASK: &str = "parse_vendor_response";
const MAX_TOKENS: u32 = 2048;

const SYSTEM_PROMPT: &str = "\
You are an expert procurement assistant. Parse a vendor's reply to an RFP \
into a structured proposal. The RFP details are given for reference.

Return ONLY a JSON object with this structure, no additional text:
{
  \"pricing\": {
    \"totalAmount\": number,
    \"currency\": \"USD\",
    \"breakdown\": [
      {\"item\": \"item name\", \"unitPrice\": number, \"quantity\": number, \"totalPrice\": number}
    ]
  },
  \"deliveryTimeline\": {\"value\": number, \"unit\": \"days|weeks|months\", \"description\": \"details\"},
  \"paymentTerms\": \"payment terms offered\",
  \"warranty\": \"warranty offered\",
  \"additionalTerms\": \"any additional terms or conditions\",
  \"complianceScore\": number,
  \"summary\": \"Brief summary of the proposal\"
}

complianceScore is 0-100 and says how well the proposal meets the RFP \
requirements. Use null for anything the email does not state.";

/// The RFP fields the parser sees alongside the email.
#[derive(Debug, Clone, Serialize)]
pub struct RfpContext {
    pub title: String,
    pub description: String,
    pub requirements: Vec<Requirement>,
    pub budget: Budget,
}

impl From<&Rfp> for RfpContext {
    fn from(rfp: &Rfp) -> Self {
        Self {
            title: rfp.title.clone(),
            description: rfp.description.clone(),
            requirements: rfp.requirements.clone(),
            budget: rfp.budget.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPricing {
    #[serde(default, deserialize_with = "crate::model::lenient_opt_decimal")]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub breakdown: Vec<LineItem>,
}

/// The model's reading of a vendor reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedProposal {
    #[serde(default)]
    pub pricing: Option<ParsedPricing>,
    #[serde(default)]
    pub delivery_timeline: Option<OfferedTimeline>,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub warranty: Option<String>,
    #[serde(default)]
    pub additional_terms: Option<String>,
    #[serde(default, deserialize_with = "crate::model::lenient_opt_f64")]
    pub compliance_score: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ParsedProposal {
    /// Build a proposal for `(rfp_id, vendor_id)`. Fails with
    /// [`AssistError::Incomplete`] when no total price was found.
    pub fn into_proposal(self, rfp_id: Uuid, vendor_id: Uuid) -> Result<Proposal, AssistError> {
        let pricing = self.pricing.ok_or_else(|| AssistError::Incomplete {
            task: TASK,
            reason: "reply contains no pricing".to_string(),
        })?;
        let total_amount = pricing.total_amount.ok_or_else(|| AssistError::Incomplete {
            task: TASK,
            reason: "reply contains no total amount".to_string(),
        })?;

        let mut proposal = Proposal::new(
            rfp_id,
            vendor_id,
            Pricing {
                total_amount,
                currency: non_blank(pricing.currency)
                    .map(|c| c.to_uppercase())
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                breakdown: pricing.breakdown,
            },
        );
        proposal.delivery_timeline = self
            .delivery_timeline
            .filter(|t| t.value.is_some() || t.unit.is_some() || t.description.is_some());
        proposal.payment_terms = non_blank(self.payment_terms);
        proposal.warranty = non_blank(self.warranty);
        proposal.additional_terms = non_blank(self.additional_terms);
        proposal.compliance_score = self.compliance_score.map(clamp_score);
        proposal.ai_summary = non_blank(self.summary);
        Ok(proposal)
    }
}

/// Ask the model to extract the offer from a vendor's email body.
pub async fn parse_vendor_response(
    llm: &dyn LlmProvider,
    email_body: &str,
    rfp: &RfpContext,
) -> Result<ParsedProposal, AssistError> {
    let rfp_json = serde_json::to_string_pretty(rfp).map_err(|e| AssistError::Incomplete {
        task: TASK,
        reason: format!("cannot encode RFP context: {e}"),
    })?;
    let user_prompt = format!(
        "RFP details:\n{rfp_json}\n\nVendor response email:\n\"\"\"\n{}\n\"\"\"",
        email_body.trim()
    );
    complete_json(llm, TASK, SYSTEM_PROMPT, user_prompt, MAX_TOKENS).await
}
