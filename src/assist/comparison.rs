//! Side-by-side scoring of the proposals received for one RFP.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assist::complete_json;
use crate::error::AssistError;
use crate::llm::LlmProvider;
use crate::model::{OfferedTimeline, Proposal, Rfp, Timeline, Vendor, clamp_score};

const TASK: &str = "compare_proposals";
const MAX_TOKENS: u32 = 4096;

const SYSTEM_PROMPT: &str = "\
You are an expert procurement analyst. Compare vendor proposals for an RFP \
and recommend one.

Return ONLY a JSON object with this structure, no additional text:
{
  \"overallRecommendation\": \"Which vendor to choose and why (2-3 sentences)\",
  \"vendorScores\": [
    {
      \"vendorName\": \"vendor name exactly as given\",
      \"overallScore\": number,
      \"priceScore\": number,
      \"timelineScore\": number,
      \"complianceScore\": number,
      \"pros\": [\"...\"],
      \"cons\": [\"...\"]
    }
  ],
  \"keyFindings\": [\"...\"],
  \"riskFactors\": [\"...\"]
}

All scores are 0-100.";

/// Per-vendor verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorScore {
    pub vendor_name: String,
    #[serde(default, deserialize_with = "crate::model::lenient_opt_f64")]
    pub overall_score: Option<f64>,
    #[serde(default, deserialize_with = "crate::model::lenient_opt_f64")]
    pub price_score: Option<f64>,
    #[serde(default, deserialize_with = "crate::model::lenient_opt_f64")]
    pub timeline_score: Option<f64>,
    #[serde(default, deserialize_with = "crate::model::lenient_opt_f64")]
    pub compliance_score: Option<f64>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
}

/// The model's comparison of all proposals for an RFP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    #[serde(default)]
    pub overall_recommendation: String,
    #[serde(default)]
    pub vendor_scores: Vec<VendorScore>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

/// Score to write back onto one stored proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub proposal_id: Uuid,
    pub ai_score: u8,
    /// JSON with sub-scores, pros and cons.
    pub ai_recommendation: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationDetail<'a> {
    price_score: Option<u8>,
    timeline_score: Option<u8>,
    compliance_score: Option<u8>,
    pros: &'a [String],
    cons: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RfpSummary<'a> {
    title: &'a str,
    description: &'a str,
    budget: &'a crate::model::Budget,
    requirements: &'a [crate::model::Requirement],
    delivery_timeline: Option<&'a Timeline>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProposalSummary<'a> {
    vendor_name: &'a str,
    vendor_company: &'a str,
    total_amount: String,
    currency: &'a str,
    delivery_timeline: Option<&'a OfferedTimeline>,
    payment_terms: Option<&'a str>,
    warranty: Option<&'a str>,
    compliance_score: Option<u8>,
    summary: Option<&'a str>,
}

/// Ask the model to score every proposal against the RFP.
pub async fn compare_proposals(
    llm: &dyn LlmProvider,
    rfp: &Rfp,
    proposals: &[(Proposal, Vendor)],
) -> Result<Comparison, AssistError> {
    if proposals.is_empty() {
        return Err(AssistError::Incomplete {
            task: TASK,
            reason: "no proposals to compare".to_string(),
        });
    }

    let rfp_summary = RfpSummary {
        title: &rfp.title,
        description: &rfp.description,
        budget: &rfp.budget,
        requirements: &rfp.requirements,
        delivery_timeline: rfp.delivery_timeline.as_ref(),
    };
    let summaries: Vec<ProposalSummary<'_>> = proposals
        .iter()
        .map(|(p, v)| ProposalSummary {
            vendor_name: &v.name,
            vendor_company: &v.company,
            total_amount: p.pricing.total_amount.to_string(),
            currency: &p.pricing.currency,
            delivery_timeline: p.delivery_timeline.as_ref(),
            payment_terms: p.payment_terms.as_deref(),
            warranty: p.warranty.as_deref(),
            compliance_score: p.compliance_score,
            summary: p.ai_summary.as_deref(),
        })
        .collect();

    let encode = |e: serde_json::Error| AssistError::Incomplete {
        task: TASK,
        reason: format!("cannot encode comparison input: {e}"),
    };
    let user_prompt = format!(
        "RFP details:\n{}\n\nVendor proposals:\n{}",
        serde_json::to_string_pretty(&rfp_summary).map_err(encode)?,
        serde_json::to_string_pretty(&summaries).map_err(encode)?,
    );

    let comparison: Comparison =
        complete_json(llm, TASK, SYSTEM_PROMPT, user_prompt, MAX_TOKENS).await?;
    tracing::info!(
        rfp_id = %rfp.id,
        proposals = proposals.len(),
        scored = comparison.vendor_scores.len(),
        "Proposals compared"
    );
    Ok(comparison)
}

/// Match the model's vendor scores back to stored proposals.
///
/// Vendors are matched by name, falling back to company, ignoring case and
/// surrounding whitespace. Scores for unknown vendors and scores without an
/// overall value are dropped.
pub fn score_updates(
    comparison: &Comparison,
    proposals: &[(Proposal, Vendor)],
) -> Result<Vec<ScoreUpdate>, AssistError> {
    let norm = |s: &str| s.trim().to_lowercase();
    let mut updates = Vec::new();

    for score in &comparison.vendor_scores {
        let wanted = norm(&score.vendor_name);
        let matched = proposals
            .iter()
            .find(|(_, v)| norm(&v.name) == wanted)
            .or_else(|| proposals.iter().find(|(_, v)| norm(&v.company) == wanted));

        let Some((proposal, _)) = matched else {
            tracing::warn!(vendor = %score.vendor_name, "Comparison names a vendor with no proposal");
            continue;
        };
        let Some(overall) = score.overall_score else {
            continue;
        };
        if updates.iter().any(|u: &ScoreUpdate| u.proposal_id == proposal.id) {
            continue;
        }

        let detail = RecommendationDetail {
            price_score: score.price_score.map(clamp_score),
            timeline_score: score.timeline_score.map(clamp_score),
            compliance_score: score.compliance_score.map(clamp_score),
            pros: &score.pros,
            cons: &score.cons,
        };
        let ai_recommendation =
            serde_json::to_string(&detail).map_err(|e| AssistError::Incomplete {
                task: TASK,
                reason: format!("cannot encode score detail: {e}"),
            })?;

        updates.push(ScoreUpdate {
            proposal_id: proposal.id,
            ai_score: clamp_score(overall),
            ai_recommendation,
        });
    }
    Ok(updates)
}
