//! Vendor proposal record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::default_currency;

/// Review state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalStatus {
    #[default]
    Received,
    UnderReview,
    Accepted,
    Rejected,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::UnderReview => write!(f, "under-review"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "under-review" => Ok(Self::UnderReview),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown proposal status: {other}")),
        }
    }
}

/// One priced line of a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub item: String,
    #[serde(default, deserialize_with = "super::lenient::opt_decimal")]
    pub unit_price: Option<Decimal>,
    #[serde(default, deserialize_with = "super::lenient::opt_u32")]
    pub quantity: Option<u32>,
    #[serde(default, deserialize_with = "super::lenient::opt_decimal")]
    pub total_price: Option<Decimal>,
}

/// Quoted price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub total_amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub breakdown: Vec<LineItem>,
}

/// Delivery window as offered by the vendor. Vendors are vaguer than
/// buyers, so every field is optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OfferedTimeline {
    #[serde(default, deserialize_with = "super::lenient::opt_u32")]
    pub value: Option<u32>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Metadata of a file attached to the vendor's reply. Contents are not kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub mimetype: String,
    pub size: usize,
}

/// A vendor's answer to an RFP. At most one exists per (rfp, vendor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub rfp_id: Uuid,
    pub vendor_id: Uuid,
    pub pricing: Pricing,
    pub delivery_timeline: Option<OfferedTimeline>,
    pub payment_terms: Option<String>,
    pub warranty: Option<String>,
    pub additional_terms: Option<String>,
    /// How well the offer meets the RFP, 0-100, as judged by the parser.
    pub compliance_score: Option<u8>,
    pub ai_summary: Option<String>,
    /// Overall score from the last comparison run, 0-100.
    pub ai_score: Option<u8>,
    /// JSON blob with sub-scores, pros and cons from the last comparison run.
    pub ai_recommendation: Option<String>,
    pub raw_email_content: Option<String>,
    pub email_received_at: Option<DateTime<Utc>>,
    pub attachments: Vec<AttachmentMeta>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(rfp_id: Uuid, vendor_id: Uuid, pricing: Pricing) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rfp_id,
            vendor_id,
            pricing,
            delivery_timeline: None,
            payment_terms: None,
            warranty: None,
            additional_terms: None,
            compliance_score: None,
            ai_summary: None,
            ai_score: None,
            ai_recommendation: None,
            raw_email_content: None,
            email_received_at: None,
            attachments: Vec::new(),
            status: ProposalStatus::Received,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Clamp a model-provided score into 0..=100.
pub fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}
