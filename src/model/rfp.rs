//! Request For Proposal record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::default_currency;

/// Lifecycle of an RFP.
///
/// `Draft` → `Sent` when dispatched to vendors, `Sent` → `InReview` when the
/// first proposal arrives. `Completed` and `Cancelled` are set by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RfpStatus {
    #[default]
    Draft,
    Sent,
    InReview,
    Completed,
    Cancelled,
}

impl std::fmt::Display for RfpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Sent => write!(f, "sent"),
            Self::InReview => write!(f, "in-review"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RfpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "sent" => Ok(Self::Sent),
            "in-review" => Ok(Self::InReview),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown RFP status: {other}")),
        }
    }
}

/// Budget ceiling for the purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// One line of what is being procured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub item: String,
    #[serde(default, deserialize_with = "super::lenient::opt_u32")]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub specifications: Option<String>,
}

/// Unit for a delivery timeline.
///
/// Parsing is lenient (`"Week"`, `"weeks"`, `"WEEKS"` all work) because the
/// value usually comes from model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum TimelineUnit {
    #[default]
    Days,
    Weeks,
    Months,
}

impl std::fmt::Display for TimelineUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Days => write!(f, "days"),
            Self::Weeks => write!(f, "weeks"),
            Self::Months => write!(f, "months"),
        }
    }
}

impl std::str::FromStr for TimelineUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches('s') {
            "day" => Ok(Self::Days),
            "week" => Ok(Self::Weeks),
            "month" => Ok(Self::Months),
            _ => Err(format!("unknown timeline unit: {s}")),
        }
    }
}

impl TryFrom<String> for TimelineUnit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimelineUnit> for String {
    fn from(unit: TimelineUnit) -> Self {
        unit.to_string()
    }
}

/// Requested delivery window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub value: u32,
    #[serde(default)]
    pub unit: TimelineUnit,
}

impl std::fmt::Display for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Record of an RFP going out to one vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub vendor_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

/// A structured Request For Proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rfp {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub budget: Budget,
    pub requirements: Vec<Requirement>,
    pub delivery_timeline: Option<Timeline>,
    pub payment_terms: String,
    pub warranty: Option<String>,
    pub additional_terms: Option<String>,
    pub status: RfpStatus,
    pub sent_to_vendors: Vec<Dispatch>,
    /// The free-text request the RFP was structured from.
    pub raw_input: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rfp {
    pub fn new(title: impl Into<String>, description: impl Into<String>, budget: Budget) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into().trim().to_string(),
            description: description.into(),
            budget,
            requirements: Vec::new(),
            delivery_timeline: None,
            payment_terms: "Net 30".to_string(),
            warranty: None,
            additional_terms: None,
            status: RfpStatus::Draft,
            sent_to_vendors: Vec::new(),
            raw_input: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this RFP has been dispatched to the given vendor.
    pub fn was_sent_to(&self, vendor_id: Uuid) -> bool {
        self.sent_to_vendors.iter().any(|d| d.vendor_id == vendor_id)
    }
}
