//! Unified `Database` trait: a single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{Proposal, ProposalStatus, Rfp, RfpStatus, Vendor};

/// Result of writing a proposal keyed by (rfp, vendor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No proposal existed for the pair; the row was inserted.
    Created(Uuid),
    /// An earlier proposal was overwritten in place; carries the kept id.
    Updated(Uuid),
}

impl UpsertOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Created(id) | Self::Updated(id) => *id,
        }
    }
}

/// Terminal result recorded for an inbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    ProposalCreated,
    ProposalUpdated,
    UnknownVendor,
    NoRfpReference,
    UnknownRfp,
    /// The parser returned no usable price; retrying would not help.
    Unparseable,
}

impl InboundOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProposalCreated => "proposal_created",
            Self::ProposalUpdated => "proposal_updated",
            Self::UnknownVendor => "unknown_vendor",
            Self::NoRfpReference => "no_rfp_reference",
            Self::UnknownRfp => "unknown_rfp",
            Self::Unparseable => "unparseable",
        }
    }
}

impl std::str::FromStr for InboundOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposal_created" => Ok(Self::ProposalCreated),
            "proposal_updated" => Ok(Self::ProposalUpdated),
            "unknown_vendor" => Ok(Self::UnknownVendor),
            "no_rfp_reference" => Ok(Self::NoRfpReference),
            "unknown_rfp" => Ok(Self::UnknownRfp),
            "unparseable" => Ok(Self::Unparseable),
            other => Err(format!("unknown inbound outcome: {other}")),
        }
    }
}

/// A ledger row for an email that reached a terminal outcome.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub outcome: InboundOutcome,
    pub rfp_id: Option<Uuid>,
    pub proposal_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering vendors, RFPs, proposals and
/// the inbound email ledger.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Vendors ─────────────────────────────────────────────────────

    async fn insert_vendor(&self, vendor: &Vendor) -> Result<(), DatabaseError>;

    async fn get_vendor(&self, id: Uuid) -> Result<Option<Vendor>, DatabaseError>;

    /// Case-insensitive exact match on the vendor's email address.
    async fn find_vendor_by_email(&self, email: &str) -> Result<Option<Vendor>, DatabaseError>;

    async fn list_vendors(&self) -> Result<Vec<Vendor>, DatabaseError>;

    // ── RFPs ────────────────────────────────────────────────────────

    async fn insert_rfp(&self, rfp: &Rfp) -> Result<(), DatabaseError>;

    /// Get an RFP with its dispatch history.
    async fn get_rfp(&self, id: Uuid) -> Result<Option<Rfp>, DatabaseError>;

    /// All RFPs, newest first.
    async fn list_rfps(&self) -> Result<Vec<Rfp>, DatabaseError>;

    /// RFPs whose title contains `fragment` (case-insensitive), newest first.
    async fn find_rfps_by_title(&self, fragment: &str) -> Result<Vec<Rfp>, DatabaseError>;

    async fn update_rfp_status(&self, id: Uuid, status: RfpStatus) -> Result<(), DatabaseError>;

    /// Record that the RFP went out to `vendor_ids`. A draft becomes `sent`;
    /// later states are left alone.
    async fn record_dispatch(
        &self,
        rfp_id: Uuid,
        vendor_ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Delete an RFP together with its dispatches and proposals.
    /// Returns `false` if it did not exist.
    async fn delete_rfp(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Proposals ───────────────────────────────────────────────────

    /// Insert or overwrite the proposal for `(proposal.rfp_id, proposal.vendor_id)`.
    ///
    /// On overwrite the stored id, `created_at` and `status` are kept and the
    /// previous comparison score is cleared.
    async fn upsert_proposal(&self, proposal: &Proposal) -> Result<UpsertOutcome, DatabaseError>;

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, DatabaseError>;

    /// Proposals for an RFP, newest first.
    async fn list_proposals_for_rfp(&self, rfp_id: Uuid) -> Result<Vec<Proposal>, DatabaseError>;

    async fn update_proposal_status(
        &self,
        id: Uuid,
        status: ProposalStatus,
    ) -> Result<(), DatabaseError>;

    /// Store the comparison result for a proposal.
    async fn record_proposal_score(
        &self,
        id: Uuid,
        ai_score: u8,
        ai_recommendation: &str,
    ) -> Result<(), DatabaseError>;

    // ── Inbound ledger ──────────────────────────────────────────────

    async fn get_inbound(&self, message_id: &str) -> Result<Option<InboundRecord>, DatabaseError>;

    /// Record a terminal outcome. A second record for the same message id
    /// is ignored.
    async fn record_inbound(&self, record: &InboundRecord) -> Result<(), DatabaseError>;
}
