//! Buyer-side operations: create and dispatch RFPs, compare proposals.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::assist::{Comparison, ScoreUpdate, compare_proposals, parse_rfp, score_updates};
use crate::error::{ProcurementError, Result};
use crate::llm::LlmProvider;
use crate::model::{Proposal, ProposalStatus, Rfp, RfpStatus, Vendor, VendorStatus};
use crate::store::Database;

/// Structure a free-text request with the model and store it as a draft.
pub async fn create_rfp(db: &dyn Database, llm: &dyn LlmProvider, request: &str) -> Result<Rfp> {
    let rfp = parse_rfp(llm, request).await?;
    db.insert_rfp(&rfp).await?;
    info!(rfp_id = %rfp.id, title = %rfp.title, "RFP created");
    Ok(rfp)
}

/// Fetch an RFP or fail with `RfpNotFound`.
pub async fn require_rfp(db: &dyn Database, rfp_id: Uuid) -> Result<Rfp> {
    Ok(db
        .get_rfp(rfp_id)
        .await?
        .ok_or(ProcurementError::RfpNotFound(rfp_id))?)
}

/// Fetch a proposal or fail with `ProposalNotFound`.
pub async fn require_proposal(db: &dyn Database, proposal_id: Uuid) -> Result<Proposal> {
    Ok(db
        .get_proposal(proposal_id)
        .await?
        .ok_or(ProcurementError::ProposalNotFound(proposal_id))?)
}

/// Move a proposal to a new review state.
pub async fn set_proposal_status(
    db: &dyn Database,
    proposal_id: Uuid,
    status: ProposalStatus,
) -> Result<Proposal> {
    require_proposal(db, proposal_id).await?;
    db.update_proposal_status(proposal_id, status).await?;
    info!(proposal_id = %proposal_id, status = %status, "Proposal status changed");
    require_proposal(db, proposal_id).await
}

/// Set an RFP's lifecycle state by hand (e.g. `completed`, `cancelled`).
pub async fn set_rfp_status(db: &dyn Database, rfp_id: Uuid, status: RfpStatus) -> Result<Rfp> {
    require_rfp(db, rfp_id).await?;
    db.update_rfp_status(rfp_id, status).await?;
    info!(rfp_id = %rfp_id, status = %status, "RFP status changed");
    require_rfp(db, rfp_id).await
}

/// Record that the RFP went out to `vendor_ids`, moving a draft to `sent`.
///
/// The mail itself is sent out of band. Vendors already on the RFP's
/// dispatch list are not recorded twice.
pub async fn dispatch_rfp(db: &dyn Database, rfp_id: Uuid, vendor_ids: &[Uuid]) -> Result<Rfp> {
    if vendor_ids.is_empty() {
        return Err(ProcurementError::NoRecipients.into());
    }
    let rfp = require_rfp(db, rfp_id).await?;
    if matches!(rfp.status, RfpStatus::Completed | RfpStatus::Cancelled) {
        return Err(ProcurementError::Closed {
            rfp_id,
            status: rfp.status.to_string(),
        }
        .into());
    }

    let mut recipients = Vec::new();
    for &vendor_id in vendor_ids {
        let vendor = db
            .get_vendor(vendor_id)
            .await?
            .ok_or(ProcurementError::VendorNotFound(vendor_id))?;
        if vendor.status == VendorStatus::Inactive {
            return Err(ProcurementError::VendorInactive(vendor.email).into());
        }
        if !rfp.was_sent_to(vendor_id) && !recipients.contains(&vendor_id) {
            recipients.push(vendor_id);
        }
    }

    db.record_dispatch(rfp_id, &recipients, Utc::now()).await?;
    info!(rfp_id = %rfp_id, new_recipients = recipients.len(), "RFP dispatched");
    require_rfp(db, rfp_id).await
}

/// Proposals for an RFP paired with their vendors. Proposals whose vendor
/// no longer exists are left out.
pub async fn proposals_with_vendors(
    db: &dyn Database,
    rfp_id: Uuid,
) -> Result<Vec<(Proposal, Vendor)>> {
    let mut pairs = Vec::new();
    for proposal in db.list_proposals_for_rfp(rfp_id).await? {
        if let Some(vendor) = db.get_vendor(proposal.vendor_id).await? {
            pairs.push((proposal, vendor));
        }
    }
    Ok(pairs)
}

/// Compare every proposal for an RFP and write the scores back.
pub async fn compare_rfp(
    db: &dyn Database,
    llm: &dyn LlmProvider,
    rfp_id: Uuid,
) -> Result<(Comparison, Vec<ScoreUpdate>)> {
    let rfp = require_rfp(db, rfp_id).await?;
    let proposals = proposals_with_vendors(db, rfp_id).await?;
    if proposals.is_empty() {
        return Err(ProcurementError::NoProposals(rfp_id).into());
    }

    let comparison = compare_proposals(llm, &rfp, &proposals).await?;
    let updates = score_updates(&comparison, &proposals)?;
    for update in &updates {
        db.record_proposal_score(update.proposal_id, update.ai_score, &update.ai_recommendation)
            .await?;
    }
    info!(rfp_id = %rfp_id, scored = updates.len(), "Proposal scores recorded");
    Ok((comparison, updates))
}
