//! Proposal ingestion: one inbound email in, at most one proposal upsert out.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assist::{RfpContext, parse_vendor_response};
use crate::config::IntakeConfig;
use crate::error::{AssistError, IntakeError};
use crate::llm::LlmProvider;
use crate::mail::InboundEmail;
use crate::model::RfpStatus;
use crate::pipeline::correlate::{match_rfp, rfp_reference};
use crate::store::{Database, InboundOutcome, InboundRecord, UpsertOutcome};

/// Why an email produced no proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already reached a terminal outcome on an earlier poll.
    Duplicate,
    UnknownVendor,
    NoRfpReference,
    UnknownRfp,
    /// The reply had no price, or the model's answer was not a proposal.
    Unparseable,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::UnknownVendor => "unknown_vendor",
            Self::NoRfpReference => "no_rfp_reference",
            Self::UnknownRfp => "unknown_rfp",
            Self::Unparseable => "unparseable",
        }
    }
}

/// Terminal result of processing one email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Created { proposal_id: Uuid, rfp_id: Uuid },
    Updated { proposal_id: Uuid, rfp_id: Uuid },
    Skipped(SkipReason),
}

/// Turns vendor replies into proposals.
pub struct IntakeProcessor {
    db: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    config: IntakeConfig,
}

impl IntakeProcessor {
    pub fn new(db: Arc<dyn Database>, llm: Arc<dyn LlmProvider>, config: IntakeConfig) -> Self {
        Self { db, llm, config }
    }

    /// Process one email.
    ///
    /// Every `Ok` is terminal and recorded in the inbound ledger. An `Err`
    /// records nothing so the message can be retried.
    pub async fn process(&self, email: &InboundEmail) -> Result<IntakeOutcome, IntakeError> {
        if self.db.get_inbound(&email.message_id).await?.is_some() {
            debug!(message_id = %email.message_id, "Email already processed");
            return Ok(IntakeOutcome::Skipped(SkipReason::Duplicate));
        }

        let sender = email.from.clone().unwrap_or_default();

        let vendor = match email.from.as_deref() {
            Some(address) => self.db.find_vendor_by_email(address).await?,
            None => None,
        };
        let Some(vendor) = vendor else {
            info!(message_id = %email.message_id, sender = %sender, "Email from unknown vendor");
            return self.skip(email, SkipReason::UnknownVendor, None).await;
        };

        let Some(reference) = rfp_reference(&email.subject) else {
            info!(
                message_id = %email.message_id,
                subject = %email.subject,
                "Subject does not reference an RFP"
            );
            return self.skip(email, SkipReason::NoRfpReference, None).await;
        };

        let candidates = self.db.list_rfps().await?;
        let Some(rfp) = match_rfp(&reference, &candidates, vendor.id) else {
            info!(message_id = %email.message_id, reference = %reference, "No RFP matches subject");
            return self.skip(email, SkipReason::UnknownRfp, None).await;
        };

        let body = truncate_chars(&email.body_for_parsing(), self.config.max_body_chars);
        let parsed = parse_vendor_response(self.llm.as_ref(), &body, &RfpContext::from(rfp))
            .await
            .and_then(|parsed| parsed.into_proposal(rfp.id, vendor.id));

        let mut proposal = match parsed {
            Ok(proposal) => proposal,
            Err(AssistError::Incomplete { reason, .. }) => {
                warn!(message_id = %email.message_id, rfp_id = %rfp.id, reason = %reason, "Reply has no usable price");
                return self.skip(email, SkipReason::Unparseable, Some(rfp.id)).await;
            }
            Err(AssistError::InvalidResponse { reason, raw, .. }) => {
                warn!(
                    message_id = %email.message_id,
                    rfp_id = %rfp.id,
                    reason = %reason,
                    raw_len = raw.len(),
                    "Model reply could not be read as a proposal"
                );
                return self.skip(email, SkipReason::Unparseable, Some(rfp.id)).await;
            }
            Err(e) => return Err(e.into()),
        };
        proposal.raw_email_content = email.raw_body().map(str::to_string);
        proposal.email_received_at = Some(email.date.unwrap_or_else(Utc::now));
        proposal.attachments = email.attachments.clone();

        let upserted = self.db.upsert_proposal(&proposal).await?;

        if rfp.status == RfpStatus::Sent {
            self.db.update_rfp_status(rfp.id, RfpStatus::InReview).await?;
            info!(rfp_id = %rfp.id, "RFP moved to review");
        }

        info!(
            message_id = %email.message_id,
            vendor = %vendor.name,
            rfp_id = %rfp.id,
            proposal_id = %upserted.id(),
            total = %proposal.pricing.total_amount,
            created = matches!(upserted, UpsertOutcome::Created(_)),
            "Proposal recorded"
        );

        let (ledger, outcome) = match upserted {
            UpsertOutcome::Created(proposal_id) => (
                InboundOutcome::ProposalCreated,
                IntakeOutcome::Created {
                    proposal_id,
                    rfp_id: rfp.id,
                },
            ),
            UpsertOutcome::Updated(proposal_id) => (
                InboundOutcome::ProposalUpdated,
                IntakeOutcome::Updated {
                    proposal_id,
                    rfp_id: rfp.id,
                },
            ),
        };
        self.record(email, ledger, Some(rfp.id), Some(upserted.id()))
            .await?;
        Ok(outcome)
    }

    /// Record a terminal skip in the ledger.
    async fn skip(
        &self,
        email: &InboundEmail,
        reason: SkipReason,
        rfp_id: Option<Uuid>,
    ) -> Result<IntakeOutcome, IntakeError> {
        let ledger = match reason {
            SkipReason::UnknownVendor => InboundOutcome::UnknownVendor,
            SkipReason::NoRfpReference => InboundOutcome::NoRfpReference,
            SkipReason::UnknownRfp => InboundOutcome::UnknownRfp,
            SkipReason::Unparseable => InboundOutcome::Unparseable,
            // Duplicates already have their row.
            SkipReason::Duplicate => return Ok(IntakeOutcome::Skipped(reason)),
        };
        self.record(email, ledger, rfp_id, None).await?;
        Ok(IntakeOutcome::Skipped(reason))
    }

    async fn record(
        &self,
        email: &InboundEmail,
        outcome: InboundOutcome,
        rfp_id: Option<Uuid>,
        proposal_id: Option<Uuid>,
    ) -> Result<(), IntakeError> {
        self.db
            .record_inbound(&InboundRecord {
                message_id: email.message_id.clone(),
                sender: email.from.clone().unwrap_or_default(),
                subject: email.subject.clone(),
                outcome,
                rfp_id,
                proposal_id,
                processed_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

/// First `max` characters of `s`, on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
