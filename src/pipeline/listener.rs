//! Mailbox listener: polls for unseen vendor replies and feeds them to the
//! intake processor.
//!
//! A message is marked `\Seen` only after it reached a terminal outcome
//! (proposal written or skipped). Messages whose processing failed stay
//! unseen and are retried on the next cycle; the inbound ledger keeps a
//! retried message from producing a second proposal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::MailError;
use crate::mail::{InboundEmail, MailSource};
use crate::pipeline::intake::{IntakeOutcome, IntakeProcessor};

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Couples a mailbox with the intake processor.
pub struct Listener {
    source: Arc<dyn MailSource>,
    processor: Arc<IntakeProcessor>,
}

impl Listener {
    pub fn new(source: Arc<dyn MailSource>, processor: Arc<IntakeProcessor>) -> Self {
        Self { source, processor }
    }

    /// Run one cycle: fetch unseen → process each in order → mark finished
    /// ones seen.
    pub async fn check_once(&self) -> Result<PollSummary, MailError> {
        let raw = self.source.fetch_unseen().await?;
        let mut summary = PollSummary {
            fetched: raw.len(),
            ..PollSummary::default()
        };
        if raw.is_empty() {
            return Ok(summary);
        }
        debug!(count = raw.len(), "Fetched unseen emails");

        let mailbox = self.source.mailbox().to_string();
        let mut finished = Vec::with_capacity(raw.len());

        for mail in raw {
            let Some(email) = InboundEmail::parse(&mailbox, mail.uid, &mail.bytes) else {
                warn!(uid = mail.uid, "Undecodable message, marking seen");
                summary.skipped += 1;
                finished.push(mail.uid);
                continue;
            };

            match self.processor.process(&email).await {
                Ok(outcome) => {
                    match outcome {
                        IntakeOutcome::Created { .. } => summary.created += 1,
                        IntakeOutcome::Updated { .. } => summary.updated += 1,
                        IntakeOutcome::Skipped(reason) => {
                            debug!(message_id = %email.message_id, reason = reason.label(), "Email skipped");
                            summary.skipped += 1;
                        }
                    }
                    finished.push(mail.uid);
                }
                Err(e) => {
                    // Left unseen; retried next cycle.
                    error!(message_id = %email.message_id, uid = mail.uid, error = %e, "Failed to process email");
                    summary.failed += 1;
                }
            }
        }

        if let Err(e) = self.source.mark_seen(&finished).await {
            // The ledger makes the re-fetch harmless.
            warn!(error = %e, count = finished.len(), "Failed to mark emails as seen");
        }

        info!(
            fetched = summary.fetched,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "Mailbox poll complete"
        );
        Ok(summary)
    }
}

/// Spawn a background task that runs [`Listener::check_once`] every
/// `poll_interval`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
/// A failing cycle is logged and the loop keeps going.
pub fn spawn_listener(
    listener: Arc<Listener>,
    poll_interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = poll_interval.as_secs(), "Proposal listener started");

        let mut tick = tokio::time::interval(poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Proposal listener shutting down");
                return;
            }

            if let Err(e) = listener.check_once().await {
                error!(error = %e, "Mailbox poll failed");
            }
        }
    });

    (handle, shutdown_flag)
}
