//! Proposal ingestion pipeline.
//!
//! Vendor replies flow through:
//! 1. `MailSource::fetch_unseen()`: mailbox I/O
//! 2. `IntakeProcessor::process()`: ledger check, vendor lookup, subject
//!    correlation, one LLM parse, proposal upsert
//! 3. `MailSource::mark_seen()`: only for messages that reached a terminal outcome

pub mod correlate;
pub mod intake;
pub mod listener;

pub use intake::{IntakeOutcome, IntakeProcessor, SkipReason};
pub use listener::{Listener, PollSummary, spawn_listener};
