//! End-to-end tests for the proposal listener.
//!
//! A scripted mailbox feeds raw RFC 822 messages through the real MIME
//! parser, intake processor and an in-memory libSQL store. The only fake is
//! the model, which answers with a fixed proposal JSON.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rfp_intake::config::IntakeConfig;
use rfp_intake::error::{LlmError, MailError};
use rfp_intake::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use rfp_intake::mail::{MailSource, RawMail};
use rfp_intake::model::{Budget, ProposalStatus, Rfp, RfpStatus, Vendor};
use rfp_intake::pipeline::{IntakeProcessor, Listener, PollSummary, spawn_listener};
use rfp_intake::store::{Database, InboundOutcome, LibSqlBackend};

const PROPOSAL_JSON: &str = r#"{
    "pricing": {"totalAmount": 23800, "currency": "USD",
                "breakdown": [{"item": "Laptop", "unitPrice": 1190, "quantity": 20, "totalPrice": 23800}]},
    "deliveryTimeline": {"value": 21, "unit": "days"},
    "paymentTerms": "Net 30",
    "warranty": "2 years",
    "complianceScore": 92,
    "summary": "Meets all requirements."
}"#;

/// Body text that makes the stub model fail, so the message stays unseen.
const FAIL_MARKER: &str = "please-fail";

/// Stub LLM provider (no real API calls).
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if prompt.contains(FAIL_MARKER) {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "upstream unavailable".into(),
            });
        }
        Ok(CompletionResponse {
            content: PROPOSAL_JSON.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Mailbox whose unseen set is a fixed list; `mark_seen` removes from it.
/// Either call can be switched to fail.
struct ScriptedMailbox {
    unseen: Mutex<Vec<RawMail>>,
    marked: Mutex<Vec<u32>>,
    polls: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_mark: AtomicBool,
}

impl ScriptedMailbox {
    fn new(messages: Vec<RawMail>) -> Self {
        Self {
            unseen: Mutex::new(messages),
            marked: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            fail_mark: AtomicBool::new(false),
        }
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn marked(&self) -> Vec<u32> {
        self.marked.lock().unwrap().clone()
    }

    fn push(&self, mail: RawMail) {
        self.unseen.lock().unwrap().push(mail);
    }
}

#[async_trait]
impl MailSource for ScriptedMailbox {
    fn mailbox(&self) -> &str {
        "INBOX"
    }

    async fn fetch_unseen(&self) -> Result<Vec<RawMail>, MailError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(MailError::Closed);
        }
        Ok(self.unseen.lock().unwrap().clone())
    }

    async fn mark_seen(&self, uids: &[u32]) -> Result<(), MailError> {
        if self.fail_mark.load(Ordering::SeqCst) {
            return Err(MailError::Command {
                command: "UID STORE".into(),
                response: "NO mailbox is read-only".into(),
            });
        }
        self.unseen.lock().unwrap().retain(|m| !uids.contains(&m.uid));
        self.marked.lock().unwrap().extend_from_slice(uids);
        Ok(())
    }
}

fn raw(uid: u32, message_id: Option<&str>, from: &str, subject: &str, body: &str) -> RawMail {
    let mut text = String::new();
    if let Some(id) = message_id {
        text.push_str(&format!("Message-ID: <{id}>\r\n"));
    }
    text.push_str(&format!(
        "From: Sales <{from}>\r\n\
         To: procurement@buyer.example\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 6 Oct 2025 10:00:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    ));
    RawMail {
        uid,
        bytes: text.into_bytes(),
    }
}

struct Harness {
    db: Arc<dyn Database>,
    mailbox: Arc<ScriptedMailbox>,
    listener: Arc<Listener>,
    vendor: Vendor,
    rfp: Rfp,
}

async fn harness(messages: Vec<RawMail>) -> Harness {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let vendor = Vendor::new("Tech Solutions Ltd", "contact@techsolutions.com", "Tech Solutions Ltd");
    db.insert_vendor(&vendor).await.unwrap();
    let rfp = Rfp::new(
        "Office Laptops",
        "20 laptops with 16GB RAM",
        Budget {
            amount: dec!(30000),
            currency: "USD".into(),
        },
    );
    db.insert_rfp(&rfp).await.unwrap();
    db.record_dispatch(rfp.id, &[vendor.id], Utc::now()).await.unwrap();

    let mailbox = Arc::new(ScriptedMailbox::new(messages));
    let processor = Arc::new(IntakeProcessor::new(
        Arc::clone(&db),
        Arc::new(StubLlm),
        IntakeConfig::default(),
    ));
    let source: Arc<dyn MailSource> = mailbox.clone();
    let listener = Arc::new(Listener::new(source, processor));

    Harness {
        db,
        mailbox,
        listener,
        vendor,
        rfp,
    }
}

/// Wait up to five seconds for `cond` to hold.
async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn vendor_reply_becomes_proposal() {
    let h = harness(vec![raw(
        7,
        Some("quote-1@techsolutions.com"),
        "Contact@TechSolutions.com",
        "Re: RFP: Office Laptops",
        "Please find our quote: 20 laptops at $1,190 each.",
    )])
    .await;

    let summary = h.listener.check_once().await.unwrap();
    assert_eq!(
        summary,
        PollSummary {
            fetched: 1,
            created: 1,
            ..PollSummary::default()
        }
    );
    assert_eq!(h.mailbox.marked(), vec![7]);

    let proposals = h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap();
    assert_eq!(proposals.len(), 1);
    let proposal = &proposals[0];
    assert_eq!(proposal.vendor_id, h.vendor.id);
    assert_eq!(proposal.pricing.total_amount, dec!(23800));
    assert_eq!(proposal.compliance_score, Some(92));
    assert_eq!(proposal.status, ProposalStatus::Received);
    assert!(proposal.raw_email_content.as_deref().unwrap().contains("$1,190"));
    assert!(proposal.email_received_at.is_some());

    let rfp = h.db.get_rfp(h.rfp.id).await.unwrap().unwrap();
    assert_eq!(rfp.status, RfpStatus::InReview);

    let ledger = h
        .db
        .get_inbound("quote-1@techsolutions.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ledger.outcome, InboundOutcome::ProposalCreated);
}

#[tokio::test]
async fn unrelated_mail_is_skipped_and_marked_seen() {
    let h = harness(vec![
        raw(1, Some("a@x"), "stranger@nowhere.example", "RFP: Office Laptops", "hi"),
        raw(2, Some("b@x"), "contact@techsolutions.com", "Lunch on Friday?", "hi"),
        raw(3, Some("c@x"), "contact@techsolutions.com", "RFP: Forklifts", "hi"),
    ])
    .await;

    let summary = h.listener.check_once().await.unwrap();
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.created, 0);
    assert_eq!(h.mailbox.marked(), vec![1, 2, 3]);
    assert!(h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap().is_empty());

    let outcomes = [
        ("a@x", InboundOutcome::UnknownVendor),
        ("b@x", InboundOutcome::NoRfpReference),
        ("c@x", InboundOutcome::UnknownRfp),
    ];
    for (id, expected) in outcomes {
        let record = h.db.get_inbound(id).await.unwrap().unwrap();
        assert_eq!(record.outcome, expected, "message {id}");
    }
}

#[tokio::test]
async fn failed_message_stays_unseen_and_is_retried() {
    let h = harness(vec![
        raw(
            10,
            Some("fail@techsolutions.com"),
            "contact@techsolutions.com",
            "RFP: Office Laptops",
            FAIL_MARKER,
        ),
        raw(
            11,
            None,
            "contact@techsolutions.com",
            "RFP: Office Laptops",
            "Revised: 20 laptops at $1,190 each.",
        ),
    ])
    .await;

    let first = h.listener.check_once().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.created, 1);
    assert_eq!(h.mailbox.marked(), vec![11]);
    assert!(h.db.get_inbound("fail@techsolutions.com").await.unwrap().is_none());
    assert!(h.db.get_inbound("uid:INBOX:11").await.unwrap().is_some());

    // Still unseen, so the next poll sees it again.
    let second = h.listener.check_once().await.unwrap();
    assert_eq!(second.fetched, 1);
    assert_eq!(second.failed, 1);
}

#[tokio::test]
async fn redelivered_message_is_not_applied_twice() {
    let h = harness(vec![raw(
        20,
        Some("quote-1@techsolutions.com"),
        "contact@techsolutions.com",
        "RFP: Office Laptops",
        "20 laptops at $1,190 each.",
    )])
    .await;

    assert_eq!(h.listener.check_once().await.unwrap().created, 1);

    // Same Message-ID arrives again under a new UID.
    h.mailbox.push(raw(
        21,
        Some("quote-1@techsolutions.com"),
        "contact@techsolutions.com",
        "RFP: Office Laptops",
        "20 laptops at $1,190 each.",
    ));
    let summary = h.listener.check_once().await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(h.mailbox.marked(), vec![20, 21]);
    assert_eq!(h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn second_quote_from_same_vendor_updates_in_place() {
    let h = harness(vec![raw(
        30,
        Some("q1@techsolutions.com"),
        "contact@techsolutions.com",
        "RFP: Office Laptops",
        "20 laptops at $1,250 each.",
    )])
    .await;
    h.listener.check_once().await.unwrap();
    let first = h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap();

    h.mailbox.push(raw(
        31,
        Some("q2@techsolutions.com"),
        "contact@techsolutions.com",
        "Re: RFP: Office Laptops",
        "Revised: 20 laptops at $1,190 each.",
    ));
    let summary = h.listener.check_once().await.unwrap();
    assert_eq!(summary.updated, 1);

    let after = h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, first[0].id);
    assert!(after[0].raw_email_content.as_deref().unwrap().contains("Revised"));
}

#[tokio::test]
async fn mark_seen_failure_does_not_lose_the_poll() {
    let h = harness(vec![raw(
        40,
        Some("q1@techsolutions.com"),
        "contact@techsolutions.com",
        "RFP: Office Laptops",
        "20 laptops at $1,190 each.",
    )])
    .await;
    h.mailbox.fail_mark.store(true, Ordering::SeqCst);

    let summary = h.listener.check_once().await.unwrap();
    assert_eq!(summary.created, 1);
    assert!(h.mailbox.marked().is_empty());
    assert_eq!(h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap().len(), 1);

    // The message is fetched again; the ledger turns it into a no-op.
    h.mailbox.fail_mark.store(false, Ordering::SeqCst);
    let again = h.listener.check_once().await.unwrap();
    assert_eq!(again.fetched, 1);
    assert_eq!(again.skipped, 1);
    assert_eq!(again.created + again.updated, 0);
    assert_eq!(h.mailbox.marked(), vec![40]);
    assert_eq!(h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn spawned_listener_survives_poll_errors_and_stops_on_shutdown() {
    let h = harness(vec![raw(
        50,
        Some("q1@techsolutions.com"),
        "contact@techsolutions.com",
        "RFP: Office Laptops",
        "20 laptops at $1,190 each.",
    )])
    .await;
    h.mailbox.fail_fetch.store(true, Ordering::SeqCst);

    let (handle, shutdown) = spawn_listener(Arc::clone(&h.listener), Duration::from_millis(10));

    // Two failed polls in a row means the loop kept going after an error.
    wait_for(|| h.mailbox.polls() >= 2).await;
    assert!(h.mailbox.marked().is_empty());

    h.mailbox.fail_fetch.store(false, Ordering::SeqCst);
    wait_for(|| h.mailbox.marked() == vec![50]).await;
    assert_eq!(h.db.list_proposals_for_rfp(h.rfp.id).await.unwrap().len(), 1);

    shutdown.store(true, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("listener did not stop")
        .unwrap();

    let polls = h.mailbox.polls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.mailbox.polls(), polls);
}
