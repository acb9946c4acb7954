//! Inbound mail: IMAP access and message decoding.

pub mod imap;
pub mod message;
pub mod source;

pub use imap::ImapMailbox;
pub use message::{InboundEmail, strip_html, synthetic_message_id};
pub use source::{MailSource, RawMail};
