//! Where inbound mail comes from.

use async_trait::async_trait;

use crate::error::MailError;

/// One undecoded message as fetched from the mailbox.
#[derive(Debug, Clone)]
pub struct RawMail {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

/// A mailbox the listener can poll.
///
/// Fetching must not change the message's `\Seen` flag; the listener calls
/// [`MailSource::mark_seen`] only for messages it finished with.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Mailbox name, used to build synthetic message ids.
    fn mailbox(&self) -> &str;

    async fn fetch_unseen(&self) -> Result<Vec<RawMail>, MailError>;

    async fn mark_seen(&self, uids: &[u32]) -> Result<(), MailError>;
}
