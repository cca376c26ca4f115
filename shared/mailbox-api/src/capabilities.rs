//! Capability traits consumed by the fetch pipeline
//!
//! Each trait covers one remote operation so pipeline stages only depend on
//! what they call, and tests can substitute in-memory implementations.

use crate::error::MailboxResult;
use crate::types::{AttachmentPayload, ListPage, MessageContent, MessageId};

/// Paginated message search
#[async_trait::async_trait]
pub trait MessageLister: Send + Sync {
    /// Requests the first page of messages matching `query`
    async fn list_first_page(&self, query: &str) -> MailboxResult<ListPage>;

    /// Requests the page identified by `page_token` for the same `query`
    async fn list_next_page(&self, query: &str, page_token: &str) -> MailboxResult<ListPage>;
}

/// Full message retrieval
#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetches the full content of one message
    async fn get_content(&self, id: &MessageId) -> MailboxResult<MessageContent>;
}

/// Attachment body retrieval
#[async_trait::async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Downloads the payload of one attachment part of a message
    async fn get_attachment_payload(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> MailboxResult<AttachmentPayload>;
}

/// A mailbox offering every capability the pipeline needs
pub trait Mailbox: MessageLister + ContentFetcher + AttachmentFetcher {}

impl<T> Mailbox for T where T: MessageLister + ContentFetcher + AttachmentFetcher {}
