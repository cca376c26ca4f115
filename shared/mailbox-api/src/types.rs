//! Mailbox data model shared by the capability traits

use std::fmt;

use chrono::{DateTime, Utc};

/// Opaque key identifying one message in the remote mailbox
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a raw identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A message reference returned by the listing endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    /// Message identifier
    pub id: MessageId,
    /// Conversation the message belongs to, when the provider reports it
    pub thread_id: Option<String>,
}

impl MessageSummary {
    /// Summary carrying only an identifier
    #[must_use]
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Messages on this page
    pub messages: Vec<MessageSummary>,
    /// Continuation token for the next page
    pub next_page_token: Option<String>,
}

impl ListPage {
    /// Returns the continuation token when another page must be requested.
    ///
    /// An empty token is treated the same as a missing one.
    #[must_use]
    pub fn next_page(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}

/// Body reference of a message part: inline data or an attachment handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartBody {
    /// Identifier used to download the payload separately
    pub attachment_id: Option<String>,
    /// Inline base64url data
    pub data: Option<String>,
    /// Payload size in bytes as reported by the provider
    pub size: u64,
}

/// A single MIME part of a fetched message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePart {
    /// Provider part identifier (e.g. `0`, `1.2`)
    pub part_id: String,
    /// MIME type of the part
    pub mime_type: String,
    /// Filename, present only for attachments
    pub filename: Option<String>,
    /// Body reference
    pub body: PartBody,
}

impl MessagePart {
    /// Returns the attachment filename when the part is a named attachment
    #[must_use]
    pub fn attachment_name(&self) -> Option<&str> {
        self.filename.as_deref().filter(|name| !name.is_empty())
    }
}

/// A fully fetched message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    /// Message identifier
    pub id: MessageId,
    /// Internal timestamp assigned by the mailbox
    pub internal_date: DateTime<Utc>,
    /// Parts in document order, nested multiparts flattened
    pub parts: Vec<MessagePart>,
}

/// Downloaded attachment body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPayload {
    /// base64url encoded bytes
    pub data: String,
    /// Decoded size in bytes as reported by the provider
    pub size: u64,
}
