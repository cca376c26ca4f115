//! Remote mailbox access for the attachment scraper
//!
//! This crate holds the boundary between the fetch pipeline and the mailbox
//! provider: the capability traits the pipeline is written against, the
//! message data model, credential resolution and the Gmail REST client.

#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]

/// Access token resolution
pub mod auth;
/// Capability traits
pub mod capabilities;
/// Error types for mailbox operations
pub mod error;
/// Gmail REST client
pub mod gmail;
/// Mailbox data model
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use auth::{AccessToken, Credentials};
pub use capabilities::{AttachmentFetcher, ContentFetcher, Mailbox, MessageLister};
pub use error::{MailboxError, MailboxResult};
pub use gmail::{GmailClient, GmailConfig};
pub use types::{
    AttachmentPayload, ListPage, MessageContent, MessageId, MessagePart, MessageSummary,
    PartBody,
};
