//! In-memory mailbox for tests
//!
//! Pages are chained automatically: page `n` carries the continuation token
//! `page-{n+1}` when another page follows it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::capabilities::{AttachmentFetcher, ContentFetcher, MessageLister};
use crate::error::{MailboxError, MailboxResult};
use crate::types::{AttachmentPayload, ListPage, MessageContent, MessageId, MessageSummary};

const PAGE_TOKEN_PREFIX: &str = "page-";

#[derive(Debug, Default)]
struct Failures {
    first_page: bool,
    pages: HashSet<usize>,
    contents: HashSet<MessageId>,
    attachments: HashSet<String>,
}

#[derive(Debug, Default)]
struct CallLog {
    queries: Vec<String>,
    content: HashMap<MessageId, usize>,
    attachment: HashMap<String, usize>,
}

/// Configurable fake implementing every mailbox capability
#[derive(Debug, Default)]
pub struct InMemoryMailbox {
    pages: Vec<Vec<MessageId>>,
    messages: HashMap<MessageId, MessageContent>,
    attachments: HashMap<(MessageId, String), String>,
    failures: Failures,
    latency: Option<Duration>,
    calls: Mutex<CallLog>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryMailbox {
    /// Empty mailbox: the first page lists no messages
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listing page with the given message ids
    #[must_use]
    pub fn with_page(mut self, ids: &[&str]) -> Self {
        self.pages
            .push(ids.iter().map(|id| MessageId::from(*id)).collect());
        self
    }

    /// Registers the content returned for a message
    #[must_use]
    pub fn with_message(mut self, content: MessageContent) -> Self {
        self.messages.insert(content.id.clone(), content);
        self
    }

    /// Registers the base64url payload of an attachment
    #[must_use]
    pub fn with_attachment(mut self, message_id: &str, attachment_id: &str, data: &str) -> Self {
        self.attachments.insert(
            (MessageId::from(message_id), attachment_id.to_string()),
            data.to_string(),
        );
        self
    }

    /// Makes the first listing call fail
    #[must_use]
    pub fn fail_first_page(mut self) -> Self {
        self.failures.first_page = true;
        self
    }

    /// Makes the request for page `index` (0-based, so at least 1) fail
    #[must_use]
    pub fn fail_page(mut self, index: usize) -> Self {
        self.failures.pages.insert(index);
        self
    }

    /// Makes content retrieval for `id` fail
    #[must_use]
    pub fn fail_content(mut self, id: &str) -> Self {
        self.failures.contents.insert(MessageId::from(id));
        self
    }

    /// Makes the download of `attachment_id` fail
    #[must_use]
    pub fn fail_attachment(mut self, attachment_id: &str) -> Self {
        self.failures.attachments.insert(attachment_id.to_string());
        self
    }

    /// Delays every content and attachment call
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queries received by the listing calls, in call order
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.calls().queries.clone()
    }

    /// Number of content requests made for `id`
    #[must_use]
    pub fn content_calls(&self, id: &str) -> usize {
        self.calls()
            .content
            .get(&MessageId::from(id))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of content requests
    #[must_use]
    pub fn total_content_calls(&self) -> usize {
        self.calls().content.values().sum()
    }

    /// Number of download requests made for `attachment_id`
    #[must_use]
    pub fn attachment_calls(&self, attachment_id: &str) -> usize {
        self.calls()
            .attachment
            .get(attachment_id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of content and attachment calls observed in flight at once
    #[must_use]
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, CallLog> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn page(&self, index: usize) -> ListPage {
        let messages = self
            .pages
            .get(index)
            .map(|ids| ids.iter().cloned().map(MessageSummary::new).collect())
            .unwrap_or_default();
        let next_page_token =
            (index + 1 < self.pages.len()).then(|| format!("{PAGE_TOKEN_PREFIX}{}", index + 1));
        ListPage {
            messages,
            next_page_token,
        }
    }

    async fn simulate_call(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> MailboxError {
    MailboxError::Status {
        status: 500,
        body: format!("injected failure: {what}"),
    }
}

#[async_trait::async_trait]
impl MessageLister for InMemoryMailbox {
    async fn list_first_page(&self, query: &str) -> MailboxResult<ListPage> {
        self.calls().queries.push(query.to_string());
        if self.failures.first_page {
            return Err(injected("first page"));
        }
        Ok(self.page(0))
    }

    async fn list_next_page(&self, query: &str, page_token: &str) -> MailboxResult<ListPage> {
        self.calls().queries.push(query.to_string());
        let index = page_token
            .strip_prefix(PAGE_TOKEN_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| MailboxError::InvalidResponse(format!("unknown token {page_token}")))?;
        if self.failures.pages.contains(&index) {
            return Err(injected(page_token));
        }
        Ok(self.page(index))
    }
}

#[async_trait::async_trait]
impl ContentFetcher for InMemoryMailbox {
    async fn get_content(&self, id: &MessageId) -> MailboxResult<MessageContent> {
        *self.calls().content.entry(id.clone()).or_default() += 1;
        let _in_flight = self.simulate_call().await;
        if self.failures.contents.contains(id) {
            return Err(injected(id.as_str()));
        }
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(id.to_string()))
    }
}

#[async_trait::async_trait]
impl AttachmentFetcher for InMemoryMailbox {
    async fn get_attachment_payload(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> MailboxResult<AttachmentPayload> {
        *self
            .calls()
            .attachment
            .entry(attachment_id.to_string())
            .or_default() += 1;
        let _in_flight = self.simulate_call().await;
        if self.failures.attachments.contains(attachment_id) {
            return Err(injected(attachment_id));
        }
        self.attachments
            .get(&(message_id.clone(), attachment_id.to_string()))
            .map(|data| AttachmentPayload {
                data: data.clone(),
                size: data.len() as u64,
            })
            .ok_or_else(|| MailboxError::NotFound(format!("{message_id}/{attachment_id}")))
    }
}
