//! Gmail REST implementation of the mailbox capabilities

use std::time::Duration;

use chrono::DateTime;
use reqwest::{header, Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::auth::AccessToken;
use crate::capabilities::{AttachmentFetcher, ContentFetcher, MessageLister};
use crate::error::{MailboxError, MailboxResult};
use crate::types::{
    AttachmentPayload, ListPage, MessageContent, MessageId, MessagePart, MessageSummary,
    PartBody,
};

/// Public Gmail API endpoint
pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com";
/// The authenticated user
pub const DEFAULT_USER_ID: &str = "me";
/// Default request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Maximum number of idle connections to maintain per host
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 32;
/// Error bodies longer than this are cut before being stored in an error
const MAX_ERROR_BODY_LEN: usize = 512;

/// Connection settings for [`GmailClient`]
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// API base URL, without the `/gmail/v1` suffix
    pub base_url: String,
    /// Mailbox owner, `me` for the token's user
    pub user_id: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// HTTP client for the Gmail `users.messages` resource
pub struct GmailClient {
    messages_url: String,
    token: AccessToken,
    http_client: ClientWithMiddleware,
}

impl GmailClient {
    /// Creates a new Gmail client
    ///
    /// # Errors
    ///
    /// Returns `MailboxError::Network` if the HTTP client cannot be built
    pub fn new(config: &GmailConfig, token: AccessToken) -> MailboxResult<Self> {
        let reqwest_client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
            .user_agent(format!("attachment-scraper/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let http_client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            messages_url: format!(
                "{}/gmail/v1/users/{}/messages",
                config.base_url.trim_end_matches('/'),
                config.user_id
            ),
            token,
            http_client,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> MailboxResult<T> {
        let response = self
            .http_client
            .get(url)
            .query(query)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token.secret()))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MailboxError::Unauthorized),
            StatusCode::NOT_FOUND => Err(MailboxError::NotFound(url.to_string())),
            _ => {
                let mut body = response.text().await.unwrap_or_default();
                if body.len() > MAX_ERROR_BODY_LEN {
                    let cut = (0..=MAX_ERROR_BODY_LEN)
                        .rev()
                        .find(|i| body.is_char_boundary(*i))
                        .unwrap_or(0);
                    body.truncate(cut);
                }
                Err(MailboxError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn list_page(&self, query: &str, page_token: Option<&str>) -> MailboxResult<ListPage> {
        let mut params = vec![("q", query)];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: ListMessagesResponse = self.get_json(&self.messages_url, &params).await?;
        debug!(
            count = response.messages.len(),
            has_next = response.next_page_token.is_some(),
            "Listed messages page"
        );
        Ok(response.into())
    }
}

#[async_trait::async_trait]
impl MessageLister for GmailClient {
    #[instrument(skip(self))]
    async fn list_first_page(&self, query: &str) -> MailboxResult<ListPage> {
        self.list_page(query, None).await
    }

    #[instrument(skip(self, page_token))]
    async fn list_next_page(&self, query: &str, page_token: &str) -> MailboxResult<ListPage> {
        self.list_page(query, Some(page_token)).await
    }
}

#[async_trait::async_trait]
impl ContentFetcher for GmailClient {
    #[instrument(skip(self), fields(message_id = %id))]
    async fn get_content(&self, id: &MessageId) -> MailboxResult<MessageContent> {
        let url = format!("{}/{}", self.messages_url, id);
        let message: WireMessage = self.get_json(&url, &[("format", "full")]).await?;
        message.try_into()
    }
}

#[async_trait::async_trait]
impl AttachmentFetcher for GmailClient {
    #[instrument(skip(self), fields(message_id = %message_id))]
    async fn get_attachment_payload(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> MailboxResult<AttachmentPayload> {
        let url = format!(
            "{}/{}/attachments/{}",
            self.messages_url, message_id, attachment_id
        );
        let body: WireBody = self.get_json(&url, &[]).await?;
        let data = body.data.ok_or_else(|| {
            MailboxError::InvalidResponse(format!(
                "attachment {attachment_id} of message {message_id} has no data"
            ))
        })?;
        Ok(AttachmentPayload {
            data,
            size: body.size,
        })
    }
}

// Wire format

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<WireMessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessageRef {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<WirePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    part_id: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    body: WireBody,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBody {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    data: Option<String>,
}

impl From<ListMessagesResponse> for ListPage {
    fn from(response: ListMessagesResponse) -> Self {
        Self {
            messages: response
                .messages
                .into_iter()
                .map(|m| MessageSummary {
                    id: MessageId::from(m.id),
                    thread_id: m.thread_id,
                })
                .collect(),
            next_page_token: response.next_page_token,
        }
    }
}

impl TryFrom<WireMessage> for MessageContent {
    type Error = MailboxError;

    fn try_from(message: WireMessage) -> MailboxResult<Self> {
        let raw_date = message.internal_date.ok_or_else(|| {
            MailboxError::InvalidResponse(format!("message {} has no internalDate", message.id))
        })?;
        let internal_date = raw_date
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| {
                MailboxError::InvalidResponse(format!(
                    "message {} has invalid internalDate '{raw_date}'",
                    message.id
                ))
            })?;

        let mut parts = Vec::new();
        if let Some(payload) = message.payload {
            flatten_parts(payload, &mut parts);
        }

        Ok(Self {
            id: MessageId::from(message.id),
            internal_date,
            parts,
        })
    }
}

/// Collects the leaf parts of a MIME tree depth-first. Named parts with an
/// attachment id are collected whole, without their children.
fn flatten_parts(part: WirePart, out: &mut Vec<MessagePart>) {
    // A named downloadable part is an attachment even when it has children,
    // e.g. a forwarded message/rfc822
    let is_attachment = !part.filename.is_empty() && part.body.attachment_id.is_some();
    if is_attachment || part.parts.is_empty() {
        out.push(MessagePart {
            part_id: part.part_id,
            mime_type: part.mime_type,
            filename: Some(part.filename).filter(|name| !name.is_empty()),
            body: PartBody {
                attachment_id: part.body.attachment_id,
                data: part.body.data,
                size: part.body.size,
            },
        });
        return;
    }

    for child in part.parts {
        flatten_parts(child, out);
    }
}
