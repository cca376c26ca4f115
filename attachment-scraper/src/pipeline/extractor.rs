//! Attachment extractor: one worker per message, parts handled in order

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, Utc};
use mailbox_api::{
    AttachmentFetcher, MailboxError, MailboxResult, MessageContent, MessageId, MessagePart,
};
use tracing::debug;

use super::error::{PipelineError, Stage};
use super::stage::{StageContext, StageHandle};

/// `strftime` pattern of the date prefix, e.g. `Sep-25-2019`
const DATE_PREFIX_FORMAT: &str = "%b-%d-%Y";

/// Time zone in which a message's receipt date is read for the filename prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateZone {
    /// The host's local zone
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl DateZone {
    /// Formats a message timestamp as the filename date prefix, e.g. `Sep-25-2019`
    #[must_use]
    pub fn date_prefix(self, internal_date: DateTime<Utc>) -> String {
        match self {
            Self::Local => internal_date
                .with_timezone(&Local)
                .format(DATE_PREFIX_FORMAT)
                .to_string(),
            Self::Utc => internal_date.format(DATE_PREFIX_FORMAT).to_string(),
            Self::Fixed(offset) => internal_date
                .with_timezone(&offset)
                .format(DATE_PREFIX_FORMAT)
                .to_string(),
        }
    }
}

/// A downloaded attachment ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    /// Message the attachment came from
    pub message_id: MessageId,
    /// Output filename, `<Mon-DD-YYYY>-<original filename>`
    pub filename: String,
    /// base64url encoded payload
    pub data: String,
}

/// Starts the attachment extractor stage.
///
/// Named parts of one message are downloaded sequentially by that message's
/// worker; messages are processed concurrently. A failed download is
/// published and does not affect other messages.
pub fn extract_attachments<A>(
    fetcher: Arc<A>,
    contents: flume::Receiver<MessageContent>,
    zone: DateZone,
    ctx: StageContext,
) -> StageHandle<AttachmentRecord>
where
    A: AttachmentFetcher + ?Sized + 'static,
{
    let (tx, output) = ctx.channel();

    let task = tokio::spawn(async move {
        let mut fan_out = ctx.fan_out(Stage::AttachmentExtractor);

        while let Some(content) = ctx.next_input(&contents).await {
            let fetcher = Arc::clone(&fetcher);
            let tx = tx.clone();
            let worker_ctx = ctx.clone();
            let spawned = fan_out
                .spawn(async move {
                    extract_message(fetcher.as_ref(), content, zone, &tx, &worker_ctx).await;
                })
                .await;
            if !spawned {
                break;
            }
        }

        drop(contents);
        drop(tx);
        fan_out.join().await;
    });

    StageHandle { output, task }
}

async fn extract_message<A>(
    fetcher: &A,
    content: MessageContent,
    zone: DateZone,
    output: &flume::Sender<AttachmentRecord>,
    ctx: &StageContext,
) where
    A: AttachmentFetcher + ?Sized,
{
    let date_prefix = zone.date_prefix(content.internal_date);

    for part in &content.parts {
        let Some(name) = part.attachment_name() else {
            continue;
        };

        let data = match part_payload(fetcher, &content.id, part).await {
            Ok(data) => data,
            Err(source) => {
                ctx.errors().publish(PipelineError::AttachmentFetch {
                    message_id: content.id.clone(),
                    filename: name.to_string(),
                    source,
                });
                continue;
            }
        };

        let record = AttachmentRecord {
            message_id: content.id.clone(),
            filename: output_filename(&date_prefix, name),
            data,
        };
        ctx.counters().add_extracted();
        debug!(message_id = %content.id, filename = %record.filename, "Extracted attachment");

        if output.send_async(record).await.is_err() {
            debug!(message_id = %content.id, "Sink closed, skipping remaining parts");
            return;
        }
    }
}

/// Returns the part's payload, downloading it unless it is inline
async fn part_payload<A>(
    fetcher: &A,
    message_id: &MessageId,
    part: &MessagePart,
) -> MailboxResult<String>
where
    A: AttachmentFetcher + ?Sized,
{
    if let Some(attachment_id) = part.body.attachment_id.as_deref() {
        return Ok(fetcher
            .get_attachment_payload(message_id, attachment_id)
            .await?
            .data);
    }

    part.body.data.clone().ok_or_else(|| {
        MailboxError::InvalidResponse(format!(
            "part {} of message {message_id} has neither data nor an attachment id",
            part.part_id
        ))
    })
}

/// Builds `<date prefix>-<filename>`, neutralising characters that would
/// let a remote filename leave the output directory
#[must_use]
pub fn output_filename(date_prefix: &str, original: &str) -> String {
    let mut name: String = original
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if name == "." || name == ".." {
        name = name.replace('.', "_");
    }
    format!("{date_prefix}-{name}")
}
