use std::path::PathBuf;

use mailbox_api::{MailboxError, MessageId};
use strum::Display;
use thiserror::Error;
use tracing::{debug, error};

use crate::storage::StoreError;

/// Pipeline stage names used in logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Search and pagination
    Lister,
    /// Per-message content retrieval
    ContentFetcher,
    /// Per-message attachment download
    AttachmentExtractor,
    /// Decoding and persisting attachments
    Sink,
}

/// A stage-attributed failure published on the shared error channel
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The first search page could not be retrieved
    #[error("Unable to retrieve Messages: {0}")]
    ListFirstPage(#[source] MailboxError),

    /// A continuation page could not be retrieved
    #[error("Unable to retrieve Messages on the next page: {0}")]
    ListNextPage(#[source] MailboxError),

    /// The full content of a message could not be retrieved
    #[error("Unable to retrieve Message Contents: {source}")]
    ContentFetch {
        /// Message that failed
        message_id: MessageId,
        /// Underlying mailbox error
        source: MailboxError,
    },

    /// An attachment payload could not be retrieved
    #[error("Unable to retrieve Attachment: {source}")]
    AttachmentFetch {
        /// Message owning the attachment
        message_id: MessageId,
        /// Original attachment filename
        filename: String,
        /// Underlying mailbox error
        source: MailboxError,
    },

    /// The attachment payload is not valid base64url
    #[error("Unable to decode Attachment {filename}: {source}")]
    Decode {
        /// Output filename
        filename: String,
        /// Decoder error
        source: base64::DecodeError,
    },

    /// The attachment could not be written to storage
    #[error("Unable to save Attachment {filename}: {source}")]
    Persist {
        /// Output filename
        filename: String,
        /// Storage error
        source: StoreError,
    },

    /// A stage task or worker panicked
    #[error("{stage} worker stopped unexpectedly: {source}")]
    WorkerFailed {
        /// Stage that lost the worker
        stage: Stage,
        /// Join error carrying the panic
        source: tokio::task::JoinError,
    },
}

impl PipelineError {
    /// Stage that produced the error
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::ListFirstPage(_) | Self::ListNextPage(_) => Stage::Lister,
            Self::ContentFetch { .. } => Stage::ContentFetcher,
            Self::AttachmentFetch { .. } => Stage::AttachmentExtractor,
            Self::Decode { .. } | Self::Persist { .. } => Stage::Sink,
            Self::WorkerFailed { stage, .. } => *stage,
        }
    }
}

/// Publishing side of the shared error channel.
///
/// The channel is unbounded so publishing never blocks a worker, and every
/// error is kept rather than only the first one.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: flume::Sender<PipelineError>,
}

impl ErrorSink {
    /// Logs and publishes an error
    pub fn publish(&self, err: PipelineError) {
        error!(stage = %err.stage(), error = %err, "Pipeline stage failed");
        if self.tx.send(err).is_err() {
            debug!("Error channel closed, dropping error");
        }
    }
}

/// Creates the shared error channel
#[must_use]
pub fn error_channel() -> (ErrorSink, flume::Receiver<PipelineError>) {
    let (tx, rx) = flume::unbounded();
    (ErrorSink { tx }, rx)
}

/// Terminal failure of a pipeline run
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineFailure {
    error: PipelineError,
    additional: Vec<PipelineError>,
    saved: Vec<PathBuf>,
}

impl PipelineFailure {
    pub(crate) const fn new(
        error: PipelineError,
        additional: Vec<PipelineError>,
        saved: Vec<PathBuf>,
    ) -> Self {
        Self {
            error,
            additional,
            saved,
        }
    }

    /// The first published error, which decided the outcome
    #[must_use]
    pub const fn error(&self) -> &PipelineError {
        &self.error
    }

    /// Errors published after the first one while the run drained
    #[must_use]
    pub fn additional(&self) -> &[PipelineError] {
        &self.additional
    }

    /// All errors in publication order
    pub fn errors(&self) -> impl Iterator<Item = &PipelineError> {
        std::iter::once(&self.error).chain(self.additional.iter())
    }

    /// Files written before the run stopped; they are left on disk
    #[must_use]
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }
}
