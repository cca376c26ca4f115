use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use attachment_scraper::pipeline::{
    DateZone, Pipeline, PipelineFailure, PipelineReport, SearchCriterion, StageLimits,
};
use attachment_scraper::storage::LocalDirStore;
use chrono::{TimeZone, Utc};
use mailbox_api::mock::InMemoryMailbox;
use mailbox_api::{MessageContent, MessageId, MessagePart, PartBody};
use tempfile::TempDir;

pub const SENDER: &str = "test@mail.com";

fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Message received on 2019-09-25 with one downloadable attachment per name
pub fn message(id: &str, filenames: &[&str]) -> MessageContent {
    let parts = filenames
        .iter()
        .enumerate()
        .map(|(i, filename)| MessagePart {
            part_id: (i + 1).to_string(),
            mime_type: "application/octet-stream".to_string(),
            filename: Some((*filename).to_string()),
            body: PartBody {
                attachment_id: Some(attachment_id(id, i)),
                data: None,
                size: 0,
            },
        })
        .collect();

    MessageContent {
        id: MessageId::from(id),
        internal_date: Utc.with_ymd_and_hms(2019, 9, 25, 11, 52, 25).unwrap(),
        parts,
    }
}

pub fn attachment_id(message_id: &str, index: usize) -> String {
    format!("{message_id}-att-{index}")
}

/// Registers one page of `ids`, each with a single `<id>.txt` attachment
/// holding `payload` (base64url)
pub fn mailbox_with_single_attachments(ids: &[&str], payload: &str) -> InMemoryMailbox {
    let mut mailbox = InMemoryMailbox::new().with_page(ids);
    for id in ids {
        mailbox = mailbox
            .with_message(message(id, &[&format!("{id}.txt")]))
            .with_attachment(id, &attachment_id(id, 0), payload);
    }
    mailbox
}

pub struct TestContext {
    pub mailbox: Arc<InMemoryMailbox>,
    pub output: TempDir,
    pub limits: StageLimits,
}

impl TestContext {
    pub fn new(mailbox: InMemoryMailbox) -> Result<Self> {
        setup_tracing();
        Ok(Self {
            mailbox: Arc::new(mailbox),
            output: TempDir::new()?,
            limits: StageLimits::default(),
        })
    }

    pub fn with_limits(mut self, limits: StageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Directory the store writes into; not created until the first save
    pub fn output_dir(&self) -> PathBuf {
        self.output.path().join("attachments")
    }

    pub async fn run(&self) -> Result<PipelineReport, PipelineFailure> {
        let pipeline = Pipeline::new(
            Arc::clone(&self.mailbox),
            Arc::new(LocalDirStore::new(self.output_dir())),
            self.limits,
        )
        .with_date_zone(DateZone::Utc);
        pipeline
            .run(&SearchCriterion::new(SENDER).expect("sender is not blank"))
            .await
    }

    /// Sorted names of the files in the output directory
    pub fn saved_files(&self) -> Result<Vec<String>> {
        if !self.output_dir().exists() {
            return Ok(Vec::new());
        }
        let mut names = std::fs::read_dir(self.output_dir())?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }
}
