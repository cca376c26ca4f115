//! Four-stage fetch pipeline
//!
//! ```text
//! lister -> content fetcher -> attachment extractor -> sink
//! ```
//!
//! Stages are connected by bounded channels and publish failures on one
//! shared error channel. [`Pipeline::run`] waits for whichever comes first:
//! an error or the sink finishing.

mod content;
mod criterion;
mod error;
mod extractor;
mod lister;
mod sink;
mod stage;

use std::path::PathBuf;
use std::sync::Arc;

use mailbox_api::Mailbox;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use content::fetch_contents;
pub use criterion::{EmptyCriterion, SearchCriterion};
pub use error::{error_channel, ErrorSink, PipelineError, PipelineFailure, Stage};
pub use extractor::{extract_attachments, output_filename, AttachmentRecord, DateZone};
pub use lister::list_identifiers;
pub use sink::{decode_payload, persist_attachments};
pub use stage::{StageContext, StageCounters, StageHandle, StageLimits};

use crate::storage::AttachmentStore;

/// Outcome of a run in which no stage failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Distinct message identifiers returned by the search
    pub listed: usize,
    /// Messages whose content was retrieved
    pub fetched: usize,
    /// Attachments downloaded
    pub extracted: usize,
    /// Files written, in completion order
    pub saved: Vec<PathBuf>,
}

/// Wires the stages together over one mailbox and one store
#[derive(Debug)]
pub struct Pipeline<M: ?Sized, S: ?Sized> {
    mailbox: Arc<M>,
    store: Arc<S>,
    limits: StageLimits,
    date_zone: DateZone,
}

impl<M, S> Pipeline<M, S>
where
    M: Mailbox + ?Sized + 'static,
    S: AttachmentStore + ?Sized + 'static,
{
    #[must_use]
    pub const fn new(mailbox: Arc<M>, store: Arc<S>, limits: StageLimits) -> Self {
        Self {
            mailbox,
            store,
            limits,
            date_zone: DateZone::Local,
        }
    }

    /// Reads receipt dates in `zone` instead of the host's local zone
    #[must_use]
    pub const fn with_date_zone(mut self, zone: DateZone) -> Self {
        self.date_zone = zone;
        self
    }

    /// Scrapes every attachment sent by `criterion` into the store.
    ///
    /// The first published error stops the run: stages stop admitting new
    /// items, in-flight work finishes, and every stage is awaited before
    /// returning. Files written before that point are left in place.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineFailure` holding the first error and any that
    /// followed while the run drained.
    #[instrument(skip_all, fields(criterion = %criterion))]
    pub async fn run(&self, criterion: &SearchCriterion) -> Result<PipelineReport, PipelineFailure> {
        let (errors, error_rx) = error_channel();
        let shutdown = CancellationToken::new();
        let ctx = StageContext::new(errors, shutdown.clone(), self.limits);

        let lister = list_identifiers(Arc::clone(&self.mailbox), criterion.clone(), ctx.clone());
        let contents = fetch_contents(Arc::clone(&self.mailbox), lister.output, ctx.clone());
        let records = extract_attachments(
            Arc::clone(&self.mailbox),
            contents.output,
            self.date_zone,
            ctx.clone(),
        );
        let mut sink = persist_attachments(Arc::clone(&self.store), records.output, ctx.clone());

        let mut first_error = None;
        let sink_result = tokio::select! {
            biased;
            Ok(err) = error_rx.recv_async() => {
                warn!(stage = %err.stage(), "Stopping pipeline after first error");
                shutdown.cancel();
                first_error = Some(err);
                (&mut sink).await
            }
            joined = &mut sink => joined,
        };

        let saved = match sink_result {
            Ok(saved) => saved,
            Err(source) => {
                shutdown.cancel();
                ctx.errors().publish(PipelineError::WorkerFailed {
                    stage: Stage::Sink,
                    source,
                });
                Vec::new()
            }
        };

        await_stage(Stage::Lister, lister.task, &ctx).await;
        await_stage(Stage::ContentFetcher, contents.task, &ctx).await;
        await_stage(Stage::AttachmentExtractor, records.task, &ctx).await;

        let counters = ctx.counters();
        let mut errors = first_error.into_iter().chain(error_rx.drain());
        if let Some(error) = errors.next() {
            let failure = PipelineFailure::new(error, errors.collect(), saved);
            warn!(
                errors = failure.additional().len() + 1,
                saved = failure.saved().len(),
                "Pipeline failed"
            );
            return Err(failure);
        }

        let report = PipelineReport {
            listed: counters.listed(),
            fetched: counters.fetched(),
            extracted: counters.extracted(),
            saved,
        };
        info!(
            listed = report.listed,
            fetched = report.fetched,
            extracted = report.extracted,
            saved = report.saved.len(),
            "Pipeline finished"
        );
        Ok(report)
    }
}

async fn await_stage(stage: Stage, task: JoinHandle<()>, ctx: &StageContext) {
    if let Err(source) = task.await {
        ctx.errors()
            .publish(PipelineError::WorkerFailed { stage, source });
    }
}
