//! Identifier lister: search, follow pagination, then fan identifiers out

use std::collections::HashSet;
use std::sync::Arc;

use mailbox_api::{MessageId, MessageLister};
use tracing::{debug, info};

use super::criterion::SearchCriterion;
use super::error::{ErrorSink, PipelineError, Stage};
use super::stage::{StageContext, StageHandle};

/// Starts the lister stage.
///
/// Every page is drained before the first identifier is emitted; a failed
/// page discards everything accumulated so far. Identifiers are forwarded by
/// one worker each and the output closes once all of them have finished.
pub fn list_identifiers<L>(
    lister: Arc<L>,
    criterion: SearchCriterion,
    ctx: StageContext,
) -> StageHandle<MessageId>
where
    L: MessageLister + ?Sized + 'static,
{
    let (tx, output) = ctx.channel();

    let task = tokio::spawn(async move {
        let query = criterion.query();
        let Some(ids) = collect_ids(lister.as_ref(), &query, ctx.errors()).await else {
            return;
        };

        if ids.is_empty() {
            info!(%criterion, "No messages found");
            return;
        }
        info!(%criterion, count = ids.len(), "Listed messages");
        ctx.counters().add_listed(ids.len());

        let mut fan_out = ctx.fan_out(Stage::Lister);
        for id in ids {
            let tx = tx.clone();
            let spawned = fan_out
                .spawn(async move {
                    if let Err(e) = tx.send_async(id).await {
                        debug!(message_id = %e.into_inner(), "Content fetcher closed, dropping identifier");
                    }
                })
                .await;
            if !spawned {
                break;
            }
        }
        drop(tx);
        fan_out.join().await;
    });

    StageHandle { output, task }
}

/// Pages through the search results, returning every distinct identifier.
///
/// Returns `None` after publishing an error if any page request fails.
async fn collect_ids<L>(lister: &L, query: &str, errors: &ErrorSink) -> Option<Vec<MessageId>>
where
    L: MessageLister + ?Sized,
{
    let mut page = match lister.list_first_page(query).await {
        Ok(page) => page,
        Err(e) => {
            errors.publish(PipelineError::ListFirstPage(e));
            return None;
        }
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut pages = 1usize;
    loop {
        for summary in std::mem::take(&mut page.messages) {
            if seen.insert(summary.id.clone()) {
                ids.push(summary.id);
            }
        }

        let Some(token) = page.next_page().map(str::to_owned) else {
            break;
        };
        page = match lister.list_next_page(query, &token).await {
            Ok(page) => page,
            Err(e) => {
                errors.publish(PipelineError::ListNextPage(e));
                return None;
            }
        };
        pages += 1;
    }

    debug!(pages, count = ids.len(), "Drained search results");
    Some(ids)
}

#[cfg(test)]
mod tests {
    use mailbox_api::mock::InMemoryMailbox;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::pipeline::error::error_channel;
    use crate::pipeline::stage::StageLimits;

    async fn run(mailbox: InMemoryMailbox) -> (Vec<String>, Vec<PipelineError>, Arc<InMemoryMailbox>) {
        let (errors, error_rx) = error_channel();
        let ctx = StageContext::new(errors, CancellationToken::new(), StageLimits::default());
        let mailbox = Arc::new(mailbox);

        let handle = list_identifiers(
            Arc::clone(&mailbox),
            SearchCriterion::new("test@mail.com").unwrap(),
            ctx,
        );

        let mut ids = Vec::new();
        while let Ok(id) = handle.output.recv_async().await {
            ids.push(id.to_string());
        }
        handle.task.await.unwrap();
        ids.sort();

        (ids, error_rx.drain().collect(), mailbox)
    }

    #[tokio::test]
    async fn test_returns_ids_without_next_page_token() {
        let mailbox = InMemoryMailbox::new().with_page(&["16c2", "41ff9", "41hfi", "fgb", "ifgh9"]);

        let (ids, errors, mailbox) = run(mailbox).await;

        assert_eq!(ids, vec!["16c2", "41ff9", "41hfi", "fgb", "ifgh9"]);
        assert!(errors.is_empty());
        assert_eq!(mailbox.queries(), vec!["from:test@mail.com"]);
    }

    #[tokio::test]
    async fn test_returns_ids_across_pages() {
        let mailbox = InMemoryMailbox::new()
            .with_page(&["16c2", "41ff9", "41hfi", "fgb", "ifgh9"])
            .with_page(&["fgbmm"])
            .with_page(&["zz1", "zz2"]);

        let (ids, errors, mailbox) = run(mailbox).await;

        assert_eq!(
            ids,
            vec!["16c2", "41ff9", "41hfi", "fgb", "fgbmm", "ifgh9", "zz1", "zz2"]
        );
        assert!(errors.is_empty());
        assert_eq!(mailbox.queries().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_ids_across_pages_are_emitted_once() {
        let mailbox = InMemoryMailbox::new()
            .with_page(&["a", "b"])
            .with_page(&["b", "c"]);

        let (ids, errors, _) = run(mailbox).await;

        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_first_page_failure_emits_one_error_and_no_ids() {
        let mailbox = InMemoryMailbox::new().with_page(&["16c2"]).fail_first_page();

        let (ids, errors, _) = run(mailbox).await;

        assert!(ids.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], PipelineError::ListFirstPage(_)));
        assert!(errors[0]
            .to_string()
            .starts_with("Unable to retrieve Messages: "));
    }

    #[tokio::test]
    async fn test_next_page_failure_discards_accumulated_ids() {
        let mailbox = InMemoryMailbox::new()
            .with_page(&["16c2"])
            .with_page(&["41ff9"])
            .with_page(&["fgb"])
            .fail_page(2);

        let (ids, errors, _) = run(mailbox).await;

        assert!(ids.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], PipelineError::ListNextPage(_)));
        assert!(errors[0]
            .to_string()
            .starts_with("Unable to retrieve Messages on the next page: "));
    }

    #[tokio::test]
    async fn test_empty_result_closes_output_without_error() {
        let (ids, errors, _) = run(InMemoryMailbox::new()).await;

        assert!(ids.is_empty());
        assert!(errors.is_empty());
    }
}
