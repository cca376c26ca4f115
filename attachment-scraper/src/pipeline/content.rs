//! Content fetcher: one fetch per identifier

use std::sync::Arc;

use mailbox_api::{ContentFetcher, MessageContent, MessageId};
use tracing::debug;

use super::error::{PipelineError, Stage};
use super::stage::{StageContext, StageHandle};

/// Starts the content fetcher stage.
///
/// Each identifier gets its own worker; a failed fetch is published and the
/// remaining fetches carry on. Delivery order downstream is unspecified.
pub fn fetch_contents<F>(
    fetcher: Arc<F>,
    ids: flume::Receiver<MessageId>,
    ctx: StageContext,
) -> StageHandle<MessageContent>
where
    F: ContentFetcher + ?Sized + 'static,
{
    let (tx, output) = ctx.channel();

    let task = tokio::spawn(async move {
        let mut fan_out = ctx.fan_out(Stage::ContentFetcher);

        while let Some(id) = ctx.next_input(&ids).await {
            let fetcher = Arc::clone(&fetcher);
            let tx = tx.clone();
            let worker_ctx = ctx.clone();
            let spawned = fan_out
                .spawn(async move {
                    match fetcher.get_content(&id).await {
                        Ok(content) => {
                            worker_ctx.counters().add_fetched();
                            debug!(message_id = %id, parts = content.parts.len(), "Fetched message");
                            if tx.send_async(content).await.is_err() {
                                debug!(message_id = %id, "Extractor closed, dropping message");
                            }
                        }
                        Err(source) => worker_ctx.errors().publish(PipelineError::ContentFetch {
                            message_id: id,
                            source,
                        }),
                    }
                })
                .await;
            if !spawned {
                break;
            }
        }

        drop(ids);
        drop(tx);
        fan_out.join().await;
    });

    StageHandle { output, task }
}
