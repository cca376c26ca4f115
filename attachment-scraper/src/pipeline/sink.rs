//! Sink: decode each attachment and hand it to the store

use std::path::PathBuf;
use std::sync::Arc;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tokio::task::JoinHandle;
use tracing::debug;

use super::error::{PipelineError, Stage};
use super::extractor::AttachmentRecord;
use super::stage::StageContext;
use crate::storage::AttachmentStore;

/// base64url with padding optional, as payloads arrive both ways
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes a base64url attachment payload
///
/// # Errors
///
/// Returns the decoder error if `data` is not valid base64url
pub fn decode_payload(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    PAYLOAD_ENGINE.decode(data)
}

/// Starts the sink.
///
/// Every record is decoded and persisted by its own worker. The returned task
/// resolves to the paths written once the input closes and all workers have
/// finished.
pub fn persist_attachments<S>(
    store: Arc<S>,
    records: flume::Receiver<AttachmentRecord>,
    ctx: StageContext,
) -> JoinHandle<Vec<PathBuf>>
where
    S: AttachmentStore + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut fan_out = ctx.fan_out(Stage::Sink);

        while let Some(record) = ctx.next_input(&records).await {
            let store = Arc::clone(&store);
            let worker_ctx = ctx.clone();
            let spawned = fan_out
                .spawn(async move { persist_record(store.as_ref(), record, &worker_ctx).await })
                .await;
            if !spawned {
                break;
            }
        }

        drop(records);
        fan_out.join().await.into_iter().flatten().collect()
    })
}

async fn persist_record<S>(store: &S, record: AttachmentRecord, ctx: &StageContext) -> Option<PathBuf>
where
    S: AttachmentStore + ?Sized,
{
    let bytes = match decode_payload(&record.data) {
        Ok(bytes) => bytes,
        Err(source) => {
            ctx.errors().publish(PipelineError::Decode {
                filename: record.filename,
                source,
            });
            return None;
        }
    };

    match store.persist(&record.filename, &bytes).await {
        Ok(path) => {
            debug!(message_id = %record.message_id, path = %path.display(), "Persisted attachment");
            Some(path)
        }
        Err(source) => {
            ctx.errors().publish(PipelineError::Persist {
                filename: record.filename,
                source,
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use mailbox_api::MessageId;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::pipeline::error::error_channel;
    use crate::pipeline::stage::StageLimits;
    use crate::storage::LocalDirStore;

    fn record(filename: &str, data: &str) -> AttachmentRecord {
        AttachmentRecord {
            message_id: MessageId::from("m1"),
            filename: filename.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_decode_accepts_url_safe_alphabet_with_or_without_padding() {
        assert_eq!(decode_payload("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_payload("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_payload("aGVsbG8").unwrap(), b"hello");
        assert!(decode_payload("a+b/").is_err());
    }

    #[tokio::test]
    async fn test_records_are_decoded_and_written() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalDirStore::new(dir.path()));
        let (errors, error_rx) = error_channel();
        let ctx = StageContext::new(errors, CancellationToken::new(), StageLimits::default());

        let (tx, rx) = flume::unbounded();
        tx.send(record("Sep-25-2019-a.bin", "AAEC_w")).unwrap();
        tx.send(record("Sep-25-2019-b.txt", "aGVsbG8=")).unwrap();
        tx.send(record("Sep-25-2019-bad.txt", "***")).unwrap();
        drop(tx);

        let mut saved = persist_attachments(store, rx, ctx).await.unwrap();
        saved.sort();

        assert_eq!(
            saved,
            vec![
                dir.path().join("Sep-25-2019-a.bin"),
                dir.path().join("Sep-25-2019-b.txt"),
            ]
        );
        assert_eq!(std::fs::read(&saved[0]).unwrap(), vec![0x00, 0x01, 0x02, 0xff]);
        assert_eq!(std::fs::read(&saved[1]).unwrap(), b"hello");

        let errors: Vec<PipelineError> = error_rx.drain().collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], PipelineError::Decode { filename, .. } if filename == "Sep-25-2019-bad.txt"));
        assert!(!dir.path().join("Sep-25-2019-bad.txt").exists());
    }
}
