use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Batching,
    AiChunking,
    Deduplication,
    Complete,
}

/// One observable step of a chunking run, suitable for driving a UI or job
/// status display. Not part of the correctness contract; consumers may lag
/// or disappear without affecting the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub document_id: String,
    pub phase: ProgressPhase,
    pub batches_processed: usize,
    pub total_batches: usize,
    pub chunks_identified: usize,
}

/// Fan-out handle for progress events. A disabled reporter is a no-op, so
/// callers that do not care pay nothing.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<UnboundedSender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, UnboundedReceiver<ProgressUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn report(&self, update: ProgressUpdate) {
        debug!(
            document_id = %update.document_id,
            phase = ?update.phase,
            batches_processed = update.batches_processed,
            total_batches = update.total_batches,
            chunks_identified = update.chunks_identified,
            "pipeline progress"
        );
        if let Some(sender) = &self.sender {
            // A dropped receiver just means nobody is listening anymore.
            let _ = sender.send(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_reporter_delivers_updates_in_order() {
        let (reporter, mut receiver) = ProgressReporter::channel();
        for (index, phase) in [ProgressPhase::Batching, ProgressPhase::Complete]
            .into_iter()
            .enumerate()
        {
            reporter.report(ProgressUpdate {
                document_id: "doc-p".into(),
                phase,
                batches_processed: index,
                total_batches: 2,
                chunks_identified: 0,
            });
        }

        let first = receiver.recv().await.expect("first update");
        assert_eq!(first.phase, ProgressPhase::Batching);
        let second = receiver.recv().await.expect("second update");
        assert_eq!(second.phase, ProgressPhase::Complete);
    }

    #[test]
    fn disabled_reporter_is_a_no_op() {
        let reporter = ProgressReporter::disabled();
        reporter.report(ProgressUpdate {
            document_id: "doc-p".into(),
            phase: ProgressPhase::AiChunking,
            batches_processed: 0,
            total_batches: 1,
            chunks_identified: 0,
        });
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (reporter, receiver) = ProgressReporter::channel();
        drop(receiver);
        reporter.report(ProgressUpdate {
            document_id: "doc-p".into(),
            phase: ProgressPhase::Complete,
            batches_processed: 1,
            total_batches: 1,
            chunks_identified: 3,
        });
    }

    #[test]
    fn phases_serialize_snake_case() {
        let json = serde_json::to_string(&ProgressPhase::AiChunking).expect("serializes");
        assert_eq!(json, "\"ai_chunking\"");
    }
}
