//! Progress sink contract and in-process sinks.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::warn;

use vgen_models::{ProgressEvent, PromptId};

use crate::error::QueueResult;

/// Default buffer for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Destination for job state transitions.
///
/// Callers treat a publish error as non-fatal: it is logged and the job
/// continues.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn publish(&self, _event: &ProgressEvent) -> QueueResult<()> {
        Ok(())
    }
}

/// In-process broadcast feed.
///
/// A slow subscriber that falls more than the channel capacity behind skips
/// the oldest events; order within what it does receive is preserved.
#[derive(Debug, Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event from every job.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Stream of events for one prompt only.
    pub fn subscribe_job(&self, prompt_id: &PromptId) -> BoxStream<'static, ProgressEvent> {
        let receiver = self.sender.subscribe();
        let prompt_id = prompt_id.clone();

        stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Progress subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| {
            let keep = event.prompt_id == prompt_id;
            async move { keep }
        })
        .boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastProgress {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl ProgressSink for BroadcastProgress {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Publishes each event to every inner sink.
///
/// A failing sink is logged and does not stop delivery to the others.
#[derive(Clone, Default)]
pub struct FanoutProgress {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl ProgressSink for FanoutProgress {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event).await {
                warn!(
                    prompt_id = %event.prompt_id,
                    seq = event.seq,
                    error = %e,
                    "Progress sink failed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use vgen_models::JobState;

    struct FailingSink;

    #[async_trait]
    impl ProgressSink for FailingSink {
        async fn publish(&self, _event: &ProgressEvent) -> QueueResult<()> {
            Err(QueueError::publish_failed("down"))
        }
    }

    #[tokio::test]
    async fn test_subscribe_job_filters_other_prompts() {
        let feed = BroadcastProgress::new(16);
        let a = PromptId::from_string("a");
        let b = PromptId::from_string("b");
        let mut stream = feed.subscribe_job(&a);

        feed.publish(&ProgressEvent::new(b.clone(), 1, JobState::CheckingCache))
            .await
            .unwrap();
        feed.publish(&ProgressEvent::new(a.clone(), 1, JobState::CheckingCache))
            .await
            .unwrap();
        feed.publish(&ProgressEvent::new(a.clone(), 2, JobState::Completed))
            .await
            .unwrap();

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.prompt_id, a);
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(second.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let feed = BroadcastProgress::default();
        let event = ProgressEvent::new(PromptId::new(), 1, JobState::CheckingCache);
        assert!(feed.publish(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_fanout_continues_past_failing_sink() {
        let feed = BroadcastProgress::new(16);
        let mut rx = feed.subscribe();
        let fanout = FanoutProgress::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(Arc::new(feed.clone()));

        let event = ProgressEvent::new(PromptId::from_string("p"), 1, JobState::Waiting);
        fanout.publish(&event).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(fanout.len(), 2);
    }
}
