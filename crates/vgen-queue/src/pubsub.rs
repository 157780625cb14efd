//! Progress events via Redis Pub/Sub.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use tracing::debug;

use vgen_models::{ProgressEvent, PromptId};

use crate::error::QueueResult;
use crate::progress::ProgressSink;

/// Publishes progress events to `vgen:progress:<prompt_id>`.
#[derive(Debug, Clone)]
pub struct RedisProgress {
    client: redis::Client,
}

impl RedisProgress {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Channel name for a prompt.
    pub fn channel_name(prompt_id: &PromptId) -> String {
        format!("vgen:progress:{}", prompt_id)
    }

    /// Subscribe to progress events for a prompt.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        prompt_id: &PromptId,
    ) -> QueueResult<Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(prompt_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ProgressSink for RedisProgress {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.prompt_id);
        let payload = serde_json::to_string(event)?;

        debug!(channel = %channel, seq = event.seq, "Publishing progress event");
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }
}
