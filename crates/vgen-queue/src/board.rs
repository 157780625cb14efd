//! Latest-status snapshot per prompt.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use vgen_models::{JobState, ProgressEvent, PromptId};

use crate::error::QueueResult;
use crate::progress::ProgressSink;

/// Keeps the most recent event for each prompt.
///
/// An event whose `seq` is not greater than the stored one is ignored, so a
/// record never moves backwards.
#[derive(Debug, Default)]
pub struct JobStatusBoard {
    entries: Mutex<HashMap<PromptId, ProgressEvent>>,
}

impl JobStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event. Returns `false` when it was stale.
    pub fn apply(&self, event: &ProgressEvent) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match entries.get(&event.prompt_id) {
            Some(current) if current.seq >= event.seq => false,
            _ => {
                entries.insert(event.prompt_id.clone(), event.clone());
                true
            }
        }
    }

    pub fn get(&self, prompt_id: &PromptId) -> Option<ProgressEvent> {
        self.entries.lock().ok()?.get(prompt_id).cloned()
    }

    pub fn state(&self, prompt_id: &PromptId) -> Option<JobState> {
        self.get(prompt_id).map(|e| e.state)
    }

    /// All snapshots, ordered by prompt id.
    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        let mut events: Vec<_> = self
            .entries
            .lock()
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        events.sort_by(|a, b| a.prompt_id.cmp(&b.prompt_id));
        events
    }

    /// Jobs currently holding a concurrency slot.
    pub fn active_count(&self) -> usize {
        self.count_where(|s| s.is_active())
    }

    pub fn terminal_count(&self) -> usize {
        self.count_where(|s| s.is_terminal())
    }

    pub fn remove(&self, prompt_id: &PromptId) -> Option<ProgressEvent> {
        self.entries.lock().ok()?.remove(prompt_id)
    }

    fn count_where(&self, pred: impl Fn(JobState) -> bool) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| pred(e.state)).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProgressSink for JobStatusBoard {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        self.apply(event);
        Ok(())
    }
}
