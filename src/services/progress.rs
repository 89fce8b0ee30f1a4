//! Per-job publish/subscribe channel for generation progress.
//!
//! [`ProgressHub`] fans each published [`ProgressEvent`] out to the
//! subscribers of that event's job. Nothing is buffered for late
//! subscribers: a subscription only sees events published after it was
//! created. Publishing happens under the hub lock, so one job's events
//! reach every subscriber in publish order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::job::JobResult;

/// Event pushed to job subscribers, serialized as `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ProgressEvent {
    #[serde(rename = "job:progress", rename_all = "camelCase")]
    Progress {
        job_id: Uuid,
        stage: String,
        progress: u8,
    },

    #[serde(rename = "creative:generated", rename_all = "camelCase")]
    Generated { job_id: Uuid, result: JobResult },

    #[serde(rename = "creative:failed", rename_all = "camelCase")]
    Failed { job_id: Uuid, error: String },

    #[serde(rename = "job:cancelled", rename_all = "camelCase")]
    Cancelled { job_id: Uuid },
}

impl ProgressEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Progress { job_id, .. }
            | Self::Generated { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Receiving end of a job subscription.
pub struct Subscription {
    pub id: u64,
    pub job_id: Uuid,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    /// Next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<Uuid, Vec<Subscriber>>,
    /// Highest percentage published per live job.
    last_progress: HashMap<Uuid, u8>,
    taps: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    /// Jobs whose terminal event went out; later events for them are dropped.
    finished: HashSet<Uuid>,
    finished_order: VecDeque<Uuid>,
}

/// How many finished job ids the hub remembers.
const FINISHED_CAPACITY: usize = 10_000;

impl HubState {
    fn mark_finished(&mut self, job_id: Uuid) {
        self.last_progress.remove(&job_id);
        if self.finished.insert(job_id) {
            self.finished_order.push_back(job_id);
            while self.finished_order.len() > FINISHED_CAPACITY {
                if let Some(oldest) = self.finished_order.pop_front() {
                    self.finished.remove(&oldest);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct ProgressHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one job's events from now on.
    pub fn subscribe(&self, job_id: Uuid) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state
            .subscribers
            .entry(job_id)
            .or_default()
            .push(Subscriber { id, tx });
        Subscription { id, job_id, rx }
    }

    /// Receive every event the hub publishes, for relaying to other processes.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().taps.push(tx);
        rx
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, job_id: Uuid, subscription_id: u64) -> bool {
        let mut state = self.lock();
        let Some(subs) = state.subscribers.get_mut(&job_id) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != subscription_id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            state.subscribers.remove(&job_id);
        }
        removed
    }

    /// Deliver an event to the current subscribers of its job.
    ///
    /// Progress percentages are clamped so they never go backwards for a
    /// job. A terminal event closes the job's bookkeeping, and anything
    /// published for that job afterwards is dropped.
    pub fn publish(&self, event: ProgressEvent) {
        self.deliver(event, true);
    }

    /// Deliver an event that arrived from another process. Taps are
    /// skipped so it is not relayed back out.
    pub fn publish_relayed(&self, event: ProgressEvent) {
        self.deliver(event, false);
    }

    fn deliver(&self, mut event: ProgressEvent, to_taps: bool) {
        let job_id = event.job_id();
        let mut state = self.lock();

        if state.finished.contains(&job_id) {
            tracing::debug!(job_id = %job_id, "Dropping event for finished job");
            return;
        }

        if let ProgressEvent::Progress { progress, .. } = &mut event {
            let last = state.last_progress.entry(job_id).or_insert(0);
            *progress = (*progress).clamp(*last, 100);
            *last = *progress;
        }

        if to_taps {
            state.taps.retain(|tap| tap.send(event.clone()).is_ok());
        }

        if let Some(subs) = state.subscribers.get_mut(&job_id) {
            subs.retain(|s| s.tx.send(event.clone()).is_ok());
            if subs.is_empty() {
                state.subscribers.remove(&job_id);
            }
        }

        if event.is_terminal() {
            state.mark_finished(job_id);
        }
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.lock().subscribers.get(&job_id).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        // State stays consistent between statements, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
