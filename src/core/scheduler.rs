//! Delayed task scheduling.
//!
//! The orchestrator hands follow-up work (outcome checks) to a
//! [`TaskScheduler`] and never awaits it. [`TokioScheduler`] delivers due
//! tasks over a channel to whoever owns the receiving end, normally the
//! `serve` daemon's worker loop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Work to run later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum ScheduledTask {
    /// Re-evaluate the metrics of an executed intervention
    OutcomeCheck { intervention_id: Uuid },
}

/// Fire-and-forget delayed execution
pub trait TaskScheduler: Send + Sync {
    /// Queue `task` to run after `delay`.
    ///
    /// Returns `false` when the same task is already waiting and nothing new
    /// was queued.
    fn schedule(&self, task: ScheduledTask, delay: Duration) -> bool;

    /// Called once a delivered task has been handled
    fn finished(&self, _task: ScheduledTask) {}
}

/// Sleeps on a spawned tokio task, then sends the task to the worker channel.
///
/// A task stays registered from `schedule` until `finished`, so scheduling
/// the same task again in between is a no-op.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<ScheduledTask>,
    waiting: Arc<Mutex<HashSet<ScheduledTask>>>,
}

impl TokioScheduler {
    /// Create a scheduler and the receiver its due tasks arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScheduledTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tx,
            waiting: Arc::new(Mutex::new(HashSet::new())),
        };
        (scheduler, rx)
    }

    /// Tasks scheduled and not yet finished
    pub fn waiting(&self) -> usize {
        self.waiting.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl TaskScheduler for TokioScheduler {
    fn schedule(&self, task: ScheduledTask, delay: Duration) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(?task, "No tokio runtime, task not scheduled");
            return false;
        };

        if !self
            .waiting
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(task)
        {
            return false;
        }

        let tx = self.tx.clone();
        let waiting = self.waiting.clone();
        debug!(?task, delay_secs = delay.as_secs(), "Task scheduled");
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(task).is_err() {
                debug!(?task, "Worker gone, scheduled task dropped");
                waiting.lock().unwrap_or_else(|p| p.into_inner()).remove(&task);
            }
        });
        true
    }

    fn finished(&self, task: ScheduledTask) {
        self.waiting
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&task);
    }
}

/// Leaves tasks to the daemon.
///
/// Used by one-shot CLI commands: `serve` picks up unchecked executed records
/// from the database on startup and on every sweep tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredScheduler;

impl TaskScheduler for DeferredScheduler {
    fn schedule(&self, task: ScheduledTask, delay: Duration) -> bool {
        debug!(
            ?task,
            delay_secs = delay.as_secs(),
            "Task deferred to the daemon"
        );
        false
    }
}

/// Keeps every scheduled task in memory for inspection
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<(ScheduledTask, Duration)>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<(ScheduledTask, Duration)> {
        self.scheduled
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl TaskScheduler for RecordingScheduler {
    fn schedule(&self, task: ScheduledTask, delay: Duration) -> bool {
        self.scheduled
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((task, delay));
        true
    }
}
