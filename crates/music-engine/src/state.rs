//! Observable engine state.
//!
//! The engine owns a `watch` channel; observers call `subscribe()` and drop the
//! receiver to unsubscribe. Every run is tagged with an epoch so that a run
//! which outlives a `reset()` can no longer write to the published state.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use crate::error::ErrorKind;

pub const READY_STEP: &str = "Ready";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Collecting,
    Composing,
    Synthesizing,
    Visualizing,
    Snapshotting,
    Complete,
    Error,
}

/// One pipeline step; runs strictly in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Collecting,
    Composing,
    Synthesizing,
    Visualizing,
    Snapshotting,
}

impl Stage {
    pub const ALL: [Stage; 5] =
        [Stage::Collecting, Stage::Composing, Stage::Synthesizing, Stage::Visualizing, Stage::Snapshotting];

    pub fn status(self) -> EngineStatus {
        match self {
            Stage::Collecting => EngineStatus::Collecting,
            Stage::Composing => EngineStatus::Composing,
            Stage::Synthesizing => EngineStatus::Synthesizing,
            Stage::Visualizing => EngineStatus::Visualizing,
            Stage::Snapshotting => EngineStatus::Snapshotting,
        }
    }

    pub fn step(self) -> &'static str {
        match self {
            Stage::Collecting => "Fetching chain data",
            Stage::Composing => "Composing",
            Stage::Synthesizing => "Synthesizing audio",
            Stage::Visualizing => "Rendering visuals",
            Stage::Snapshotting => "Saving NFT snapshot",
        }
    }

    /// Progress published when the stage starts and when it finishes.
    fn progress(self) -> (u8, u8) {
        match self {
            Stage::Collecting => (5, 20),
            Stage::Composing => (25, 35),
            Stage::Synthesizing => (40, 70),
            Stage::Visualizing => (75, 90),
            Stage::Snapshotting => (92, 99),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Collecting => "collecting",
            Stage::Composing => "composing",
            Stage::Synthesizing => "synthesizing",
            Stage::Visualizing => "visualizing",
            Stage::Snapshotting => "snapshotting",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub status: EngineStatus,
    pub progress: u8,
    pub current_step: String,
    pub last_error: Option<StageFailure>,
}

impl EngineState {
    pub fn ready() -> Self {
        Self { status: EngineStatus::Idle, progress: 0, current_step: READY_STEP.to_string(), last_error: None }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.status, EngineStatus::Idle | EngineStatus::Complete | EngineStatus::Error)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::ready()
    }
}

/// Write side of the state channel.
pub(crate) struct StateHandle {
    tx: watch::Sender<EngineState>,
    epoch: AtomicU64,
}

impl StateHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(EngineState::ready());
        Self { tx, epoch: AtomicU64::new(0) }
    }

    pub(crate) fn snapshot(&self) -> EngineState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.tx.subscribe()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Back to idle; invalidates every run started before this call.
    pub(crate) fn reset(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_replace(EngineState::ready());
        epoch
    }

    /// Start of a fresh run: progress restarts from zero.
    pub(crate) fn begin(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_replace(EngineState {
            status: EngineStatus::Idle,
            progress: 0,
            current_step: "Starting".to_string(),
            last_error: None,
        });
        epoch
    }

    pub(crate) fn enter(&self, epoch: u64, stage: Stage) {
        self.update(epoch, |s| {
            s.status = stage.status();
            s.progress = s.progress.max(stage.progress().0);
            s.current_step = stage.step().to_string();
            s.last_error = None;
        });
    }

    pub(crate) fn finish(&self, epoch: u64, stage: Stage) {
        self.update(epoch, |s| s.progress = s.progress.max(stage.progress().1));
    }

    pub(crate) fn fail(&self, epoch: u64, failure: StageFailure) {
        self.update(epoch, |s| {
            s.status = EngineStatus::Error;
            s.current_step = format!("Failed while {}", failure.stage);
            s.last_error = Some(failure);
        });
    }

    pub(crate) fn complete(&self, epoch: u64) {
        self.update(epoch, |s| {
            s.status = EngineStatus::Complete;
            s.progress = 100;
            s.current_step = "Complete".to_string();
            s.last_error = None;
        });
    }

    /// Apply `f` only while `epoch` is current. Returns whether it was applied.
    fn update(&self, epoch: u64, f: impl FnOnce(&mut EngineState)) -> bool {
        self.tx.send_if_modified(|s| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            f(s);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_progress_never_decreases() {
        let h = StateHandle::new();
        let epoch = h.begin();
        h.enter(epoch, Stage::Synthesizing);
        h.finish(epoch, Stage::Synthesizing);
        // resuming an earlier stage keeps the higher value
        h.enter(epoch, Stage::Composing);
        assert_eq!(h.snapshot().progress, 70);
        assert_eq!(h.snapshot().status, EngineStatus::Composing);
    }

    #[test]
    fn test_stale_epoch_cannot_write() {
        let h = StateHandle::new();
        let old = h.begin();
        h.enter(old, Stage::Collecting);
        h.reset();
        h.enter(old, Stage::Composing);
        h.complete(old);
        assert_eq!(h.snapshot(), EngineState::ready());
    }

    #[test]
    fn test_failure_is_published() {
        let h = StateHandle::new();
        let mut rx = h.subscribe();
        let epoch = h.begin();
        h.enter(epoch, Stage::Collecting);
        h.fail(epoch, StageFailure { stage: Stage::Collecting, kind: ErrorKind::Network, message: "down".into() });
        assert!(rx.has_changed().unwrap());
        let s = rx.borrow_and_update().clone();
        assert_eq!(s.status, EngineStatus::Error);
        assert_eq!(s.progress, 5);
        assert_eq!(s.last_error.unwrap().kind, ErrorKind::Network);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_value(EngineState::ready()).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "idle", "progress": 0, "currentStep": "Ready", "lastError": null }));
    }
}
