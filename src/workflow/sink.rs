//! Run and NodeRun snapshot sinks
//!
//! The runner reports progress by handing snapshots to a [`RunSink`]. Sinks
//! are fire-and-forget: they must not block and must not panic.

use super::record::{NodeRun, Run};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Receives updated snapshots as a run progresses
pub trait RunSink: Send + Sync {
    fn on_run_upsert(&self, run: &Run);
    fn on_node_run_upsert(&self, node_run: &NodeRun);
}

impl<S: RunSink + ?Sized> RunSink for Arc<S> {
    fn on_run_upsert(&self, run: &Run) {
        (**self).on_run_upsert(run)
    }

    fn on_node_run_upsert(&self, node_run: &NodeRun) {
        (**self).on_node_run_upsert(node_run)
    }
}

/// A snapshot as it was published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "camelCase")]
pub enum RunEvent {
    Run(Run),
    NodeRun(NodeRun),
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl RunSink for NoopSink {
    fn on_run_upsert(&self, _run: &Run) {}
    fn on_node_run_upsert(&self, _node_run: &NodeRun) {}
}

/// Forwards snapshots into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl RunSink for ChannelSink {
    fn on_run_upsert(&self, run: &Run) {
        let _ = self.sender.send(RunEvent::Run(run.clone()));
    }

    fn on_node_run_upsert(&self, node_run: &NodeRun) {
        let _ = self.sender.send(RunEvent::NodeRun(node_run.clone()));
    }
}

#[derive(Debug, Default)]
struct Snapshots {
    events: Vec<RunEvent>,
    runs: HashMap<String, Run>,
    node_runs: HashMap<String, NodeRun>,
    node_order: Vec<String>,
}

/// In-memory registry keeping the last snapshot per id
///
/// Also records every published event in order, which makes it handy for
/// replaying a run or asserting on the exact publication sequence.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    inner: Mutex<Snapshots>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshots> {
        // a poisoned store still holds consistent snapshots
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every event, in publication order
    pub fn events(&self) -> Vec<RunEvent> {
        self.lock().events.clone()
    }

    /// Latest snapshot of a run
    pub fn run(&self, run_id: &str) -> Option<Run> {
        self.lock().runs.get(run_id).cloned()
    }

    /// Latest snapshot of every NodeRun of a run, in creation order
    pub fn node_runs(&self, run_id: &str) -> Vec<NodeRun> {
        let snapshots = self.lock();
        snapshots
            .node_order
            .iter()
            .filter_map(|id| snapshots.node_runs.get(id))
            .filter(|n| n.run_id == run_id)
            .cloned()
            .collect()
    }

    /// All Run snapshots published for a run, oldest first
    pub fn run_history(&self, run_id: &str) -> Vec<Run> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Run(run) if run.id == run_id => Some(run.clone()),
                _ => None,
            })
            .collect()
    }
}

impl RunSink for SnapshotStore {
    fn on_run_upsert(&self, run: &Run) {
        let mut snapshots = self.lock();
        snapshots.events.push(RunEvent::Run(run.clone()));
        snapshots.runs.insert(run.id.clone(), run.clone());
    }

    fn on_node_run_upsert(&self, node_run: &NodeRun) {
        let mut snapshots = self.lock();
        snapshots.events.push(RunEvent::NodeRun(node_run.clone()));
        if !snapshots.node_runs.contains_key(&node_run.id) {
            snapshots.node_order.push(node_run.id.clone());
        }
        snapshots
            .node_runs
            .insert(node_run.id.clone(), node_run.clone());
    }
}
