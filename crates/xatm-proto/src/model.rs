// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared state vocabulary: participant stages, transaction phases, metrics,
//! and the read-only admin view of the coordinator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GlobalId, Pid, ResourceId, XaCode, Xid};

/// Stage of a single participant (resource, branch) within a transaction.
///
/// Declaration order matters: a transaction's stage is the minimum over its
/// participants, and the coordinator advances once that minimum reaches the
/// awaited reply stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Did work, nothing requested yet.
    Involved,
    /// Prepare sent, reply outstanding.
    PrepareRequested,
    /// Prepare answered (ok or error).
    PrepareReplied,
    /// Commit sent, reply outstanding.
    CommitRequested,
    /// Commit answered.
    CommitReplied,
    /// Rollback sent, reply outstanding.
    RollbackRequested,
    /// Rollback answered.
    RollbackReplied,
    /// Takes no further part (read-only, or never had state).
    NotInvolved,
}

/// Coordinator phase of a whole transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Participants enlisted, no outcome requested yet.
    Involved,
    /// Prepare round outstanding.
    Preparing,
    /// Commit decision logged, commit round not yet sent.
    Prepared,
    /// Commit round outstanding.
    Committing,
    /// Rollback round outstanding.
    RollingBack,
    /// Terminal; the record is about to be removed.
    Done,
}

/// Kind of request sent to a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// `xa_prepare`
    Prepare,
    /// `xa_commit`
    Commit,
    /// `xa_rollback`
    Rollback,
}

impl core::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        })
    }
}

/// Invocation count and min/max/total duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    /// Number of timed invocations.
    pub count: u64,
    /// Sum of all durations.
    pub total: Duration,
    /// Shortest invocation (zero while `count == 0`).
    pub min: Duration,
    /// Longest invocation.
    pub max: Duration,
}

impl Metric {
    /// Records one invocation.
    pub fn add(&mut self, elapsed: Duration) {
        if self.count == 0 || elapsed < self.min {
            self.min = elapsed;
        }
        if elapsed > self.max {
            self.max = elapsed;
        }
        self.total += elapsed;
        self.count += 1;
    }

    /// Folds another metric into this one.
    pub fn merge(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 || other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        self.total += other.total;
        self.count += other.count;
    }
}

/// Per-instance timing buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Time spent inside the resource manager (measured by the proxy).
    pub resource: Metric,
    /// Request-to-reply time as seen by the coordinator.
    pub roundtrip: Metric,
}

impl Metrics {
    /// Folds another set of metrics into this one.
    pub fn merge(&mut self, other: &Self) {
        self.resource.merge(&other.resource);
        self.roundtrip.merge(&other.roundtrip);
    }
}

/// Lifecycle of a resource-proxy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Not started.
    Absent,
    /// Started, not yet connected.
    Started,
    /// Connected and free.
    Idle,
    /// Serving one request.
    Busy,
    /// `xa_open` failed; never used again.
    Error,
    /// Shutting down; never used again.
    Shutdown,
}

/// Admin view of one resource-proxy instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceView {
    /// Instance process.
    pub process: Pid,
    /// Current state.
    pub state: InstanceState,
    /// Accumulated timing.
    pub metrics: Metrics,
}

/// Admin view of one resource proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyView {
    /// Resource id.
    pub id: ResourceId,
    /// Configured name.
    pub name: String,
    /// Resource-manager key.
    pub key: String,
    /// `xa_open` info.
    pub openinfo: String,
    /// `xa_close` info.
    pub closeinfo: String,
    /// Configured number of instances.
    pub concurrency: usize,
    /// False when the resource failed configuration and takes no work.
    pub available: bool,
    /// Totals for instances that no longer exist.
    pub metrics: Metrics,
    /// Live instances.
    pub instances: Vec<InstanceView>,
}

/// Admin view of one participant entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    /// Participant identity.
    pub resource: ResourceId,
    /// Branch the participant is enlisted under.
    pub branch: Xid,
    /// Current stage.
    pub stage: Stage,
    /// Last reported result.
    pub result: XaCode,
}

/// Admin view of one open transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    /// Registry key.
    pub global: GlobalId,
    /// Xid of the coordinating branch.
    pub trid: Xid,
    /// Owner (or upstream gateway in the remote role).
    pub owner: Pid,
    /// Coordinator phase.
    pub phase: Phase,
    /// True when an upstream domain drives this transaction.
    pub remote: bool,
    /// Involved participants.
    pub participants: Vec<ParticipantView>,
    /// Time since the transaction became known.
    pub age: Duration,
}

/// Admin view of a request waiting for an idle instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingView {
    /// Target resource.
    pub resource: ResourceId,
    /// Branch xid of the request.
    pub trid: Xid,
    /// Request kind.
    pub kind: RequestKind,
}

/// Admin view of a remote-domain gateway known to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalView {
    /// Assigned participant id.
    pub id: ResourceId,
    /// Gateway process.
    pub process: Pid,
}

/// Transaction log counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    /// Total durable writes.
    pub writes: u64,
    /// Commit decisions recorded.
    pub prepare: u64,
    /// Completed transactions removed.
    pub remove: u64,
    /// Hazard records kept for operators.
    pub hazard: u64,
}

/// Full admin state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReply {
    /// Resource proxies.
    pub resources: Vec<ProxyView>,
    /// Open transactions.
    pub transactions: Vec<TransactionView>,
    /// Requests queued for busy resources.
    pub pending: Vec<PendingView>,
    /// Known remote-domain gateways.
    pub externals: Vec<ExternalView>,
    /// Log counters.
    pub log: LogStats,
}
