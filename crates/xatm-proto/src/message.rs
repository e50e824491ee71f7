// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Messages exchanged between owners, resource-proxy instances, remote-domain
//! gateways, admin tools and the coordinator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Pid, ProxyView, RequestKind, ResourceId, StateReply, XaCode, XaFlags, Xid};

/// Connection identity announcement (client → coordinator). Must be the first
/// message on a connection; messages to `process` are routed over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Process identity the connection speaks for.
    pub process: Pid,
}

/// Owner reports that `involved` resources did work under `trid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedRequest {
    /// Branch (or coordinating) xid the work was done under.
    pub trid: Xid,
    /// Owner process.
    pub process: Pid,
    /// Resources that did work.
    pub involved: Vec<ResourceId>,
}

/// Reply to [`InvolvedRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedReply {
    /// Echo of the request xid.
    pub trid: Xid,
    /// Resources that were already involved under the same branch.
    pub involved_already: Vec<ResourceId>,
}

/// A remote-domain gateway reports that it carried work for `trid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInvolved {
    /// Branch xid the remote domain was called under.
    pub trid: Xid,
    /// Gateway process; outcome requests are sent here.
    pub process: Pid,
}

/// Owner asks for the transaction to be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Coordinating xid.
    pub trid: Xid,
    /// Owner process; replies go here.
    pub process: Pid,
    /// Request flags.
    pub flags: XaFlags,
    /// Resources the caller involved without a separate involvement message.
    #[serde(default)]
    pub involved: Vec<ResourceId>,
}

/// Which round a [`CommitReply`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    /// Commit decision logged; the commit round follows.
    Prepare,
    /// Final outcome.
    Commit,
    /// Final outcome after the prepare round failed.
    Error,
}

/// Coordinator answer to [`CommitRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReply {
    /// Coordinating xid.
    pub trid: Xid,
    /// Outcome.
    pub state: XaCode,
    /// Round reported.
    pub stage: CommitStage,
}

/// Owner asks for the transaction to be rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    /// Coordinating xid.
    pub trid: Xid,
    /// Owner process; replies go here.
    pub process: Pid,
    /// Resources the caller involved without a separate involvement message.
    #[serde(default)]
    pub involved: Vec<ResourceId>,
}

/// Coordinator answer to [`RollbackRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReply {
    /// Coordinating xid.
    pub trid: Xid,
    /// Outcome.
    pub state: XaCode,
}

/// Prepare, commit or rollback request for one participant.
///
/// Sent by the coordinator to resource-proxy instances and remote-domain
/// gateways, and received by the coordinator from upstream gateways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Participant branch xid.
    pub trid: Xid,
    /// Sender; replies go here.
    pub process: Pid,
    /// Participant id as numbered by the sender.
    pub resource: ResourceId,
    /// XA flags (`ONE_PHASE` on commit).
    pub flags: XaFlags,
}

/// Reply to a [`ResourceRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReply {
    /// Participant branch xid.
    pub trid: Xid,
    /// Replying process.
    pub process: Pid,
    /// Echo of the request's participant id.
    pub resource: ResourceId,
    /// XA outcome.
    pub state: XaCode,
    /// Time spent inside the resource manager.
    #[serde(default)]
    pub elapsed: Duration,
}

/// A resource-proxy instance reports the result of `xa_open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConnect {
    /// Resource the instance serves.
    pub resource: ResourceId,
    /// Instance process.
    pub process: Pid,
    /// `xa_open` result.
    pub state: XaCode,
}

/// Resource configuration query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Resource names; empty means all.
    pub names: Vec<String>,
}

/// Configured resource as reported by lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
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
}

/// Reply to [`LookupRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupReply {
    /// Matching resources.
    pub resources: Vec<ResourceInfo>,
}

/// Why a process went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Exited with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(i32),
    /// Connection closed.
    Disconnected,
    /// A message to the process could not be delivered.
    Unreachable,
}

/// A process exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    /// Process that exited.
    pub pid: Pid,
    /// Exit reason.
    pub reason: ExitReason,
}

/// Admin request to resize a resource proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    /// Target resource.
    pub resource: ResourceId,
    /// Desired instance count.
    pub instances: usize,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable identifier (e.g. `E_RESOURCE_UNAVAILABLE`).
    pub name: String,
    /// Human readable message.
    pub message: String,
}

/// Every message carried inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    /// Connection identity (op = "hello").
    Hello(Hello),
    /// Participant involvement (op = "involved").
    Involved(InvolvedRequest),
    /// Involvement answer (op = "involved_reply").
    InvolvedReply(InvolvedReply),
    /// Remote-domain involvement (op = "external_involved").
    ExternalInvolved(ExternalInvolved),
    /// Owner commit (op = "commit").
    Commit(CommitRequest),
    /// Owner commit answer (op = "commit_reply").
    CommitReply(CommitReply),
    /// Owner rollback (op = "rollback").
    Rollback(RollbackRequest),
    /// Owner rollback answer (op = "rollback_reply").
    RollbackReply(RollbackReply),
    /// Participant prepare (op = "resource_prepare").
    ResourcePrepare(ResourceRequest),
    /// Participant prepare answer (op = "resource_prepare_reply").
    ResourcePrepareReply(ResourceReply),
    /// Participant commit (op = "resource_commit").
    ResourceCommit(ResourceRequest),
    /// Participant commit answer (op = "resource_commit_reply").
    ResourceCommitReply(ResourceReply),
    /// Participant rollback (op = "resource_rollback").
    ResourceRollback(ResourceRequest),
    /// Participant rollback answer (op = "resource_rollback_reply").
    ResourceRollbackReply(ResourceReply),
    /// Instance open result (op = "resource_connect").
    ResourceConnect(ResourceConnect),
    /// Configuration lookup (op = "lookup").
    Lookup(LookupRequest),
    /// Lookup answer (op = "lookup_reply").
    LookupReply(LookupReply),
    /// Process exit event (op = "process_exit").
    ProcessExit(ProcessExit),
    /// Admin state query (op = "state").
    State,
    /// Admin state answer (op = "state_reply").
    StateReply(Box<StateReply>),
    /// Admin resize (op = "scale").
    Scale(ScaleRequest),
    /// Resize answer (op = "scale_reply").
    ScaleReply(Vec<ProxyView>),
    /// Orderly shutdown (op = "shutdown").
    Shutdown,
    /// Protocol or processing error (op = "error").
    Error(ErrorPayload),
}

impl Message {
    /// Canonical op string for this message variant.
    pub fn op_name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::Involved(_) => "involved",
            Message::InvolvedReply(_) => "involved_reply",
            Message::ExternalInvolved(_) => "external_involved",
            Message::Commit(_) => "commit",
            Message::CommitReply(_) => "commit_reply",
            Message::Rollback(_) => "rollback",
            Message::RollbackReply(_) => "rollback_reply",
            Message::ResourcePrepare(_) => "resource_prepare",
            Message::ResourcePrepareReply(_) => "resource_prepare_reply",
            Message::ResourceCommit(_) => "resource_commit",
            Message::ResourceCommitReply(_) => "resource_commit_reply",
            Message::ResourceRollback(_) => "resource_rollback",
            Message::ResourceRollbackReply(_) => "resource_rollback_reply",
            Message::ResourceConnect(_) => "resource_connect",
            Message::Lookup(_) => "lookup",
            Message::LookupReply(_) => "lookup_reply",
            Message::ProcessExit(_) => "process_exit",
            Message::State => "state",
            Message::StateReply(_) => "state_reply",
            Message::Scale(_) => "scale",
            Message::ScaleReply(_) => "scale_reply",
            Message::Shutdown => "shutdown",
            Message::Error(_) => "error",
        }
    }

    /// Wraps a participant request of the given kind.
    pub fn resource_request(kind: RequestKind, request: ResourceRequest) -> Self {
        match kind {
            RequestKind::Prepare => Message::ResourcePrepare(request),
            RequestKind::Commit => Message::ResourceCommit(request),
            RequestKind::Rollback => Message::ResourceRollback(request),
        }
    }

    /// Wraps a participant reply of the given kind.
    pub fn resource_reply(kind: RequestKind, reply: ResourceReply) -> Self {
        match kind {
            RequestKind::Prepare => Message::ResourcePrepareReply(reply),
            RequestKind::Commit => Message::ResourceCommitReply(reply),
            RequestKind::Rollback => Message::ResourceRollbackReply(reply),
        }
    }

    /// Splits a participant request into its kind and body.
    pub fn as_resource_request(&self) -> Option<(RequestKind, &ResourceRequest)> {
        match self {
            Message::ResourcePrepare(r) => Some((RequestKind::Prepare, r)),
            Message::ResourceCommit(r) => Some((RequestKind::Commit, r)),
            Message::ResourceRollback(r) => Some((RequestKind::Rollback, r)),
            _ => None,
        }
    }

    /// Builds an error message.
    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Message::Error(ErrorPayload {
            name: name.to_string(),
            message: message.into(),
        })
    }
}
