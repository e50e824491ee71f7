// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for the xatm transaction manager: transaction identifiers, XA
//! codes and flags, every message the coordinator consumes or emits, and the
//! checksummed packet framing they travel in.

mod code;
mod flag;
mod ident;
mod message;
mod model;
pub mod wire;
mod xid;

use std::path::PathBuf;

pub use code::{ParseCodeError, XaCode};
pub use flag::XaFlags;
pub use ident::{Pid, ResourceId};
pub use message::{
    CommitReply, CommitRequest, CommitStage, ErrorPayload, ExitReason, ExternalInvolved, Hello,
    InvolvedReply, InvolvedRequest, LookupReply, LookupRequest, Message, ProcessExit,
    ResourceConnect, ResourceInfo, ResourceReply, ResourceRequest, RollbackReply,
    RollbackRequest, ScaleRequest,
};
pub use model::{
    ExternalView, InstanceState, InstanceView, LogStats, Metric, Metrics, ParticipantView,
    PendingView, Phase, ProxyView, RequestKind, Stage, StateReply, TransactionView,
};
pub use wire::{Envelope, ProtoError};
pub use xid::{GlobalId, Xid, XidError, MAX_BQUAL_SIZE, MAX_GTRID_SIZE, NULL_FORMAT, XATM_FORMAT};

/// Default Unix socket path for the coordinator.
///
/// Prefers a per-user runtime dir (XDG_RUNTIME_DIR) and falls back to `/tmp`
/// when unavailable.
pub fn default_socket_path() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    base.join("xatm.sock")
}
