// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Coordination core of the xatm transaction manager.
//!
//! [`Coordinator`] owns the transaction registry, the resource proxy pool and
//! the transaction log. It consumes [`Inbound`] messages and produces
//! [`Outbound`] ones; it never blocks and performs no I/O besides log writes,
//! so the host decides how messages travel.

mod admin;
mod coordinator;
mod error;
mod log;
mod monitor;
pub mod pool;
mod remote;
pub mod transaction;

pub use coordinator::{Coordinator, Externals, Inbound, Outbound};
pub use error::StateError;
pub use log::{JsonLog, LogError, LogRecord, MemoryLog, PendingDecision, TransactionLog};
pub use pool::{Opened, Pool, Request, ResourceProxy, Scaling};
pub use transaction::{Participant, Registry, Role, Transaction};
