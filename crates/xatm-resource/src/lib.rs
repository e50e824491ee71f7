// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource-manager side of the xatm transaction manager.
//!
//! - [`Switch`]: the XA switch contract, one `dispatch` over a closed
//!   [`Operation`] set.
//! - [`SwitchRegistry`]: switch implementations by name, as referenced by a
//!   resource property's `switch` field.
//! - [`MockupSwitch`]: scripted resource manager configured via `openinfo`.
//! - [`instance::run`]: the serial worker behind one resource proxy instance.

pub mod instance;
mod mockup;
mod switch;

pub use instance::{InstanceError, InstanceSettings};
pub use mockup::{MockupResults, MockupSwitch};
pub use switch::{Operation, Outcome, Switch, SwitchError, SwitchFactory, SwitchRegistry};
