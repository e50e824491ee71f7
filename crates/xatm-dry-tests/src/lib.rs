// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for xatm crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fixtures`] - Domain configurations and resolved resources
//! - [`harness`] - Coordinator driven by hand, with fake instances
//! - [`switch`] - Scripted XA switch that records its calls

pub mod config;
pub mod fixtures;
pub mod harness;
pub mod switch;

pub use config::InMemoryConfigStore;
pub use harness::{Harness, OWNER, TM};
pub use switch::{ScriptedSwitch, SwitchCalls};
