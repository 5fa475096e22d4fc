//! Core chain rotation functionality
//!
//! This module contains the rotation protocol and everything it talks to.
//! It provides:
//!
//! - [`engine`]: The rule-engine adapter contract
//! - [`iptables`]: Adapter driving `iptables`/`ip6tables`
//! - [`memory`]: Stateful in-memory engine for tests and dry runs
//! - [`tracker`]: Per-process bookkeeping of open rotations
//! - [`rotation`]: The open/populate/close protocol
//! - [`dual_stack`]: One rotation mirrored across IPv4 and IPv6
//! - [`plan`] and [`runner`]: Plan files and their execution
//! - [`inventory`]: Read-only view of a container's generations
//! - [`error`]: Error types for rotation operations

pub mod dual_stack;
pub mod engine;
pub mod error;
pub mod family;
pub mod inventory;
pub mod iptables;
pub mod memory;
pub mod plan;
pub mod rotation;
pub mod runner;
pub mod tracker;

#[cfg(test)]
pub mod test_helpers;
