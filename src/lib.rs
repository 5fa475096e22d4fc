//! chainrot - generational chain rotation for iptables
//!
//! Replaces the rules of an iptables/ip6tables chain without a moment where
//! traffic through it is unfiltered.
//!
//! # Architecture
//!
//! - [`core`] - Rotation protocol, engine adapters, plans
//! - [`audit`] - Audit logging of every rotation
//! - [`elevation`] - Privilege escalation for the engine binaries
//! - [`config`] - Configuration persistence
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Protocol
//!
//! Each managed container `<name>` owns three generations, `<name>_live`,
//! `<name>_new` and `<name>_old`, reached from a jump chain the caller owns.
//! A rotation fills `_new`, puts it in front of `_live`, renames `_live` to
//! `_old` and `_new` to `_live`, then removes `_old`.

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;

// Re-export commonly used types
pub use core::dual_stack::DualStack;
pub use core::engine::{JumpRemoval, RuleEngine, RuleSpec};
pub use core::error::{Error, Result};
pub use core::family::{Family, Generation};
pub use core::rotation::{RotationSummary, Rotator};
pub use core::tracker::GenerationTracker;
