//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::dual_stack::DualStack;
use crate::core::engine::RuleSpec;
use crate::core::error::Result;
use crate::core::family::Family;
use crate::core::memory::MemoryEngine;
use crate::core::rotation::{RotationSummary, Rotator};
use crate::core::tracker::GenerationTracker;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when your test needs to:
/// 1. Temporarily change env vars to different values
/// 2. Restore env vars after the test
/// 3. Test behavior when env vars are absent
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("CHAINROT_IPTABLES_COMMAND", "/opt/iptables");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("CHAINROT_IPTABLES_COMMAND");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Rule spec from string literals
pub fn rule(spec: &[&str]) -> RuleSpec {
    RuleSpec::new(spec.iter().copied())
}

/// In-memory engine where every container in `names` is steady
pub fn seeded_engine(family: Family, names: &[&str]) -> MemoryEngine {
    let engine = MemoryEngine::new(family);
    for name in names {
        engine.seed_container(name);
    }
    engine
}

/// IPv4 + IPv6 stack where every container in `names` is steady
pub fn seeded_stack(names: &[&str]) -> DualStack<MemoryEngine> {
    let engines = Family::all()
        .into_iter()
        .map(|family| seeded_engine(family, names))
        .collect::<Vec<_>>();
    DualStack::new(engines).unwrap()
}

/// Runs one complete open → populate → close cycle
pub async fn rotate(
    rotator: &Rotator<MemoryEngine>,
    tracker: &mut GenerationTracker,
    name: &str,
    rules: &[RuleSpec],
) -> Result<RotationSummary> {
    rotator.open(tracker, name).await?;
    for spec in rules {
        rotator.populate(tracker, name, spec).await?;
    }
    rotator.close(tracker, name).await
}
