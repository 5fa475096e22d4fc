//! Generation-rotation protocol
//!
//! A rotation replaces the contents of `<name>_live` without a moment where
//! traffic through the jump chain `<name>` is unfiltered:
//!
//! 1. **Open**: sanity-check the inventory, bootstrap `<name>_live` if
//!    absent, create an empty `<name>_new`.
//! 2. **Populate**: append rules to `<name>_new`. The engine rejecting a
//!    rule aborts the rotation with `_live` untouched.
//! 3. **Close**: put `_new` in front of `_live`, rename `_live` → `_old`
//!    and `_new` → `_live` (jumps follow the renames), drop the jump to
//!    `_old`, then flush and delete `_old`.
//!
//! There is no automatic rollback. Every failure names the chain and the
//! phase so an operator can repair the engine by hand.

use crate::core::engine::{JumpRemoval, RuleEngine, RuleSpec};
use crate::core::error::{CloseStep, EngineError, Error, PreconditionError, Result};
use crate::core::family::{Family, Generation};
use crate::core::tracker::GenerationTracker;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Outcome of a completed rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationSummary {
    pub name: String,
    pub family: Family,
    pub rules_appended: usize,
}

/// Drives rotations against one engine instance
#[derive(Debug)]
pub struct Rotator<E> {
    engine: E,
}

impl<E: RuleEngine> Rotator<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn family(&self) -> Family {
        self.engine.family()
    }

    /// Opens a rotation of `name`.
    ///
    /// Stale `_old`/`_new` chains and a missing jump chain are rejected
    /// before the engine is modified.
    pub async fn open(&self, tracker: &mut GenerationTracker, name: &str) -> Result<()> {
        let family = self.family();
        tracker.ensure_idle(name, family)?;

        let live = Generation::Live.chain(name);
        let new = Generation::New.chain(name);
        let old = Generation::Old.chain(name);

        if !self.probe(name).await? {
            error!(container = %name, %family, "Jump chain missing");
            return Err(PreconditionError::MissingJumpChain {
                name: name.to_string(),
                family,
            }
            .into());
        }
        if self.probe(&old).await? {
            error!(chain = %old, %family, "Stale old generation found");
            return Err(PreconditionError::StaleOld { chain: old, family }.into());
        }
        if self.probe(&new).await? {
            error!(chain = %new, %family, "Stale new generation found");
            return Err(PreconditionError::StaleNew { chain: new, family }.into());
        }

        tracker.begin(name, family)?;

        if !self.probe(&live).await.inspect_err(|_| tracker.discard(name, family))? {
            info!(chain = %live, %family, "Bootstrapping empty live generation");
            if let Err(source) = self.engine.create(&live).await {
                tracker.discard(name, family);
                error!(chain = %live, %family, "Failed to create live generation: {source}");
                return Err(Error::Open {
                    family,
                    chain: live,
                    source,
                });
            }
        }

        if let Err(source) = self.engine.create(&new).await {
            tracker.discard(name, family);
            error!(chain = %new, %family, "Failed to create new generation: {source}");
            return Err(Error::Open {
                family,
                chain: new,
                source,
            });
        }

        tracker.start_populating(name, family)?;
        info!(container = %name, %family, "Rotation opened");
        Ok(())
    }

    /// Appends one rule to `<name>_new` and returns the running count.
    ///
    /// A rejected rule marks the rotation failed; it can no longer be
    /// closed, so the previous live generation keeps serving.
    pub async fn populate(
        &self,
        tracker: &mut GenerationTracker,
        name: &str,
        rule: &RuleSpec,
    ) -> Result<usize> {
        let family = self.family();
        tracker.ensure_populating(name, family)?;

        let new = Generation::New.chain(name);
        if let Err(source) = self
            .engine
            .append(&new, &rule.spec, rule.annotation.as_deref())
            .await
        {
            tracker.mark_failed(name, family);
            error!(chain = %new, %family, spec = ?rule.spec, "Rule rejected: {source}");
            return Err(Error::Populate {
                family,
                chain: new,
                source,
            });
        }

        let count = tracker.record_append(name, family)?;
        debug!(chain = %new, %family, count, "Rule appended");
        Ok(count)
    }

    /// Promotes `<name>_new` to `<name>_live` and retires the previous generation.
    pub async fn close(
        &self,
        tracker: &mut GenerationTracker,
        name: &str,
    ) -> Result<RotationSummary> {
        let family = self.family();
        tracker.ensure_populating(name, family)?;

        let live = Generation::Live.chain(name);
        let new = Generation::New.chain(name);
        let old = Generation::Old.chain(name);

        // New rules take effect immediately, ahead of the old live generation
        let result = self.engine.insert_jump_before(name, &new).await;
        check_step(tracker, name, family, CloseStep::InsertJump, name, result)?;

        let result = self.engine.rename(&live, &old).await;
        check_step(tracker, name, family, CloseStep::RetireLive, &live, result)?;

        let result = self.engine.rename(&new, &live).await;
        check_step(tracker, name, family, CloseStep::PromoteNew, &new, result)?;

        let result = self.engine.remove_jump(name, &old).await;
        if check_step(tracker, name, family, CloseStep::RemoveOldJump, name, result)?
            == JumpRemoval::NotFound
        {
            warn!(container = %name, %family, "No jump to {old} present, nothing to remove");
        }

        let result = self.engine.flush(&old).await;
        check_step(tracker, name, family, CloseStep::DeleteOld, &old, result)?;
        let result = self.engine.delete(&old).await;
        check_step(tracker, name, family, CloseStep::DeleteOld, &old, result)?;

        let rules_appended = tracker.finish(name, family)?;
        info!(container = %name, %family, rules_appended, "Rotation closed");
        Ok(RotationSummary {
            name: name.to_string(),
            family,
            rules_appended,
        })
    }

    async fn probe(&self, chain: &str) -> Result<bool> {
        self.engine
            .exists(chain)
            .await
            .map_err(|source| Error::Open {
                family: self.family(),
                chain: chain.to_string(),
                source,
            })
    }
}

fn check_step<T>(
    tracker: &mut GenerationTracker,
    name: &str,
    family: Family,
    step: CloseStep,
    chain: &str,
    result: std::result::Result<T, EngineError>,
) -> Result<T> {
    match result {
        Ok(value) => {
            debug!(container = %name, %family, %step, "Close step done");
            Ok(value)
        }
        Err(source) => {
            tracker.mark_failed(name, family);
            error!(
                container = %name,
                %family,
                %step,
                chain = %chain,
                "Close step failed: {source}"
            );
            Err(Error::Close {
                family,
                step,
                chain: chain.to_string(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::{MemoryEngine, Primitive};

    fn rotator() -> Rotator<MemoryEngine> {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_container("edge_in");
        Rotator::new(engine)
    }

    #[tokio::test]
    async fn test_open_creates_new_generation() {
        let rotator = rotator();
        let mut tracker = GenerationTracker::new();
        rotator.open(&mut tracker, "edge_in").await.unwrap();

        assert!(rotator.engine().has_chain("edge_in_new"));
        assert!(tracker.is_open("edge_in", Family::V4));
    }

    #[tokio::test]
    async fn test_open_bootstraps_missing_live() {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_chain("edge_in");
        let rotator = Rotator::new(engine);
        let mut tracker = GenerationTracker::new();

        rotator.open(&mut tracker, "edge_in").await.unwrap();
        assert!(rotator.engine().has_chain("edge_in_live"));

        rotator
            .populate(&mut tracker, "edge_in", &RuleSpec::new(["-j", "ACCEPT"]))
            .await
            .unwrap();
        let summary = rotator.close(&mut tracker, "edge_in").await.unwrap();

        // The jump chain never referenced the bootstrapped live chain; the
        // jump inserted in step 1 now points at the promoted generation
        assert_eq!(summary.rules_appended, 1);
        assert_eq!(rotator.engine().jump_targets("edge_in"), vec!["edge_in_live"]);
        assert!(!rotator.engine().has_chain("edge_in_old"));
    }

    #[tokio::test]
    async fn test_open_failure_leaves_tracker_idle() {
        let rotator = rotator();
        rotator.engine().fail_on(Primitive::Create, "edge_in_new");
        let mut tracker = GenerationTracker::new();

        let err = rotator.open(&mut tracker, "edge_in").await.unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
        assert!(!tracker.is_open("edge_in", Family::V4));
    }

    #[tokio::test]
    async fn test_populate_before_open_rejected() {
        let rotator = rotator();
        let mut tracker = GenerationTracker::new();
        let err = rotator
            .populate(&mut tracker, "edge_in", &RuleSpec::new(["-j", "DROP"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Precondition(PreconditionError::NotOpen { .. })
        ));
        assert!(rotator.engine().mutations().is_empty());
    }

    #[tokio::test]
    async fn test_close_step_failure_is_named() {
        let rotator = rotator();
        let mut tracker = GenerationTracker::new();
        rotator.open(&mut tracker, "edge_in").await.unwrap();
        rotator.engine().fail_on(Primitive::Rename, "edge_in_new");

        let err = rotator.close(&mut tracker, "edge_in").await.unwrap_err();
        match err {
            Error::Close { step, chain, .. } => {
                assert_eq!(step, CloseStep::PromoteNew);
                assert_eq!(chain, "edge_in_new");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Failed rotations stay tracked and cannot be closed again
        assert!(matches!(
            rotator.close(&mut tracker, "edge_in").await,
            Err(Error::Precondition(PreconditionError::RotationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_remove_jump_failure_is_fatal() {
        let rotator = rotator();
        let mut tracker = GenerationTracker::new();
        rotator.open(&mut tracker, "edge_in").await.unwrap();
        rotator.engine().fail_on(Primitive::RemoveJump, "edge_in");

        let err = rotator.close(&mut tracker, "edge_in").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Close {
                step: CloseStep::RemoveOldJump,
                ..
            }
        ));
        // New generation is already live
        assert_eq!(
            rotator.engine().jump_targets("edge_in"),
            vec!["edge_in_live", "edge_in_old"]
        );
    }
}
