//! Mirrors one rotation across address families
//!
//! Each family keeps its own rotation state. There is no cross-family
//! atomicity: if IPv6 rejects a rule IPv4 accepted, the IPv4 rotation stays
//! open and unpromoted, which is harmless because its `_live` never changed.

use crate::core::engine::{RuleEngine, RuleSpec};
use crate::core::error::{Error, Result};
use crate::core::family::Family;
use crate::core::rotation::{RotationSummary, Rotator};
use crate::core::tracker::GenerationTracker;

/// One [`Rotator`] per family
#[derive(Debug)]
pub struct DualStack<E> {
    rotators: Vec<Rotator<E>>,
}

impl<E: RuleEngine> DualStack<E> {
    /// Builds the coordinator; each family may appear only once.
    pub fn new(engines: impl IntoIterator<Item = E>) -> Result<Self> {
        let mut rotators: Vec<Rotator<E>> = Vec::new();
        for engine in engines {
            let family = engine.family();
            if rotators.iter().any(|r| r.family() == family) {
                return Err(Error::Internal(format!(
                    "more than one engine configured for {family}"
                )));
            }
            rotators.push(Rotator::new(engine));
        }
        Ok(Self { rotators })
    }

    /// Configured families, in the order they were given
    pub fn families(&self) -> Vec<Family> {
        self.rotators.iter().map(Rotator::family).collect()
    }

    pub fn rotator(&self, family: Family) -> Option<&Rotator<E>> {
        self.rotators.iter().find(|r| r.family() == family)
    }

    /// Rotators for `families`, in the order requested
    fn select(&self, families: &[Family]) -> Result<Vec<&Rotator<E>>> {
        families
            .iter()
            .map(|&family| {
                self.rotator(family)
                    .ok_or_else(|| Error::Internal(format!("no engine configured for {family}")))
            })
            .collect()
    }

    /// Opens `name` in each of `families`, stopping at the first failure
    pub async fn open(
        &self,
        tracker: &mut GenerationTracker,
        name: &str,
        families: &[Family],
    ) -> Result<()> {
        for rotator in self.select(families)? {
            rotator.open(tracker, name).await?;
        }
        Ok(())
    }

    /// Appends `rule` in each of `families`: one call, one engine append per family
    pub async fn populate(
        &self,
        tracker: &mut GenerationTracker,
        name: &str,
        rule: &RuleSpec,
        families: &[Family],
    ) -> Result<()> {
        for rotator in self.select(families)? {
            rotator.populate(tracker, name, rule).await?;
        }
        Ok(())
    }

    /// Closes `name` in each of `families`, one after the other
    pub async fn close(
        &self,
        tracker: &mut GenerationTracker,
        name: &str,
        families: &[Family],
    ) -> Result<Vec<RotationSummary>> {
        let rotators = self.select(families)?;
        let mut summaries = Vec::with_capacity(rotators.len());
        for rotator in rotators {
            summaries.push(rotator.close(tracker, name).await?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PreconditionError;
    use crate::core::memory::MemoryEngine;

    const BOTH: &[Family] = &[Family::V4, Family::V6];

    fn dual() -> DualStack<MemoryEngine> {
        let v4 = MemoryEngine::new(Family::V4);
        let v6 = MemoryEngine::new(Family::V6);
        v4.seed_container("edge_in");
        v6.seed_container("edge_in");
        DualStack::new([v4, v6]).unwrap()
    }

    #[test]
    fn test_duplicate_family_rejected() {
        let result = DualStack::new([MemoryEngine::new(Family::V4), MemoryEngine::new(Family::V4)]);
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_family_rejected() {
        let stack = DualStack::new([MemoryEngine::new(Family::V4)]).unwrap();
        let mut tracker = GenerationTracker::new();
        assert!(matches!(
            stack.open(&mut tracker, "edge_in", BOTH).await,
            Err(Error::Internal(_))
        ));
        assert_eq!(stack.families(), vec![Family::V4]);
    }

    #[tokio::test]
    async fn test_rule_mirrored_into_both_families() {
        let stack = dual();
        let mut tracker = GenerationTracker::new();

        stack.open(&mut tracker, "edge_in", BOTH).await.unwrap();
        stack
            .populate(
                &mut tracker,
                "edge_in",
                &RuleSpec::new(["-p", "tcp", "-j", "ACCEPT"]),
                BOTH,
            )
            .await
            .unwrap();
        let summaries = stack.close(&mut tracker, "edge_in", BOTH).await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.rules_appended == 1));
        for family in BOTH {
            let engine = stack.rotator(*family).unwrap().engine();
            assert_eq!(engine.specs("edge_in_live").len(), 1);
        }
    }

    #[tokio::test]
    async fn test_single_family_rule() {
        let stack = dual();
        let mut tracker = GenerationTracker::new();

        stack.open(&mut tracker, "edge_in", BOTH).await.unwrap();
        let icmpv6 = RuleSpec::new(["-p", "ipv6-icmp", "-j", "ACCEPT"]);
        stack
            .populate(&mut tracker, "edge_in", &icmpv6, &[Family::V6])
            .await
            .unwrap();
        let summaries = stack.close(&mut tracker, "edge_in", BOTH).await.unwrap();

        assert_eq!(summaries[0].rules_appended, 0);
        assert_eq!(summaries[1].rules_appended, 1);
    }

    #[tokio::test]
    async fn test_v6_rejection_leaves_v4_unpromoted() {
        let stack = dual();
        let v4 = stack.rotator(Family::V4).unwrap().engine();
        v4.seed_rule("edge_in_live", &["-j", "DROP"]);
        // A chain only IPv4 knows about
        v4.seed_chain("v4_only");

        let mut tracker = GenerationTracker::new();
        stack.open(&mut tracker, "edge_in", BOTH).await.unwrap();
        let err = stack
            .populate(&mut tracker, "edge_in", &RuleSpec::new(["-j", "v4_only"]), BOTH)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Populate { family: Family::V6, .. }));

        // IPv4 still open with its rule staged, live generation unchanged
        assert_eq!(tracker.state("edge_in", Family::V4).unwrap().rules_appended, 1);
        assert_eq!(
            v4.specs("edge_in_live"),
            vec![vec!["-j".to_string(), "DROP".to_string()]]
        );
        assert_eq!(v4.jump_targets("edge_in"), vec!["edge_in_live"]);

        // The failed IPv6 rotation refuses to close
        let v6_only = stack.close(&mut tracker, "edge_in", &[Family::V6]).await;
        assert!(matches!(
            v6_only,
            Err(Error::Precondition(PreconditionError::RotationFailed { family: Family::V6, .. }))
        ));
    }
}
