//! Executes a rotation plan against a [`DualStack`]
//!
//! Containers rotate in plan order. Family scoping is resolved for the whole
//! plan before the first engine call, so a misconfigured plan never leaves a
//! half-applied run behind. After that the first failure aborts the run.

use crate::audit::{AuditLog, RunContext};
use crate::core::dual_stack::DualStack;
use crate::core::engine::RuleEngine;
use crate::core::error::Result;
use crate::core::family::Family;
use crate::core::memory::MemoryEngine;
use crate::core::plan::{ContainerPlan, LoadedPlan, RotationPlan};
use crate::core::rotation::RotationSummary;
use crate::core::tracker::GenerationTracker;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

/// Result of a completed plan run
#[derive(Debug, Clone, Serialize)]
pub struct PlanRun {
    pub run_id: Uuid,
    /// One entry per (container, family), in execution order
    pub summaries: Vec<RotationSummary>,
}

/// Runs every container of `loaded` through open, populate and close.
///
/// `enabled` lists the families this run may touch; containers without their
/// own family list rotate all of them.
pub async fn execute_plan<E: RuleEngine>(
    stack: &DualStack<E>,
    loaded: &LoadedPlan,
    enabled: &[Family],
    audit: Option<&AuditLog>,
) -> Result<PlanRun> {
    let resolved = loaded
        .plan
        .containers
        .iter()
        .map(|c| c.resolve_families(enabled).map(|families| (c, families)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let run_id = Uuid::new_v4();
    let ctx = RunContext {
        run_id,
        plan_sha256: Some(&loaded.sha256),
    };
    info!(%run_id, sha256 = %loaded.sha256, containers = resolved.len(), "Executing plan");

    let mut tracker = GenerationTracker::new();
    let mut summaries = Vec::new();
    for (container, families) in resolved {
        match rotate_container(stack, &mut tracker, container, &families, ctx, audit).await {
            Ok(done) => {
                if let Some(audit) = audit {
                    for summary in &done {
                        audit
                            .log_close(ctx, &summary.name, summary.family, summary.rules_appended)
                            .await;
                    }
                }
                summaries.extend(done);
            }
            Err(e) => {
                error!(%run_id, container = %container.name, "Plan aborted: {e}");
                if let Some(audit) = audit {
                    audit.log_failure(ctx, &container.name, e.to_string()).await;
                }
                return Err(e);
            }
        }
    }

    info!(%run_id, rotations = summaries.len(), "Plan complete");
    Ok(PlanRun { run_id, summaries })
}

async fn rotate_container<E: RuleEngine>(
    stack: &DualStack<E>,
    tracker: &mut GenerationTracker,
    container: &ContainerPlan,
    families: &[Family],
    ctx: RunContext<'_>,
    audit: Option<&AuditLog>,
) -> Result<Vec<RotationSummary>> {
    let name = container.name.as_str();
    stack.open(tracker, name, families).await?;
    if let Some(audit) = audit {
        audit.log_open(ctx, name, families).await;
    }

    for planned in &container.rules {
        let targets = planned
            .family
            .map_or_else(|| families.to_vec(), |family| vec![family]);
        stack.populate(tracker, name, &planned.rule, &targets).await?;
    }

    stack.close(tracker, name, families).await
}

/// In-memory stack mirroring a steady system for `plan`: every container has
/// its jump chain and live generation, nothing else. Rule targets are not
/// resolved, so extension targets and chains outside the plan pass.
pub fn rehearsal_stack(
    plan: &RotationPlan,
    families: &[Family],
) -> Result<DualStack<MemoryEngine>> {
    let engines = families.iter().map(|&family| {
        let engine = MemoryEngine::permissive(family);
        for container in &plan.containers {
            engine.seed_container(&container.name);
        }
        engine
    });
    DualStack::new(engines.collect::<Vec<_>>())
}
