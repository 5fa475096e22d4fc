//! Rotation plans
//!
//! A plan is a JSON file listing the containers to rotate and the rules each
//! new generation receives, in order:
//!
//! ```json
//! {
//!   "containers": [
//!     {
//!       "name": "host_ingress",
//!       "families": ["v4", "v6"],
//!       "rules": [
//!         { "spec": ["-p", "tcp", "--dport", "22", "-j", "ACCEPT"], "annotation": "ssh" },
//!         { "spec": ["-p", "ipv6-icmp", "-j", "ACCEPT"], "family": "v6" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::core::engine::RuleSpec;
use crate::core::family::{Family, MAX_SUFFIX_LEN};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

/// iptables chain names are limited to 28 characters
pub const MAX_CHAIN_NAME_LEN: usize = 28;

/// Longest container name whose generations still fit in a chain name
pub const MAX_CONTAINER_NAME_LEN: usize = MAX_CHAIN_NAME_LEN - MAX_SUFFIX_LEN;

/// Rules per container, to bound memory and engine call count
pub const MAX_RULES: usize = 10_000;

/// Error type for plan operations
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid container name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Container '{0}' appears more than once")]
    Duplicate(String),

    #[error("Container '{name}' rule {index} has an empty spec")]
    EmptyRule { name: String, index: usize },

    #[error("Container '{name}' has {count} rules (max: {max})", max = MAX_RULES)]
    TooManyRules { name: String, count: usize },

    #[error("Container '{0}' lists no families")]
    NoFamilies(String),

    #[error("Container '{name}' requests {family}, which is not enabled")]
    FamilyNotEnabled { name: String, family: Family },

    #[error("Container '{name}' rule {index} targets {family}, which the container does not rotate")]
    RuleFamilyOutside {
        name: String,
        index: usize,
        family: Family,
    },

    #[error("Plan has no containers")]
    Empty,

    #[error("I/O error reading plan: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed plan: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One rule of a plan, optionally limited to one family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedRule {
    #[serde(flatten)]
    pub rule: RuleSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<Family>,
}

/// A container and the rule set its next generation receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPlan {
    pub name: String,
    /// Families to rotate; `None` means the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub families: Option<Vec<Family>>,
    #[serde(default)]
    pub rules: Vec<PlannedRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPlan {
    pub containers: Vec<ContainerPlan>,
}

/// Validates a container name for use as an iptables chain prefix.
///
/// Constraints:
/// - ASCII alphanumerics, underscores and hyphens only
/// - At most [`MAX_CONTAINER_NAME_LEN`] characters so `<name>_live` fits
pub fn validate_container_name(name: &str) -> Result<(), PlanError> {
    let invalid = |reason: &str| PlanError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.len() > MAX_CONTAINER_NAME_LEN {
        return Err(invalid(&format!(
            "too long (max {MAX_CONTAINER_NAME_LEN} characters)"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("use only a-z, A-Z, 0-9, _ and -"));
    }
    Ok(())
}

impl RotationPlan {
    /// Checks names, rule specs and limits
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.containers.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for container in &self.containers {
            validate_container_name(&container.name)?;
            if !seen.insert(container.name.as_str()) {
                return Err(PlanError::Duplicate(container.name.clone()));
            }
            if container.families.as_ref().is_some_and(Vec::is_empty) {
                return Err(PlanError::NoFamilies(container.name.clone()));
            }
            if container.rules.len() > MAX_RULES {
                return Err(PlanError::TooManyRules {
                    name: container.name.clone(),
                    count: container.rules.len(),
                });
            }
            if let Some(index) = container.rules.iter().position(|r| r.rule.spec.is_empty()) {
                return Err(PlanError::EmptyRule {
                    name: container.name.clone(),
                    index,
                });
            }
        }
        Ok(())
    }

    /// Parses and validates a plan document
    pub fn parse(json: &str) -> Result<Self, PlanError> {
        let plan: RotationPlan = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }
}

impl ContainerPlan {
    /// Families this container rotates, given the families enabled for the run.
    ///
    /// Repeated entries collapse to the first occurrence. Every rule pinned to
    /// a family must target one of them.
    pub fn resolve_families(&self, enabled: &[Family]) -> Result<Vec<Family>, PlanError> {
        let requested = self.families.as_deref().unwrap_or(enabled);
        let mut families: Vec<Family> = Vec::with_capacity(requested.len());
        for &family in requested {
            if !enabled.contains(&family) {
                return Err(PlanError::FamilyNotEnabled {
                    name: self.name.clone(),
                    family,
                });
            }
            if !families.contains(&family) {
                families.push(family);
            }
        }
        if families.is_empty() {
            return Err(PlanError::NoFamilies(self.name.clone()));
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if let Some(family) = rule.family.filter(|f| !families.contains(f)) {
                return Err(PlanError::RuleFamilyOutside {
                    name: self.name.clone(),
                    index,
                    family,
                });
            }
        }
        Ok(families)
    }
}

/// A validated plan together with the digest of its source text
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: RotationPlan,
    pub sha256: String,
}

/// SHA-256 of a plan document, recorded in the audit log
pub fn plan_digest(json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Loads and validates a plan file.
///
/// # Async
/// Uses `tokio::fs` for non-blocking file I/O.
pub async fn load_plan(path: &Path) -> Result<LoadedPlan, PlanError> {
    let json = tokio::fs::read_to_string(path).await?;
    let plan = RotationPlan::parse(&json)?;
    tracing::debug!(
        "Loaded plan {} with {} container(s)",
        path.display(),
        plan.containers.len()
    );
    Ok(LoadedPlan {
        plan,
        sha256: plan_digest(&json),
    })
}
