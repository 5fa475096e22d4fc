//! Stateful in-memory rule engine
//!
//! Implements the [`RuleEngine`] contract the way iptables does: renames
//! retarget every jump to the renamed chain, deleting a referenced or
//! non-empty chain fails, and jumps to unknown targets are rejected on
//! append. Used by the test suites and by `chainrot apply --dry-run`.
//!
//! Failures can be injected per primitive and chain with
//! [`MemoryEngine::fail_on`]. [`MemoryEngine::permissive`] builds an engine
//! that accepts any named target, for rehearsing plans whose rules use
//! extension targets or chains it does not hold.

use crate::core::engine::{JumpRemoval, RuleEngine, truncate_annotation};
use crate::core::error::EngineError;
use crate::core::family::{Family, Generation};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use strum::Display;

/// Targets iptables resolves without a user chain
const BUILTIN_TARGETS: &[&str] = &["ACCEPT", "DROP", "REJECT", "RETURN", "LOG"];

/// A rule held by a [`MemoryEngine`] chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryRule {
    Spec {
        spec: Vec<String>,
        annotation: Option<String>,
    },
    Jump(String),
}

impl MemoryRule {
    /// User chain this rule transfers control to, if any
    pub fn jump_target(&self) -> Option<&str> {
        match self {
            MemoryRule::Jump(target) => Some(target.as_str()),
            MemoryRule::Spec { spec, .. } => spec
                .windows(2)
                .find(|w| w[0] == "-j" || w[0] == "-g")
                .map(|w| w[1].as_str()),
        }
    }
}

/// Engine primitive, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Primitive {
    Exists,
    Create,
    Append,
    InsertJump,
    Rename,
    RemoveJump,
    Flush,
    Delete,
}

#[derive(Debug, Default)]
struct State {
    chains: BTreeMap<String, Vec<MemoryRule>>,
    failures: Vec<(Primitive, String)>,
    mutations: Vec<String>,
    /// Accept targets that are neither builtin nor a known chain
    any_target: bool,
}

impl State {
    fn injected(&self, op: Primitive, chain: &str) -> Result<(), EngineError> {
        if self.failures.iter().any(|(p, c)| *p == op && c == chain) {
            return Err(EngineError::Command {
                program: "memory".to_string(),
                args: vec![op.to_string(), chain.to_string()],
                stderr: format!("injected {op} failure on {chain}"),
                exit_code: Some(1),
            });
        }
        Ok(())
    }

    fn chain_mut(&mut self, chain: &str) -> Result<&mut Vec<MemoryRule>, EngineError> {
        self.chains
            .get_mut(chain)
            .ok_or_else(|| EngineError::NoSuchChain(chain.to_string()))
    }

    fn is_referenced(&self, chain: &str) -> bool {
        self.chains
            .values()
            .flatten()
            .any(|rule| rule.jump_target() == Some(chain))
    }

    fn validate(&self, chain: &str, spec: &[String]) -> Result<(), EngineError> {
        let reject = |message: String| EngineError::Rejected {
            chain: chain.to_string(),
            message,
        };

        if spec.is_empty() {
            return Err(reject("empty rule specification".to_string()));
        }
        if let Some(arg) = spec.iter().find(|a| a.trim().is_empty() || a.contains('\0')) {
            return Err(reject(format!("Bad argument `{arg}'")));
        }
        let rule = MemoryRule::Spec {
            spec: spec.to_vec(),
            annotation: None,
        };
        if let Some(target) = rule.jump_target()
            && !self.any_target
            && !BUILTIN_TARGETS.contains(&target)
            && !self.chains.contains_key(target)
        {
            return Err(reject(format!("Couldn't load target `{target}'")));
        }
        if spec.last().is_some_and(|a| a == "-j" || a == "-g") {
            return Err(reject("option \"-j\" requires an argument".to_string()));
        }
        Ok(())
    }
}

/// In-memory engine bound to one family
#[derive(Debug)]
pub struct MemoryEngine {
    family: Family,
    state: Mutex<State>,
}

impl MemoryEngine {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            state: Mutex::new(State::default()),
        }
    }

    /// Engine that resolves every named target, as the kernel would for
    /// extension targets and chains outside this engine's view
    pub fn permissive(family: Family) -> Self {
        let engine = Self::new(family);
        engine.state().any_target = true;
        engine
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates `chain` directly, bypassing failure injection and the mutation log
    pub fn seed_chain(&self, chain: &str) {
        self.state().chains.entry(chain.to_string()).or_default();
    }

    /// Seeds a caller-owned jump chain that already references `<name>_live`
    pub fn seed_container(&self, name: &str) {
        let live = Generation::Live.chain(name);
        let mut state = self.state();
        state.chains.entry(live.clone()).or_default();
        state
            .chains
            .entry(name.to_string())
            .or_default()
            .push(MemoryRule::Jump(live));
    }

    /// Appends a rule directly, bypassing validation and the mutation log
    pub fn seed_rule(&self, chain: &str, spec: &[&str]) {
        self.state()
            .chains
            .entry(chain.to_string())
            .or_default()
            .push(MemoryRule::Spec {
                spec: spec.iter().map(ToString::to_string).collect(),
                annotation: None,
            });
    }

    /// Makes every later `op` against `chain` fail
    pub fn fail_on(&self, op: Primitive, chain: &str) {
        self.state().failures.push((op, chain.to_string()));
    }

    /// Removes all injected failures
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.state().chains.contains_key(chain)
    }

    /// Rules of `chain` in evaluation order
    pub fn rules(&self, chain: &str) -> Option<Vec<MemoryRule>> {
        self.state().chains.get(chain).cloned()
    }

    /// Argument lists of the non-jump rules in `chain`
    pub fn specs(&self, chain: &str) -> Vec<Vec<String>> {
        self.rules(chain)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rule| match rule {
                MemoryRule::Spec { spec, .. } => Some(spec),
                MemoryRule::Jump(_) => None,
            })
            .collect()
    }

    /// Targets of the jump rules in `chain`, in order
    pub fn jump_targets(&self, chain: &str) -> Vec<String> {
        self.rules(chain)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rule| match rule {
                MemoryRule::Jump(target) => Some(target),
                MemoryRule::Spec { .. } => None,
            })
            .collect()
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.state().chains.keys().cloned().collect()
    }

    /// Successful mutating primitives, in call order
    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }
}

impl RuleEngine for MemoryEngine {
    fn family(&self) -> Family {
        self.family
    }

    async fn exists(&self, chain: &str) -> Result<bool, EngineError> {
        let state = self.state();
        state.injected(Primitive::Exists, chain)?;
        Ok(state.chains.contains_key(chain))
    }

    async fn create(&self, chain: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.injected(Primitive::Create, chain)?;
        if state.chains.contains_key(chain) {
            return Err(EngineError::ChainExists(chain.to_string()));
        }
        state.chains.insert(chain.to_string(), Vec::new());
        state.mutations.push(format!("create {chain}"));
        Ok(())
    }

    async fn append(
        &self,
        chain: &str,
        spec: &[String],
        annotation: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        state.injected(Primitive::Append, chain)?;
        if !state.chains.contains_key(chain) {
            return Err(EngineError::NoSuchChain(chain.to_string()));
        }
        state.validate(chain, spec)?;
        state.chain_mut(chain)?.push(MemoryRule::Spec {
            spec: spec.to_vec(),
            annotation: annotation.map(|a| truncate_annotation(a).to_string()),
        });
        state.mutations.push(format!("append {chain}"));
        Ok(())
    }

    async fn insert_jump_before(
        &self,
        jump_chain: &str,
        target: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        state.injected(Primitive::InsertJump, jump_chain)?;
        if !state.chains.contains_key(target) {
            return Err(EngineError::NoSuchChain(target.to_string()));
        }
        state
            .chain_mut(jump_chain)?
            .insert(0, MemoryRule::Jump(target.to_string()));
        state.mutations.push(format!("insert {jump_chain} -> {target}"));
        Ok(())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.injected(Primitive::Rename, old)?;
        if state.chains.contains_key(new) {
            return Err(EngineError::ChainExists(new.to_string()));
        }
        let rules = state
            .chains
            .remove(old)
            .ok_or_else(|| EngineError::NoSuchChain(old.to_string()))?;
        state.chains.insert(new.to_string(), rules);

        // References follow the chain
        for rule in state.chains.values_mut().flatten() {
            match rule {
                MemoryRule::Jump(target) if target.as_str() == old => *target = new.to_string(),
                MemoryRule::Spec { spec, .. } => {
                    for pair in 1..spec.len() {
                        if (spec[pair - 1] == "-j" || spec[pair - 1] == "-g") && spec[pair] == old
                        {
                            spec[pair] = new.to_string();
                        }
                    }
                }
                MemoryRule::Jump(_) => {}
            }
        }
        state.mutations.push(format!("rename {old} -> {new}"));
        Ok(())
    }

    async fn remove_jump(
        &self,
        jump_chain: &str,
        target: &str,
    ) -> Result<JumpRemoval, EngineError> {
        let mut state = self.state();
        state.injected(Primitive::RemoveJump, jump_chain)?;
        let rules = state.chain_mut(jump_chain)?;
        let Some(pos) = rules
            .iter()
            .position(|r| matches!(r, MemoryRule::Jump(t) if t == target))
        else {
            return Ok(JumpRemoval::NotFound);
        };
        rules.remove(pos);
        state.mutations.push(format!("remove {jump_chain} -> {target}"));
        Ok(JumpRemoval::Removed)
    }

    async fn flush(&self, chain: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.injected(Primitive::Flush, chain)?;
        state.chain_mut(chain)?.clear();
        state.mutations.push(format!("flush {chain}"));
        Ok(())
    }

    async fn delete(&self, chain: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.injected(Primitive::Delete, chain)?;
        let rules = state
            .chains
            .get(chain)
            .ok_or_else(|| EngineError::NoSuchChain(chain.to_string()))?;
        if !rules.is_empty() {
            return Err(EngineError::ChainNotEmpty(chain.to_string()));
        }
        if state.is_referenced(chain) {
            return Err(EngineError::ChainInUse(chain.to_string()));
        }
        state.chains.remove(chain);
        state.mutations.push(format!("delete {chain}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(spec: &[&str]) -> Vec<String> {
        spec.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let engine = MemoryEngine::new(Family::V4);
        engine.create("a").await.unwrap();
        assert!(matches!(
            engine.create("a").await,
            Err(EngineError::ChainExists(_))
        ));
        assert!(engine.exists("a").await.unwrap());
        assert!(!engine.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_retargets_jumps() {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_container("edge");
        engine.seed_chain("other");
        engine.seed_rule("other", &["-p", "tcp", "-j", "edge_live"]);

        engine.rename("edge_live", "edge_old").await.unwrap();

        assert_eq!(engine.jump_targets("edge"), vec!["edge_old".to_string()]);
        assert_eq!(engine.specs("other")[0][3], "edge_old");
        assert!(!engine.has_chain("edge_live"));
    }

    #[tokio::test]
    async fn test_rename_onto_existing_fails() {
        let engine = MemoryEngine::new(Family::V6);
        engine.seed_chain("a");
        engine.seed_chain("b");
        assert!(matches!(
            engine.rename("a", "b").await,
            Err(EngineError::ChainExists(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refuses_referenced_or_non_empty() {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_container("edge");
        assert!(matches!(
            engine.delete("edge_live").await,
            Err(EngineError::ChainInUse(_))
        ));

        engine.seed_chain("full");
        engine.seed_rule("full", &["-j", "DROP"]);
        assert!(matches!(
            engine.delete("full").await,
            Err(EngineError::ChainNotEmpty(_))
        ));

        engine.flush("full").await.unwrap();
        engine.delete("full").await.unwrap();
        assert!(!engine.has_chain("full"));
    }

    #[tokio::test]
    async fn test_append_rejects_malformed_rules() {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_chain("c");

        assert!(matches!(
            engine.append("c", &[], None).await,
            Err(EngineError::Rejected { .. })
        ));
        assert!(matches!(
            engine.append("c", &args(&["-j", "NOWHERE"]), None).await,
            Err(EngineError::Rejected { .. })
        ));
        assert!(matches!(
            engine.append("c", &args(&["-p", "tcp", "-j"]), None).await,
            Err(EngineError::Rejected { .. })
        ));
        assert!(engine.specs("c").is_empty());

        engine
            .append("c", &args(&["-p", "tcp", "-j", "ACCEPT"]), Some("ok"))
            .await
            .unwrap();
        assert_eq!(engine.specs("c").len(), 1);
    }

    #[tokio::test]
    async fn test_permissive_accepts_unknown_targets() {
        let engine = MemoryEngine::permissive(Family::V4);
        engine.seed_chain("c");

        for target in ["MARK", "NFLOG", "TCPMSS", "LOGDROP"] {
            engine
                .append("c", &args(&["-p", "tcp", "-j", target]), None)
                .await
                .unwrap();
        }
        assert_eq!(engine.specs("c").len(), 4);

        // Malformed rules are still refused
        assert!(matches!(
            engine.append("c", &[], None).await,
            Err(EngineError::Rejected { .. })
        ));
        assert!(matches!(
            engine.append("c", &args(&["-p", "tcp", "-j"]), None).await,
            Err(EngineError::Rejected { .. })
        ));
        assert_eq!(engine.specs("c").len(), 4);
    }

    #[tokio::test]
    async fn test_remove_jump_reports_absence() {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_container("edge");

        assert_eq!(
            engine.remove_jump("edge", "edge_old").await.unwrap(),
            JumpRemoval::NotFound
        );
        assert_eq!(
            engine.remove_jump("edge", "edge_live").await.unwrap(),
            JumpRemoval::Removed
        );
        assert!(engine.jump_targets("edge").is_empty());

        assert!(matches!(
            engine.remove_jump("missing", "edge_live").await,
            Err(EngineError::NoSuchChain(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let engine = MemoryEngine::new(Family::V4);
        engine.fail_on(Primitive::Create, "x");
        assert!(engine.create("x").await.is_err());
        assert!(engine.mutations().is_empty());

        engine.clear_failures();
        engine.create("x").await.unwrap();
        assert_eq!(engine.mutations(), vec!["create x".to_string()]);
    }

    #[tokio::test]
    async fn test_annotation_truncated_on_append() {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_chain("c");
        let long = "a".repeat(400);
        engine
            .append("c", &args(&["-j", "ACCEPT"]), Some(&long))
            .await
            .unwrap();

        let rules = engine.rules("c").unwrap();
        let MemoryRule::Spec { annotation, .. } = &rules[0] else {
            panic!("expected spec rule");
        };
        assert_eq!(annotation.as_ref().unwrap().len(), 255);
    }
}
