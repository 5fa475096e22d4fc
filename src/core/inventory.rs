//! Generation inventory of a container, read back from the engine
use crate::core::engine::RuleEngine;
use crate::core::error::EngineError;
use crate::core::family::{Family, Generation};
use serde::Serialize;

/// Which chains of a container currently exist in one family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationInventory {
    pub name: String,
    pub family: Family,
    pub jump_chain: bool,
    pub live: bool,
    pub new: bool,
    pub old: bool,
}

impl GenerationInventory {
    /// Stale chains left by an unfinished rotation
    pub fn residue(&self) -> Vec<String> {
        let mut stale = Vec::new();
        if self.new {
            stale.push(Generation::New.chain(&self.name));
        }
        if self.old {
            stale.push(Generation::Old.chain(&self.name));
        }
        stale
    }

    /// Jump chain and live generation present, nothing stale
    pub fn is_steady(&self) -> bool {
        self.jump_chain && self.live && self.residue().is_empty()
    }

    /// Human-readable problems, empty when steady
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.jump_chain {
            problems.push(format!("jump chain {} is missing", self.name));
        }
        if !self.live {
            problems.push(format!(
                "{} is missing (it is created on the next rotation)",
                Generation::Live.chain(&self.name)
            ));
        }
        problems.extend(
            self.residue()
                .into_iter()
                .map(|chain| format!("stale chain {chain} must be inspected and removed")),
        );
        problems
    }
}

/// Reads the generation inventory of `name` from `engine`
pub async fn inspect<E: RuleEngine>(
    engine: &E,
    name: &str,
) -> Result<GenerationInventory, EngineError> {
    Ok(GenerationInventory {
        name: name.to_string(),
        family: engine.family(),
        jump_chain: engine.exists(name).await?,
        live: engine.exists(&Generation::Live.chain(name)).await?,
        new: engine.exists(&Generation::New.chain(name)).await?,
        old: engine.exists(&Generation::Old.chain(name)).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryEngine;

    #[tokio::test]
    async fn test_steady_container() {
        let engine = MemoryEngine::new(Family::V6);
        engine.seed_container("edge_in");

        let inventory = inspect(&engine, "edge_in").await.unwrap();
        assert!(inventory.is_steady());
        assert!(inventory.problems().is_empty());
        assert_eq!(inventory.family, Family::V6);
    }

    #[tokio::test]
    async fn test_residue_reported() {
        let engine = MemoryEngine::new(Family::V4);
        engine.seed_container("edge_in");
        engine.seed_chain("edge_in_old");
        engine.seed_chain("edge_in_new");

        let inventory = inspect(&engine, "edge_in").await.unwrap();
        assert!(!inventory.is_steady());
        assert_eq!(inventory.residue(), vec!["edge_in_new", "edge_in_old"]);
        assert_eq!(inventory.problems().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_jump_chain() {
        let engine = MemoryEngine::new(Family::V4);
        let inventory = inspect(&engine, "nothing").await.unwrap();
        assert!(!inventory.jump_chain);
        assert!(!inventory.is_steady());
        assert!(inventory.problems()[0].contains("jump chain"));
    }
}
