//! Address families and chain generations
//!
//! A managed container `name` is materialised in the engine as up to three
//! chains, one per [`Generation`]: `name_live`, `name_new` and `name_old`.
//! Every container exists independently in each [`Family`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Address family an engine instance is bound to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Both families, IPv4 first
    pub fn all() -> Vec<Family> {
        Family::iter().collect()
    }

    /// Name of the engine binary serving this family
    pub fn engine_binary(self) -> &'static str {
        match self {
            Family::V4 => "iptables",
            Family::V6 => "ip6tables",
        }
    }
}

/// Logical role of a concrete chain within a rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Generation {
    Live,
    New,
    Old,
}

impl Generation {
    pub fn suffix(self) -> &'static str {
        match self {
            Generation::Live => "_live",
            Generation::New => "_new",
            Generation::Old => "_old",
        }
    }

    /// Concrete chain name for `container` in this generation
    pub fn chain(self, container: &str) -> String {
        format!("{container}{}", self.suffix())
    }
}

/// Longest suffix appended to a container name
pub const MAX_SUFFIX_LEN: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_generation_chain_names() {
        assert_eq!(Generation::Live.chain("edge_in"), "edge_in_live");
        assert_eq!(Generation::New.chain("edge_in"), "edge_in_new");
        assert_eq!(Generation::Old.chain("edge_in"), "edge_in_old");
    }

    #[test]
    fn test_max_suffix_len_covers_all_generations() {
        assert!(Generation::iter().all(|g| g.suffix().len() <= MAX_SUFFIX_LEN));
        assert!(Generation::iter().any(|g| g.suffix().len() == MAX_SUFFIX_LEN));
    }

    #[test]
    fn test_family_parse_and_display() {
        assert_eq!(Family::from_str("v4").unwrap(), Family::V4);
        assert_eq!(Family::from_str("V6").unwrap(), Family::V6);
        assert!(Family::from_str("v5").is_err());
        assert_eq!(Family::V6.to_string(), "v6");
    }

    #[test]
    fn test_family_serde() {
        let json = serde_json::to_string(&Family::V4).unwrap();
        assert_eq!(json, "\"v4\"");
        let family: Family = serde_json::from_str("\"v6\"").unwrap();
        assert_eq!(family, Family::V6);
    }

    #[test]
    fn test_engine_binaries() {
        assert_eq!(Family::V4.engine_binary(), "iptables");
        assert_eq!(Family::V6.engine_binary(), "ip6tables");
        assert_eq!(Family::all(), vec![Family::V4, Family::V6]);
    }
}
