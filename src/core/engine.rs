//! Rule-engine adapter interface
//!
//! [`RuleEngine`] is the set of primitives the rotation protocol needs from a
//! packet-filtering back end. One instance is bound to exactly one
//! [`Family`]. Production code uses [`IptablesEngine`](crate::core::iptables::IptablesEngine),
//! tests and dry runs use the stateful [`MemoryEngine`](crate::core::memory::MemoryEngine).

use crate::core::error::EngineError;
use crate::core::family::Family;

/// Maximum annotation length accepted by the engine (xt_comment limit)
pub const MAX_ANNOTATION_LEN: usize = 255;

/// Outcome of removing a jump rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpRemoval {
    Removed,
    /// No jump to the target was present. Not an error.
    NotFound,
}

/// One rule to append: ordered engine arguments plus an optional annotation
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleSpec {
    pub spec: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl RuleSpec {
    pub fn new<I, S>(spec: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            spec: spec.into_iter().map(Into::into).collect(),
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

/// Primitive chain operations against one address-family back end.
///
/// Every call blocks the rotation until the engine has answered; there is
/// no timeout.
#[allow(async_fn_in_trait)]
pub trait RuleEngine {
    /// Family this engine instance is bound to
    fn family(&self) -> Family;

    /// Whether `chain` exists. Absence is `Ok(false)`, never an error.
    async fn exists(&self, chain: &str) -> Result<bool, EngineError>;

    /// Creates an empty chain; fails if it already exists.
    async fn create(&self, chain: &str) -> Result<(), EngineError>;

    /// Appends one rule. Annotations longer than [`MAX_ANNOTATION_LEN`]
    /// characters are truncated.
    async fn append(
        &self,
        chain: &str,
        spec: &[String],
        annotation: Option<&str>,
    ) -> Result<(), EngineError>;

    /// Inserts a jump to `target` at the front of `jump_chain`.
    async fn insert_jump_before(&self, jump_chain: &str, target: &str)
    -> Result<(), EngineError>;

    /// Atomically renames a chain; existing references follow the rename.
    async fn rename(&self, old: &str, new: &str) -> Result<(), EngineError>;

    /// Removes one jump to `target` from `jump_chain`.
    async fn remove_jump(&self, jump_chain: &str, target: &str)
    -> Result<JumpRemoval, EngineError>;

    /// Removes every rule from `chain`.
    async fn flush(&self, chain: &str) -> Result<(), EngineError>;

    /// Deletes an empty, unreferenced chain.
    async fn delete(&self, chain: &str) -> Result<(), EngineError>;
}

/// Truncates an annotation to [`MAX_ANNOTATION_LEN`] characters.
///
/// Counts characters rather than bytes, so multi-byte text is never split.
pub fn truncate_annotation(annotation: &str) -> &str {
    match annotation.char_indices().nth(MAX_ANNOTATION_LEN) {
        Some((idx, _)) => &annotation[..idx],
        None => annotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_annotation_unchanged() {
        assert_eq!(truncate_annotation("allow ssh"), "allow ssh");
        assert_eq!(truncate_annotation(""), "");
    }

    #[test]
    fn test_long_annotation_truncated() {
        let long = "x".repeat(300);
        assert_eq!(truncate_annotation(&long).len(), MAX_ANNOTATION_LEN);

        let exact = "y".repeat(MAX_ANNOTATION_LEN);
        assert_eq!(truncate_annotation(&exact), exact);
    }

    #[test]
    fn test_multibyte_annotation_truncated_on_char_boundary() {
        let long = "é".repeat(260);
        let truncated = truncate_annotation(&long);
        assert_eq!(truncated.chars().count(), MAX_ANNOTATION_LEN);
    }

    #[test]
    fn test_rule_spec_builder() {
        let rule = RuleSpec::new(["-p", "tcp", "-j", "ACCEPT"]).with_annotation("ssh");
        assert_eq!(rule.spec.len(), 4);
        assert_eq!(rule.annotation.as_deref(), Some("ssh"));
    }

    proptest! {
        #[test]
        fn prop_truncation_is_prefix_and_bounded(s in "\\PC{0,400}") {
            let truncated = truncate_annotation(&s);
            prop_assert!(s.starts_with(truncated));
            prop_assert!(truncated.chars().count() <= MAX_ANNOTATION_LEN);
            if s.chars().count() <= MAX_ANNOTATION_LEN {
                prop_assert_eq!(truncated, s.as_str());
            }
        }
    }
}
