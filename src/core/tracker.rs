//! Generation tracker
//!
//! Caller-owned bookkeeping of which rotations are open in this process.
//! It rejects duplicate opens and populate/close calls for a container that
//! is not open before anything reaches the engine. The tracker is never
//! persisted: after a restart the engine's chain inventory is the only
//! source of truth, and the open sanity checks re-derive it.

use crate::core::error::PreconditionError;
use crate::core::family::Family;
use std::collections::HashMap;

/// Phase of an open rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sanity checks passed, `_new` being created
    Prepared,
    /// `_new` exists and accepts rules
    Populating,
    /// A primitive failed; only manual cleanup can follow
    Failed,
}

/// State of one open rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    pub phase: Phase,
    pub rules_appended: usize,
}

/// Open rotations keyed by (container name, family)
#[derive(Debug, Default)]
pub struct GenerationTracker {
    open: HashMap<(String, Family), RotationState>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, family: Family) -> (String, Family) {
        (name.to_string(), family)
    }

    pub fn state(&self, name: &str, family: Family) -> Option<RotationState> {
        self.open.get(&Self::key(name, family)).copied()
    }

    pub fn is_open(&self, name: &str, family: Family) -> bool {
        self.open.contains_key(&Self::key(name, family))
    }

    /// Fails if a rotation of `name` is already tracked in `family`
    pub fn ensure_idle(&self, name: &str, family: Family) -> Result<(), PreconditionError> {
        if self.is_open(name, family) {
            return Err(PreconditionError::AlreadyOpen {
                name: name.to_string(),
                family,
            });
        }
        Ok(())
    }

    /// Records a rotation entering `Prepared`
    pub fn begin(&mut self, name: &str, family: Family) -> Result<(), PreconditionError> {
        self.ensure_idle(name, family)?;
        self.open.insert(
            Self::key(name, family),
            RotationState {
                phase: Phase::Prepared,
                rules_appended: 0,
            },
        );
        Ok(())
    }

    /// Moves a prepared rotation to `Populating` with a zeroed counter
    pub fn start_populating(
        &mut self,
        name: &str,
        family: Family,
    ) -> Result<(), PreconditionError> {
        let state = self.require(name, family)?;
        state.phase = Phase::Populating;
        state.rules_appended = 0;
        Ok(())
    }

    /// Fails unless `name` is open and populating in `family`
    pub fn ensure_populating(&self, name: &str, family: Family) -> Result<(), PreconditionError> {
        match self.state(name, family) {
            None => Err(PreconditionError::NotOpen {
                name: name.to_string(),
                family,
            }),
            Some(RotationState {
                phase: Phase::Populating,
                ..
            }) => Ok(()),
            Some(_) => Err(PreconditionError::RotationFailed {
                name: name.to_string(),
                family,
            }),
        }
    }

    /// Counts one appended rule and returns the new total
    pub fn record_append(
        &mut self,
        name: &str,
        family: Family,
    ) -> Result<usize, PreconditionError> {
        self.ensure_populating(name, family)?;
        let state = self.require(name, family)?;
        state.rules_appended += 1;
        Ok(state.rules_appended)
    }

    /// Marks the rotation failed; later populate/close calls are refused
    pub fn mark_failed(&mut self, name: &str, family: Family) {
        if let Some(state) = self.open.get_mut(&Self::key(name, family)) {
            state.phase = Phase::Failed;
        }
    }

    /// Forgets a rotation that failed while still `Prepared`, before `_new` existed
    pub fn discard(&mut self, name: &str, family: Family) {
        self.open.remove(&Self::key(name, family));
    }

    /// Closes the rotation and returns the number of rules it appended
    pub fn finish(&mut self, name: &str, family: Family) -> Result<usize, PreconditionError> {
        self.ensure_populating(name, family)?;
        let state = self
            .open
            .remove(&Self::key(name, family))
            .ok_or_else(|| PreconditionError::NotOpen {
                name: name.to_string(),
                family,
            })?;
        Ok(state.rules_appended)
    }

    /// Names of all rotations open in `family`
    pub fn open_names(&self, family: Family) -> Vec<String> {
        let mut names: Vec<String> = self
            .open
            .keys()
            .filter(|(_, f)| *f == family)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    fn require(
        &mut self,
        name: &str,
        family: Family,
    ) -> Result<&mut RotationState, PreconditionError> {
        self.open
            .get_mut(&Self::key(name, family))
            .ok_or_else(|| PreconditionError::NotOpen {
                name: name.to_string(),
                family,
            })
    }
}
