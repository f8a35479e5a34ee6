// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Stage store and cross-stage copy resolution
//!
//! Tracks the lifecycle of every declared stage and holds the sealed
//! snapshots other stages copy from. Lookups go through the store only, so a
//! stage can never see another stage's filesystem while it is still being
//! built.

use std::collections::HashMap;
use std::fmt;

use super::{normalize_path, SealedSnapshot, Snapshot, Subtree};
use crate::errors::{BuildError, BuildResult};
use crate::pipeline::StageDescriptor;

/// Lifecycle state of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Declared,
    Executing,
    Sealed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared => write!(f, "Declared"),
            Self::Executing => write!(f, "Executing"),
            Self::Sealed => write!(f, "Sealed"),
        }
    }
}

#[derive(Debug)]
struct Slot {
    name: String,
    state: StageState,
    snapshot: Option<SealedSnapshot>,
}

/// Registry of stage states and sealed snapshots
#[derive(Debug)]
pub struct StageStore {
    slots: Vec<Slot>,
    aliases: HashMap<String, usize>,
    transitions: Vec<(String, StageState)>,
}

impl StageStore {
    /// Register every stage as `Declared`
    ///
    /// Each stage answers to its name and to its ordinal index.
    pub fn new(stages: &[StageDescriptor]) -> Self {
        let mut slots = Vec::with_capacity(stages.len());
        let mut aliases = HashMap::new();

        for (slot, stage) in stages.iter().enumerate() {
            aliases.insert(stage.index().to_string(), slot);
            aliases.insert(stage.name().to_string(), slot);
            slots.push(Slot {
                name: stage.name().to_string(),
                state: StageState::Declared,
                snapshot: None,
            });
        }

        Self {
            slots,
            aliases,
            transitions: Vec::new(),
        }
    }

    /// Current state of a stage, if it was declared
    pub fn state(&self, stage_ref: &str) -> Option<StageState> {
        self.aliases.get(stage_ref).map(|&i| self.slots[i].state)
    }

    /// Move a stage from `Declared` to `Executing`
    pub fn begin(&mut self, stage_ref: &str) -> BuildResult<()> {
        let slot = self.slot_index(stage_ref)?;
        self.transition(slot, StageState::Declared, StageState::Executing)
    }

    /// Move a stage from `Executing` to `Sealed`, freezing its snapshot
    pub fn seal(&mut self, stage_ref: &str, snapshot: Snapshot) -> BuildResult<SealedSnapshot> {
        let slot = self.slot_index(stage_ref)?;
        self.transition(slot, StageState::Executing, StageState::Sealed)?;

        let sealed = snapshot.seal();
        self.slots[slot].snapshot = Some(sealed.clone());
        Ok(sealed)
    }

    /// Resolve `path` inside the sealed snapshot of `stage_ref`
    ///
    /// Returns `Ok(None)` when the stage is sealed but the path does not exist.
    pub fn resolve(
        &self,
        requester: &str,
        stage_ref: &str,
        path: &str,
    ) -> BuildResult<Option<Subtree>> {
        let sealed = self.sealed(requester, stage_ref)?;
        Ok(sealed.subtree(&normalize_path("/", path)))
    }

    /// The sealed snapshot of `stage_ref`, as seen by `requester`
    pub fn sealed(&self, requester: &str, stage_ref: &str) -> BuildResult<SealedSnapshot> {
        let Some(&slot) = self.aliases.get(stage_ref) else {
            return Err(BuildError::UnknownStage {
                stage: requester.to_string(),
                reference: stage_ref.to_string(),
            });
        };

        let slot = &self.slots[slot];
        if slot.state != StageState::Sealed {
            return Err(BuildError::StageNotSealed {
                stage: requester.to_string(),
                reference: slot.name.clone(),
            });
        }

        slot.snapshot
            .clone()
            .ok_or_else(|| BuildError::StageReleased {
                stage: slot.name.clone(),
            })
    }

    /// Drop the store's reference to a sealed snapshot
    pub fn release(&mut self, stage_ref: &str) {
        if let Some(&slot) = self.aliases.get(stage_ref) {
            if self.slots[slot].snapshot.take().is_some() {
                tracing::debug!(stage = %self.slots[slot].name, "Released snapshot");
            }
        }
    }

    /// Whether the store still holds the snapshot of a stage
    pub fn is_retained(&self, stage_ref: &str) -> bool {
        self.aliases
            .get(stage_ref)
            .map(|&i| self.slots[i].snapshot.is_some())
            .unwrap_or(false)
    }

    /// Every state change in the order it happened
    pub fn transitions(&self) -> &[(String, StageState)] {
        &self.transitions
    }

    fn slot_index(&self, stage_ref: &str) -> BuildResult<usize> {
        self.aliases
            .get(stage_ref)
            .copied()
            .ok_or_else(|| BuildError::UnknownStage {
                stage: stage_ref.to_string(),
                reference: stage_ref.to_string(),
            })
    }

    fn transition(&mut self, slot: usize, from: StageState, to: StageState) -> BuildResult<()> {
        let current = self.slots[slot].state;
        if current != from {
            return Err(BuildError::InvalidTransition {
                stage: self.slots[slot].name.clone(),
                from: current.to_string(),
                to: to.to_string(),
            });
        }

        self.slots[slot].state = to;
        self.transitions.push((self.slots[slot].name.clone(), to));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Stage, StageDescriptor};
    use crate::snapshot::Entry;

    fn descriptors(names: &[Option<&str>]) -> Vec<StageDescriptor> {
        let stages: Vec<Stage> = names
            .iter()
            .map(|name| Stage {
                name: name.map(String::from),
                description: None,
                from: "scratch".into(),
                steps: vec![],
            })
            .collect();
        StageDescriptor::from_stages(&stages).unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let mut store = StageStore::new(&descriptors(&[Some("base")]));
        assert_eq!(store.state("base"), Some(StageState::Declared));

        store.begin("base").unwrap();
        assert_eq!(store.state("base"), Some(StageState::Executing));

        store.seal("base", Snapshot::empty()).unwrap();
        assert_eq!(store.state("base"), Some(StageState::Sealed));

        assert_eq!(
            store.transitions(),
            &[
                ("base".to_string(), StageState::Executing),
                ("base".to_string(), StageState::Sealed)
            ]
        );
    }

    #[test]
    fn test_sealed_stage_cannot_restart() {
        let mut store = StageStore::new(&descriptors(&[Some("base")]));
        store.begin("base").unwrap();
        store.seal("base", Snapshot::empty()).unwrap();

        let result = store.begin("base");
        assert!(matches!(result, Err(BuildError::InvalidTransition { .. })));
    }

    #[test]
    fn test_resolve_requires_sealed_stage() {
        let mut store = StageStore::new(&descriptors(&[Some("builder"), Some("runtime")]));
        store.begin("builder").unwrap();

        let result = store.resolve("runtime", "builder", "/libs");
        assert!(matches!(
            result,
            Err(BuildError::StageNotSealed { ref stage, ref reference })
                if stage == "runtime" && reference == "builder"
        ));
    }

    #[test]
    fn test_resolve_unknown_stage() {
        let store = StageStore::new(&descriptors(&[Some("runtime")]));
        let result = store.resolve("runtime", "ghost", "/libs");
        assert!(matches!(result, Err(BuildError::UnknownStage { .. })));
    }

    #[test]
    fn test_resolve_by_index_and_name() {
        let mut store = StageStore::new(&descriptors(&[None, Some("runtime")]));
        store.begin("0").unwrap();

        let mut snapshot = Snapshot::empty();
        snapshot.put("/libs/a.so", Entry::file("a", 0o644));
        store.seal("0", snapshot).unwrap();

        let tree = store.resolve("runtime", "0", "libs").unwrap().unwrap();
        assert_eq!(tree.len(), 1);
        assert!(store.resolve("runtime", "0", "/missing").unwrap().is_none());
    }

    #[test]
    fn test_released_snapshot() {
        let mut store = StageStore::new(&descriptors(&[Some("builder")]));
        store.begin("builder").unwrap();
        store.seal("builder", Snapshot::empty()).unwrap();
        assert!(store.is_retained("builder"));

        store.release("builder");
        assert!(!store.is_retained("builder"));
        assert!(matches!(
            store.sealed("x", "builder"),
            Err(BuildError::StageReleased { .. })
        ));
    }
}
