//! Paired model/optimizer snapshots and the two-slot rollback holder.

use serde::{Deserialize, Serialize};

/// A point-in-time copy of model parameters and optimizer internals.
///
/// The two halves are always saved, restored, and rolled back together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<M, O> {
    pub model: M,
    pub optimizer: O,
}

impl<M, O> Snapshot<M, O> {
    pub fn new(model: M, optimizer: O) -> Self {
        Self { model, optimizer }
    }
}

/// Holds the live state and the last accepted copy.
///
/// `current` is what the next epoch trains from. `retained` is the rollback
/// target; it only changes through [`SnapshotSlots::retain`].
#[derive(Debug, Clone)]
pub struct SnapshotSlots<M, O> {
    current: Snapshot<M, O>,
    retained: Option<Snapshot<M, O>>,
}

impl<M: Clone, O: Clone> SnapshotSlots<M, O> {
    pub fn new(initial: Snapshot<M, O>) -> Self {
        Self {
            current: initial,
            retained: None,
        }
    }

    pub fn current(&self) -> &Snapshot<M, O> {
        &self.current
    }

    /// Mutable access for the step executor. Callers must not hold this
    /// across a retain or rollback.
    pub fn current_mut(&mut self) -> &mut Snapshot<M, O> {
        &mut self.current
    }

    pub fn retained(&self) -> Option<&Snapshot<M, O>> {
        self.retained.as_ref()
    }

    /// Copy the live state into the rollback slot.
    pub fn retain(&mut self) {
        self.retained = Some(self.current.clone());
    }

    /// Replace the live state with a copy of the retained one.
    ///
    /// Returns the rejected state so it can be persisted for audit, or
    /// `None` (leaving `current` untouched) when nothing has been retained.
    pub fn rollback(&mut self) -> Option<Snapshot<M, O>> {
        let restored = self.retained.clone()?;
        Some(std::mem::replace(&mut self.current, restored))
    }

    /// The retained snapshot if any, otherwise the live state.
    pub fn into_best(self) -> Snapshot<M, O> {
        self.retained.unwrap_or(self.current)
    }
}
