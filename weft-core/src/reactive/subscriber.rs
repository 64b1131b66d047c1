//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that can sit in a [`Dep`](super::Dep): effects,
//! the effect behind a computed value, watchers and render effects. The
//! dependency map only ever sees them through the [`Subscriber`] trait, which
//! keeps the bookkeeping non-generic while the effects themselves stay typed.

use std::sync::atomic::{AtomicU64, Ordering};

use super::effect::EffectCore;

/// Unique identifier for an effect.
///
/// Each effect gets a unique ID when created. Deps key their subscriber
/// lists by this ID so that re-confirming a subscription during a run is a
/// map lookup rather than a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

/// How stale an effect's last result is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DirtyLevel {
    /// The last run is still valid.
    NotDirty = 0,

    /// A dependency changed since the last run.
    Dirty = 4,
}

impl DirtyLevel {
    pub(crate) fn from_u8(raw: u8) -> Self {
        if raw >= DirtyLevel::Dirty as u8 {
            DirtyLevel::Dirty
        } else {
            DirtyLevel::NotDirty
        }
    }
}

/// A computation that can be notified when one of its dependencies changes.
pub trait Subscriber: Send + Sync {
    /// The untyped bookkeeping shared by every effect.
    fn core(&self) -> &EffectCore;

    /// Invoke the effect's scheduler.
    ///
    /// Called by `trigger` after the effect has been marked dirty, and only
    /// when the effect is not currently running.
    fn notify(&self);

    /// Permanently stop the effect.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_ids_are_unique() {
        let id1 = EffectId::new();
        let id2 = EffectId::new();
        let id3 = EffectId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn dirty_level_round_trips_through_raw() {
        assert_eq!(DirtyLevel::from_u8(DirtyLevel::Dirty as u8), DirtyLevel::Dirty);
        assert_eq!(DirtyLevel::from_u8(0), DirtyLevel::NotDirty);
        assert!(DirtyLevel::NotDirty < DirtyLevel::Dirty);
    }
}
