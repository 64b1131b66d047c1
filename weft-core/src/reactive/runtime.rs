//! Reactive Runtime
//!
//! The runtime owns the dependency map: for every reactive record, the
//! [`Dep`] of each property that some effect has read.
//!
//! # How It Works
//!
//! 1. When a reactive record property is read inside an effect, [`track`]
//!    looks up (or creates) the Dep for that `(target, key)` pair and
//!    subscribes the running effect.
//!
//! 2. When the property changes, [`trigger`] finds the Dep and notifies its
//!    subscribers. Writes to locations nobody read are a map miss.
//!
//! 3. A Dep removes itself from the map once its last subscriber leaves,
//!    and a record's whole entry is dropped when the record itself is
//!    dropped (see [`forget_target`]).
//!
//! # Thread Safety
//!
//! The map is a global `DashMap` keyed by record identity. Shard guards are
//! always released before any effect bookkeeping or user code runs, because
//! both can re-enter the map.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use super::context::EffectContext;
use super::dep::{track_effect, trigger_effects, Dep};

/// Identity of a reactive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What about a record was observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    /// A single property, by name.
    Prop(String),

    /// The set of keys (enumeration, length).
    Iterate,
}

impl TrackKey {
    pub fn prop(key: impl Into<String>) -> Self {
        TrackKey::Prop(key.into())
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Prop(key) => f.write_str(key),
            TrackKey::Iterate => f.write_str("<iterate>"),
        }
    }
}

type KeyMap = HashMap<TrackKey, Arc<Dep>>;

static DEP_MAP: OnceLock<DashMap<TargetId, KeyMap>> = OnceLock::new();

fn dep_map() -> &'static DashMap<TargetId, KeyMap> {
    DEP_MAP.get_or_init(DashMap::new)
}

/// Subscribe the running effect to `key` of `target`.
///
/// Does nothing outside an effect or while tracking is paused.
pub fn track(target: TargetId, key: TrackKey) {
    let Some(effect) = EffectContext::tracker() else {
        return;
    };

    let dep = {
        let mut keys = dep_map().entry(target).or_default();
        match keys.get(&key) {
            Some(dep) => Arc::clone(dep),
            None => {
                let dep = new_dep(target, key.clone());
                keys.insert(key, Arc::clone(&dep));
                dep
            }
        }
    };

    track_effect(&effect, &dep);
}

/// Notify every effect subscribed to `key` of `target`.
pub fn trigger(target: TargetId, key: &TrackKey) {
    let dep = dep_map()
        .get(&target)
        .and_then(|keys| keys.get(key).cloned());

    if let Some(dep) = dep {
        trigger_effects(&dep);
    }
}

/// Drop every Dep registered for `target`.
///
/// Called when the record behind `target` is dropped.
pub fn forget_target(target: TargetId) {
    if dep_map().remove(&target).is_some() {
        tracing::trace!(%target, "forgot target");
    }
}

/// Number of Deps currently registered for `target`.
pub fn dep_count(target: TargetId) -> usize {
    dep_map().get(&target).map_or(0, |keys| keys.len())
}

/// Number of effects subscribed to `key` of `target`.
pub fn subscriber_count(target: TargetId, key: &TrackKey) -> usize {
    let dep = dep_map()
        .get(&target)
        .and_then(|keys| keys.get(key).cloned());
    dep.map_or(0, |dep| dep.len())
}

fn new_dep(target: TargetId, key: TrackKey) -> Arc<Dep> {
    let name = format!("{target}.{key}");
    Dep::with_cleanup(name, move |emptied| remove_dep(target, &key, emptied))
}

fn remove_dep(target: TargetId, key: &TrackKey, emptied: &Dep) {
    let now_empty = match dep_map().get_mut(&target) {
        Some(mut keys) => {
            let is_current = keys
                .get(key)
                .is_some_and(|dep| std::ptr::eq(Arc::as_ptr(dep), emptied));
            if is_current {
                keys.remove(key);
            }
            keys.is_empty()
        }
        None => false,
    };

    if now_empty {
        dep_map().remove_if(&target, |_, keys| keys.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::{effect, ReactiveEffect};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn track_outside_effect_is_noop() {
        let target = TargetId::new();
        track(target, TrackKey::prop("count"));
        assert_eq!(dep_count(target), 0);
    }

    #[test]
    fn trigger_notifies_subscribers() {
        let target = TargetId::new();
        let run_count = Arc::new(AtomicI32::new(0));

        let run_count_clone = run_count.clone();
        let _runner = effect(move || {
            track(target, TrackKey::prop("count"));
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(subscriber_count(target, &TrackKey::prop("count")), 1);

        trigger(target, &TrackKey::prop("other"));
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        trigger(target, &TrackKey::prop("count"));
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_deps_leave_the_map() {
        let target = TargetId::new();
        let effect = ReactiveEffect::new(move || {
            track(target, TrackKey::prop("a"));
            track(target, TrackKey::Iterate);
        });
        effect.run();
        assert_eq!(dep_count(target), 2);

        effect.stop();
        assert_eq!(dep_count(target), 0);
        assert!(dep_map().get(&target).is_none());
    }

    #[test]
    fn forget_target_drops_entry() {
        let target = TargetId::new();
        let effect = ReactiveEffect::new(move || track(target, TrackKey::prop("a")));
        effect.run();

        forget_target(target);
        assert_eq!(dep_count(target), 0);

        // Releasing the orphaned Dep must not resurrect the entry.
        effect.stop();
        assert!(dep_map().get(&target).is_none());
    }
}
