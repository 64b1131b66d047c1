//! Dependency sets.
//!
//! A [`Dep`] is the set of effects subscribed to one observed location: a
//! single property of a reactive record, or the value of a ref or computed.
//! Each entry remembers the track id of the effect run that last confirmed
//! it, which is how a property read several times in one run is only
//! subscribed once.
//!
//! A Dep owns a cleanup callback that detaches it from whatever created it.
//! The callback fires as soon as the last subscriber is removed, so empty
//! Deps never linger in the dependency map.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::EffectContext;
use super::effect::EffectCore;
use super::subscriber::{DirtyLevel, EffectId, Subscriber};

type DepCleanup = Box<dyn Fn(&Dep) + Send + Sync>;

/// One subscription inside a Dep.
struct DepEntry {
    effect: Weak<dyn Subscriber>,
    track_id: u64,
}

/// The set of effects subscribed to one observed location.
pub struct Dep {
    /// Human-readable label, used in logs.
    name: String,

    /// Subscribers in subscription order.
    subscribers: Mutex<IndexMap<EffectId, DepEntry>>,

    /// Detaches this Dep from its owner once it becomes empty.
    cleanup: Option<DepCleanup>,
}

impl Dep {
    /// Create an empty Dep.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            subscribers: Mutex::new(IndexMap::new()),
            cleanup: None,
        })
    }

    /// Create an empty Dep that calls `cleanup` whenever it becomes empty.
    pub fn with_cleanup<F>(name: impl Into<String>, cleanup: F) -> Arc<Self>
    where
        F: Fn(&Dep) + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            subscribers: Mutex::new(IndexMap::new()),
            cleanup: Some(Box::new(cleanup)),
        })
    }

    /// The Dep's label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of subscribed effects.
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether no effect is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Whether the given effect is subscribed.
    pub fn contains(&self, effect: EffectId) -> bool {
        self.subscribers.lock().contains_key(&effect)
    }

    /// The track id recorded for `effect`, if it is subscribed.
    pub fn track_id_of(&self, effect: EffectId) -> Option<u64> {
        self.subscribers.lock().get(&effect).map(|entry| entry.track_id)
    }

    /// Live subscribers in subscription order.
    fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers
            .lock()
            .values()
            .filter_map(|entry| entry.effect.upgrade())
            .collect()
    }

    fn run_cleanup(&self) {
        if let Some(cleanup) = &self.cleanup {
            cleanup(self);
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("name", &self.name)
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Subscribe `effect` to `dep` for the effect's current run.
///
/// A subscription already confirmed during this run is left alone. A new
/// one is written into the effect's next dependency slot; whatever Dep
/// occupied that slot before is released unless it was confirmed in this
/// run as well.
pub(crate) fn track_effect(effect: &Arc<dyn Subscriber>, dep: &Arc<Dep>) {
    let core = effect.core();
    let track_id = core.track_id();

    {
        let mut subscribers = dep.subscribers.lock();
        if subscribers.get(&core.id()).map(|entry| entry.track_id) == Some(track_id) {
            return;
        }
        subscribers.insert(
            core.id(),
            DepEntry {
                effect: Arc::downgrade(effect),
                track_id,
            },
        );
    }

    tracing::trace!(effect = core.id().raw(), dep = %dep.name, "track");

    if let Some(released) = core.place_dep(dep) {
        cleanup_dep_effect(&released, core);
    }
}

/// Remove `effect` from `dep` unless the subscription belongs to the
/// effect's current run. Runs the Dep's cleanup if it became empty.
pub(crate) fn cleanup_dep_effect(dep: &Dep, effect: &EffectCore) {
    let emptied = {
        let mut subscribers = dep.subscribers.lock();
        match subscribers.get(&effect.id()) {
            Some(entry) if entry.track_id != effect.track_id() => {
                subscribers.shift_remove(&effect.id());
                subscribers.is_empty()
            }
            _ => false,
        }
    };

    if emptied {
        dep.run_cleanup();
    }
}

/// Notify every subscriber of `dep`.
///
/// Each subscriber is marked dirty. Subscribers that are not currently
/// running get their scheduler invoked; an effect that writes to something
/// it read during the same run is only marked dirty.
pub(crate) fn trigger_effects(dep: &Dep) {
    let subscribers = dep.snapshot();
    tracing::trace!(dep = %dep.name, subscribers = subscribers.len(), "trigger");

    for effect in subscribers {
        let core = effect.core();
        if core.dirty_level() < DirtyLevel::Dirty {
            core.set_dirty_level(DirtyLevel::Dirty);
        }
        if !core.is_running() {
            effect.notify();
        }
    }
}

/// A lazily created Dep owned by a single ref or computed.
pub(crate) struct DepSlot {
    name: &'static str,
    dep: Mutex<Option<Arc<Dep>>>,
}

impl DepSlot {
    pub(crate) fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            dep: Mutex::new(None),
        })
    }

    /// Subscribe the running effect, if any.
    pub(crate) fn track(self: &Arc<Self>) {
        let Some(effect) = EffectContext::tracker() else {
            return;
        };

        let dep = {
            let mut slot = self.dep.lock();
            let weak = Arc::downgrade(self);
            slot.get_or_insert_with(|| {
                Dep::with_cleanup(self.name, move |emptied| {
                    if let Some(owner) = weak.upgrade() {
                        owner.release(emptied);
                    }
                })
            })
            .clone()
        };

        track_effect(&effect, &dep);
    }

    /// Notify subscribers, if there are any.
    pub(crate) fn trigger(&self) {
        let dep = self.dep.lock().clone();
        if let Some(dep) = dep {
            trigger_effects(&dep);
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.dep.lock().as_ref().map_or(0, |dep| dep.len())
    }

    fn release(&self, emptied: &Dep) {
        let mut slot = self.dep.lock();
        if slot
            .as_ref()
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), emptied))
        {
            *slot = None;
        }
    }
}
