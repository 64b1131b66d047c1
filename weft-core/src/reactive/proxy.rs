//! Reactive records.
//!
//! A [`Reactive`] wraps one raw [`Record`] and turns its accessors into
//! tracked reads and triggering writes. Wrapping is idempotent: the same
//! live record always yields the same wrapper, so identity comparisons on
//! reactive values behave as callers expect.
//!
//! # Tracking Rules
//!
//! | Operation        | Tracks            | Triggers                           |
//! |------------------|-------------------|------------------------------------|
//! | `get(k)`         | `Prop(k)`         |                                    |
//! | `contains_key(k)`| `Prop(k)`         |                                    |
//! | `keys`, `len`    | `Iterate`         |                                    |
//! | `set(k, v)`      |                   | `Prop(k)` if changed, plus `Iterate` for a new key |
//! | `remove(k)`      |                   | `Prop(k)` and `Iterate` if present |

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::runtime::{self, TargetId, TrackKey};
use super::value::{same_value, Record, Value};

struct ReactiveInner {
    raw: Record,
}

static PROXY_CACHE: OnceLock<DashMap<TargetId, Weak<ReactiveInner>>> = OnceLock::new();

fn proxy_cache() -> &'static DashMap<TargetId, Weak<ReactiveInner>> {
    PROXY_CACHE.get_or_init(DashMap::new)
}

/// Remove the cached wrapper of a dropped record.
pub(crate) fn forget(target: TargetId) {
    proxy_cache().remove(&target);
}

/// A tracking wrapper around a [`Record`].
#[derive(Clone)]
pub struct Reactive {
    inner: Arc<ReactiveInner>,
}

impl Reactive {
    /// The wrapper for `record`, created on first use.
    pub fn new(record: Record) -> Self {
        match proxy_cache().entry(record.id()) {
            Entry::Occupied(mut entry) => {
                if let Some(inner) = entry.get().upgrade() {
                    return Self { inner };
                }
                let reactive = Self::wrap(record);
                entry.insert(Arc::downgrade(&reactive.inner));
                reactive
            }
            Entry::Vacant(entry) => {
                let reactive = Self::wrap(record);
                entry.insert(Arc::downgrade(&reactive.inner));
                reactive
            }
        }
    }

    fn wrap(raw: Record) -> Self {
        Self {
            inner: Arc::new(ReactiveInner { raw }),
        }
    }

    /// Identity of the wrapped record.
    pub fn id(&self) -> TargetId {
        self.inner.raw.id()
    }

    /// The wrapped record. Reads and writes through it are not tracked.
    pub fn raw(&self) -> &Record {
        &self.inner.raw
    }

    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a property.
    ///
    /// A nested record comes back wrapped, and a stored ref comes back as
    /// its current value.
    pub fn get(&self, key: &str) -> Option<Value> {
        runtime::track(self.id(), TrackKey::prop(key));

        let value = self.inner.raw.get(key)?;
        Some(match value {
            Value::Ref(r) => r.get(),
            Value::Record(record) => Value::Reactive(Reactive::new(record)),
            other => other,
        })
    }

    /// Write a property.
    ///
    /// Writing a plain value over a stored ref updates the ref instead.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into().into_raw();

        if let Some(Value::Ref(existing)) = self.inner.raw.get(&key) {
            if !matches!(value, Value::Ref(_)) {
                existing.set(value);
                return;
            }
        }

        let target = self.id();
        match self.inner.raw.insert(key.clone(), value.clone()) {
            None => {
                runtime::trigger(target, &TrackKey::Prop(key));
                runtime::trigger(target, &TrackKey::Iterate);
            }
            Some(previous) if !same_value(&previous, &value) => {
                runtime::trigger(target, &TrackKey::Prop(key));
            }
            Some(_) => {}
        }
    }

    /// Delete a property, returning its raw value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let previous = self.inner.raw.remove(key)?;
        let target = self.id();
        runtime::trigger(target, &TrackKey::prop(key));
        runtime::trigger(target, &TrackKey::Iterate);
        Some(previous)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        runtime::track(self.id(), TrackKey::prop(key));
        self.inner.raw.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        runtime::track(self.id(), TrackKey::Iterate);
        self.inner.raw.keys()
    }

    pub fn len(&self) -> usize {
        runtime::track(self.id(), TrackKey::Iterate);
        self.inner.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("raw", &self.inner.raw)
            .finish()
    }
}

/// Wrap a record value in its reactive wrapper.
///
/// Values that are not records are returned unchanged.
pub fn reactive(value: impl Into<Value>) -> Value {
    match value.into() {
        Value::Record(record) => Value::Reactive(Reactive::new(record)),
        other => other,
    }
}

/// Whether `value` is a reactive wrapper.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// The raw record behind a reactive wrapper, or the value itself.
pub fn to_raw(value: Value) -> Value {
    value.into_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::refs::ref_value;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting_effect<F>(f: F) -> (Arc<AtomicI32>, crate::reactive::effect::EffectRunner<()>)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let runner = effect(move || {
            f();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        (runs, runner)
    }

    #[test]
    fn wrapping_is_idempotent() {
        let record = Record::from_fields([("a", 1)]);
        let first = reactive(record.clone());
        let second = reactive(record.clone());
        let again = reactive(first.clone());

        assert!(is_reactive(&first));
        assert_eq!(first, second);
        assert_eq!(first, again);
        assert!(matches!(to_raw(first), Value::Record(raw) if raw.ptr_eq(&record)));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(reactive(5), Value::Int(5));
        assert!(!is_reactive(&reactive("text")));
    }

    #[test]
    fn nested_records_come_back_wrapped() {
        let inner = Record::from_fields([("x", 1)]);
        let state = Reactive::new(Record::new().with("inner", inner.clone()));

        let read = state.get("inner").expect("inner");
        assert!(is_reactive(&read));
        assert_eq!(read, Value::Reactive(Reactive::new(inner)));
    }

    #[test]
    fn set_triggers_only_on_change() {
        let state = Reactive::new(Record::from_fields([("count", 0)]));
        let tracked = state.clone();
        let (runs, _runner) = counting_effect(move || {
            tracked.get("count");
        });

        state.set("count", 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        state.set("count", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        state.set("other", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn switching_numeric_variant_triggers() {
        let state = Reactive::new(Record::from_fields([("count", 1)]));
        let tracked = state.clone();
        let (runs, _runner) = counting_effect(move || {
            tracked.get("count");
        });

        state.set("count", 1.0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(state.get("count").and_then(|v| v.as_int()), None);

        state.set("count", 1.0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn adding_and_removing_keys_triggers_iteration() {
        let state = Reactive::new(Record::new());
        let tracked = state.clone();
        let (runs, _runner) = counting_effect(move || {
            tracked.keys();
        });

        state.set("a", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        state.set("a", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        state.remove("a");
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        assert!(state.remove("missing").is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_key_read_is_tracked() {
        let state = Reactive::new(Record::new());
        let tracked = state.clone();
        let (runs, _runner) = counting_effect(move || {
            tracked.contains_key("later");
        });

        state.set("later", true);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stored_refs_are_unwrapped_and_written_through() {
        let count = ref_value(1);
        let state = Reactive::new(Record::new().with("count", count.clone()));

        assert_eq!(state.get("count"), Some(Value::Int(1)));

        state.set("count", 5);
        assert_eq!(count.get_untracked(), Value::Int(5));
        assert!(matches!(state.raw().get("count"), Some(Value::Ref(_))));
    }

    #[test]
    fn dropped_record_leaves_cache() {
        let record = Record::new();
        let id = record.id();
        let wrapper = Reactive::new(record);
        assert!(proxy_cache().contains_key(&id));

        drop(wrapper);
        assert!(!proxy_cache().contains_key(&id));
    }
}
