//! Ref Implementation
//!
//! A Ref is a single reactive cell. It owns its own [`Dep`](super::Dep)
//! instead of going through the dependency map, so reading and writing it is
//! a lock and a slot lookup.
//!
//! # How Refs Work
//!
//! 1. `get()` inside an effect subscribes the effect to the ref.
//!
//! 2. `set()` compares the new value with the previous one using
//!    [`RefValue::has_changed`]; unchanged writes are ignored.
//!
//! 3. A changed write stores the value and notifies subscribers.
//!
//! For `Ref<Value>` the stored value is reactive: assigning a record stores
//! the raw record for comparison and hands out its reactive wrapper.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::dep::DepSlot;
use super::proxy::{reactive, Reactive};
use super::value::{same_float, same_value, Record, Value};
use super::watch::traverse;

/// Values that can live in a [`Ref`].
pub trait RefValue: Clone + Send + Sync + 'static {
    /// Whether `self` should count as a change from `previous`.
    fn has_changed(&self, previous: &Self) -> bool;

    /// The form handed out by `get()`.
    fn to_reactive(&self) -> Self {
        self.clone()
    }

    /// The form used for change detection.
    fn to_raw(&self) -> Self {
        self.clone()
    }

    /// Read everything reachable from the value, for deep watchers.
    fn traverse(&self, _depth: usize) {}
}

macro_rules! impl_ref_value_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RefValue for $ty {
                fn has_changed(&self, previous: &Self) -> bool {
                    self != previous
                }
            }
        )*
    };
}

impl_ref_value_eq!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    String,
    Arc<str>,
    &'static str,
);

impl RefValue for f32 {
    fn has_changed(&self, previous: &Self) -> bool {
        !same_float(f64::from(*self), f64::from(*previous))
    }
}

impl RefValue for f64 {
    fn has_changed(&self, previous: &Self) -> bool {
        !same_float(*self, *previous)
    }
}

impl<T: RefValue> RefValue for Option<T> {
    fn has_changed(&self, previous: &Self) -> bool {
        match (self, previous) {
            (Some(current), Some(previous)) => current.has_changed(previous),
            (None, None) => false,
            _ => true,
        }
    }

    fn to_reactive(&self) -> Self {
        self.as_ref().map(RefValue::to_reactive)
    }

    fn to_raw(&self) -> Self {
        self.as_ref().map(RefValue::to_raw)
    }

    fn traverse(&self, depth: usize) {
        if let Some(value) = self {
            value.traverse(depth);
        }
    }
}

impl<T: RefValue> RefValue for Vec<T> {
    fn has_changed(&self, previous: &Self) -> bool {
        self.len() != previous.len()
            || self
                .iter()
                .zip(previous)
                .any(|(current, previous)| current.has_changed(previous))
    }
}

impl RefValue for Value {
    fn has_changed(&self, previous: &Self) -> bool {
        !same_value(self, previous)
    }

    fn to_reactive(&self) -> Self {
        reactive(self.clone())
    }

    fn to_raw(&self) -> Self {
        self.clone().into_raw()
    }

    fn traverse(&self, depth: usize) {
        traverse(self, depth);
    }
}

impl RefValue for Record {
    fn has_changed(&self, previous: &Self) -> bool {
        !self.ptr_eq(previous)
    }
}

impl RefValue for Reactive {
    fn has_changed(&self, previous: &Self) -> bool {
        !self.ptr_eq(previous)
    }
}

struct RefInner<T> {
    /// The value used for change detection.
    raw: RwLock<T>,

    /// The value handed out by `get()`.
    value: RwLock<T>,

    dep: Arc<DepSlot>,
}

/// A reactive cell holding a value of type `T`.
///
/// Cloning shares the cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(0);
///
/// let _runner = effect({
///     let count = count.clone();
///     move || println!("count is {}", count.get())
/// });
///
/// count.set(5);  // Prints: "count is 5"
/// ```
pub struct Ref<T: RefValue> {
    inner: Arc<RefInner<T>>,
}

impl<T: RefValue> Ref<T> {
    pub fn new(value: T) -> Self {
        let raw = value.to_raw();
        let value = raw.to_reactive();
        Self {
            inner: Arc::new(RefInner {
                raw: RwLock::new(raw),
                value: RwLock::new(value),
                dep: DepSlot::new("ref"),
            }),
        }
    }

    /// Read the value, subscribing the running effect.
    pub fn get(&self) -> T {
        self.inner.dep.track();
        self.inner.value.read().clone()
    }

    /// Read the value without subscribing.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Store a new value and notify subscribers if it changed.
    pub fn set(&self, value: T) {
        let raw = value.to_raw();
        let changed = {
            let mut current = self.inner.raw.write();
            if raw.has_changed(&current) {
                *current = raw.clone();
                true
            } else {
                false
            }
        };

        if changed {
            let value = raw.to_reactive();
            *self.inner.value.write() = value;
            self.inner.dep.trigger();
        }
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get_untracked());
        self.set(next);
    }

    /// Notify subscribers without changing the value.
    pub fn trigger(&self) {
        self.inner.dep.trigger();
    }

    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of effects subscribed to this ref.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }
}

impl<T: RefValue> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RefValue + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("value", &*self.inner.value.read())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A ref holding a dynamic [`Value`].
pub fn ref_value(value: impl Into<Value>) -> Ref<Value> {
    Ref::new(value.into())
}

/// A ref-shaped view of one property of a reactive record.
///
/// Reads and writes go straight through to the record, so tracking and
/// triggering happen on the property itself.
#[derive(Clone, Debug)]
pub struct ObjectRef {
    object: Reactive,
    key: String,
}

impl ObjectRef {
    pub fn get(&self) -> Option<Value> {
        self.object.get(&self.key)
    }

    pub fn set(&self, value: impl Into<Value>) {
        self.object.set(self.key.clone(), value);
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn object(&self) -> &Reactive {
        &self.object
    }
}

/// A ref bound to `key` of `object`.
pub fn to_ref(object: &Reactive, key: impl Into<String>) -> ObjectRef {
    ObjectRef {
        object: object.clone(),
        key: key.into(),
    }
}

/// A ref for every current key of `object`, in key order.
pub fn to_refs(object: &Reactive) -> IndexMap<String, ObjectRef> {
    object
        .raw()
        .keys()
        .into_iter()
        .map(|key| (key.clone(), to_ref(object, key)))
        .collect()
}
