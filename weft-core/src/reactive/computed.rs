//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. The getter runs inside an effect the first time the value is read,
//!    and the result is cached.
//!
//! 2. When a dependency changes, the effect's scheduler does not recompute.
//!    It leaves the effect dirty and notifies whoever read the computed.
//!
//! 3. The next read sees the dirty flag and recomputes.
//!
//! # Why This Matters
//!
//! A computed that nobody reads never runs its getter, no matter how often
//! its inputs change. Readers always see a value that reflects the latest
//! inputs.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::dep::DepSlot;
use super::effect::{EffectCore, ReactiveEffect};
use super::subscriber::DirtyLevel;
use crate::error::{Error, Result};

type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

/// Marks the computed dirty again if its getter panics, so the stale cache
/// is not served as fresh.
struct RecomputeGuard<'a>(&'a EffectCore);

impl Drop for RecomputeGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.set_dirty_level(DirtyLevel::Dirty);
        }
    }
}

struct ComputedInner<T> {
    effect: ReactiveEffect<T>,
    value: RwLock<Option<T>>,
    dep: Arc<DepSlot>,
    setter: Option<Setter<T>>,
}

/// A lazily evaluated, cached derived value.
///
/// Cloning shares the cache.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(2);
/// let doubled = computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn build<F>(getter: F, setter: Option<Setter<T>>) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let dep = DepSlot::new("computed");
        let effect = ReactiveEffect::new(getter);

        let weak: Weak<DepSlot> = Arc::downgrade(&dep);
        effect.set_scheduler(Arc::new(move || {
            if let Some(dep) = weak.upgrade() {
                dep.trigger();
            }
        }));

        Self {
            inner: Arc::new(ComputedInner {
                effect,
                value: RwLock::new(None),
                dep,
                setter,
            }),
        }
    }

    /// Get the value, recomputing it first if a dependency changed.
    ///
    /// Inside an effect this also subscribes the effect to the computed.
    pub fn get(&self) -> T {
        let cached = if self.inner.effect.dirty() {
            None
        } else {
            self.inner.value.read().clone()
        };

        let value = match cached {
            Some(value) => value,
            None => {
                let _guard = RecomputeGuard(self.inner.effect.core());
                let value = self.inner.effect.run();
                *self.inner.value.write() = Some(value.clone());
                value
            }
        };

        self.inner.dep.track();
        value
    }

    /// Forward `value` to the setter.
    ///
    /// Fails with [`Error::ReadOnlyComputed`] when the computed was created
    /// without one.
    pub fn set(&self, value: T) -> Result<()> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => {
                tracing::warn!(
                    effect = self.inner.effect.id().raw(),
                    "write to a read-only computed ignored"
                );
                Err(Error::ReadOnlyComputed)
            }
        }
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.effect.dirty()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.setter.is_none()
    }

    /// The effect that runs the getter.
    pub fn effect(&self) -> &ReactiveEffect<T> {
        &self.inner.effect
    }

    /// Number of effects subscribed to this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &*self.inner.value.read())
            .field("dirty", &self.is_dirty())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// Create a read-only computed value.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::build(getter, None)
}

/// Create a computed value whose `set` calls `setter`.
pub fn computed_with_setter<T, F, S>(getter: F, setter: S) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    S: Fn(T) + Send + Sync + 'static,
{
    Computed::build(getter, Some(Box::new(setter)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
