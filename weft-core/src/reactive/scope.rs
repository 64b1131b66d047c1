//! Effect scopes.
//!
//! A scope collects the effects created while it runs, together with
//! dispose callbacks and child scopes, so that all of them can be stopped
//! with one call. Scopes created inside another scope's `run` become its
//! children unless they are detached.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ScopeContext;
use super::subscriber::Subscriber;

type DisposeHook = Box<dyn FnOnce() + Send>;

struct ScopeInner {
    active: AtomicBool,
    detached: bool,
    effects: Mutex<Vec<Arc<dyn Subscriber>>>,
    cleanups: Mutex<Vec<DisposeHook>>,
    scopes: Mutex<Vec<EffectScope>>,
    parent: Mutex<Option<Weak<ScopeInner>>>,
}

impl ScopeInner {
    /// Stop owned effects and run dispose callbacks. Returns the children.
    fn dispose(&self) -> Vec<EffectScope> {
        let effects = std::mem::take(&mut *self.effects.lock());
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        let scopes = std::mem::take(&mut *self.scopes.lock());

        for effect in &effects {
            effect.stop();
        }
        for cleanup in cleanups {
            cleanup();
        }
        scopes
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            for child in self.dispose() {
                child.stop_from_parent();
            }
        }
    }
}

/// A group of effects that are stopped together.
///
/// Cloning shares the scope.
#[derive(Clone)]
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

impl EffectScope {
    /// Create a scope. Unless `detached`, it becomes a child of the scope
    /// that is currently running.
    pub fn new(detached: bool) -> Self {
        let scope = Self {
            inner: Arc::new(ScopeInner {
                active: AtomicBool::new(true),
                detached,
                effects: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
                scopes: Mutex::new(Vec::new()),
                parent: Mutex::new(None),
            }),
        };

        if !detached {
            if let Some(parent) = ScopeContext::current().filter(EffectScope::is_active) {
                *scope.inner.parent.lock() = Some(Arc::downgrade(&parent.inner));
                parent.inner.scopes.lock().push(scope.clone());
            }
        }

        scope
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    /// Run `f` with this scope collecting effects.
    ///
    /// Returns `None` without calling `f` if the scope was stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            tracing::warn!("cannot run an inactive effect scope");
            return None;
        }
        let _ctx = ScopeContext::enter(self.clone());
        Some(f())
    }

    /// Stop every owned effect, run dispose callbacks and stop child
    /// scopes. The scope is inert afterwards.
    pub fn stop(&self) {
        if !self.halt() {
            return;
        }

        let parent = self.inner.parent.lock().take();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.scopes.lock().retain(|child| !child.ptr_eq(self));
        }
    }

    fn stop_from_parent(&self) {
        if self.halt() {
            self.inner.parent.lock().take();
        }
    }

    fn halt(&self) -> bool {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return false;
        }

        let children = self.inner.dispose();
        tracing::debug!(children = children.len(), "effect scope stopped");
        for child in children {
            child.stop_from_parent();
        }
        true
    }

    /// Number of effects owned by this scope.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }

    /// Number of child scopes.
    pub fn child_count(&self) -> usize {
        self.inner.scopes.lock().len()
    }

    pub fn ptr_eq(&self, other: &EffectScope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn record(&self, effect: Arc<dyn Subscriber>) {
        if self.is_active() {
            let mut effects = self.inner.effects.lock();
            effects.retain(|owned| owned.core().is_active());
            effects.push(effect);
        }
    }

    fn add_cleanup(&self, hook: DisposeHook) {
        self.inner.cleanups.lock().push(hook);
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("detached", &self.is_detached())
            .field("effects", &self.effect_count())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Create an effect scope.
pub fn effect_scope(detached: bool) -> EffectScope {
    EffectScope::new(detached)
}

/// The scope whose `run` is currently executing, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    ScopeContext::current()
}

/// Register `hook` to run when the current scope stops.
///
/// Returns false, without registering, outside of an active scope.
pub fn on_scope_dispose<F>(hook: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    match ScopeContext::current().filter(EffectScope::is_active) {
        Some(scope) => {
            scope.add_cleanup(Box::new(hook));
            true
        }
        None => {
            tracing::warn!("on_scope_dispose called without an active effect scope");
            false
        }
    }
}

/// Hand a new effect to the current scope.
pub(crate) fn record_effect_scope(effect: Arc<dyn Subscriber>) {
    if let Some(scope) = ScopeContext::current() {
        scope.record(effect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::refs::Ref;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn scope_collects_and_stops_effects() {
        let count = Ref::new(0);
        let runs = Arc::new(AtomicI32::new(0));
        let scope = effect_scope(false);

        let tracked = count.clone();
        let runs_clone = runs.clone();
        scope.run(move || {
            // The scope keeps the effect alive after the runner is dropped.
            let _runner = effect(move || {
                tracked.get();
                runs_clone.fetch_add(1, Ordering::SeqCst);
            });
        });
        assert_eq!(scope.effect_count(), 1);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        scope.stop();
        assert!(!scope.is_active());
        count.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn stopped_effects_are_released_by_their_scope() {
        let scope = effect_scope(false);

        scope.run(|| {
            for _ in 0..10 {
                effect(|| ()).stop();
            }
            let _live = effect(|| ());
        });
        assert_eq!(scope.effect_count(), 1);
    }

    #[test]
    fn nested_scopes_stop_with_parent() {
        let parent = effect_scope(false);
        let (child, detached) = parent
            .run(|| (effect_scope(false), effect_scope(true)))
            .expect("active");
        assert_eq!(parent.child_count(), 1);

        parent.stop();
        assert!(!child.is_active());
        assert!(detached.is_active());
    }

    #[test]
    fn stopping_child_detaches_it_from_parent() {
        let parent = effect_scope(false);
        let child = parent.run(|| effect_scope(false)).expect("active");
        assert_eq!(parent.child_count(), 1);

        child.stop();
        assert_eq!(parent.child_count(), 0);
        assert!(parent.is_active());
    }

    #[test]
    fn dispose_callbacks_run_once() {
        let disposed = Arc::new(AtomicI32::new(0));
        let scope = effect_scope(false);

        let disposed_clone = disposed.clone();
        scope.run(move || {
            assert!(get_current_scope().is_some());
            assert!(on_scope_dispose(move || {
                disposed_clone.fetch_add(1, Ordering::SeqCst);
            }));
        });

        scope.stop();
        scope.stop();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inactive_scope_does_not_run() {
        let scope = effect_scope(false);
        scope.stop();
        assert_eq!(scope.run(|| 1), None);
    }

    #[test]
    fn dispose_outside_scope_is_rejected() {
        assert!(get_current_scope().is_none());
        assert!(!on_scope_dispose(|| ()));
    }
}
