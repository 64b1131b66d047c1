//! Effect Implementation
//!
//! An effect is a re-runnable computation that records which reactive
//! locations it read during its last run. When one of them changes, the
//! effect is marked dirty and its scheduler decides what happens next.
//!
//! # How Effects Work
//!
//! 1. An effect is created inert. `run()` pushes it as the current effect,
//!    bumps its track id and rewinds its dependency cursor.
//!
//! 2. Every tracked read during the run writes the read's [`Dep`] into the
//!    next cursor slot. A Dep that was already in that slot is reused; a
//!    different one replaces it and the old occupant is released.
//!
//! 3. When the run ends (normally or by panic) every Dep past the cursor is
//!    released. This is how a branch that is no longer taken stops
//!    triggering the effect.
//!
//! 4. A write to a tracked location marks the effect dirty and calls its
//!    scheduler. The [`effect`] helper installs a scheduler that simply
//!    runs the effect again; watchers, computeds and render effects install
//!    their own.
//!
//! # Lifetime
//!
//! Deps refer to effects weakly. An effect stays alive while a handle
//! (`ReactiveEffect`, `EffectRunner`, a computed or watcher) or the effect
//! scope it was created in holds it. Dropping the last handle stops it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::EffectContext;
use super::dep::{cleanup_dep_effect, Dep};
use super::scope::record_effect_scope;
use super::subscriber::{DirtyLevel, EffectId, Subscriber};

/// Callback invoked when an effect's dependencies change.
pub type Scheduler = Arc<dyn Fn() + Send + Sync>;

type StopHook = Box<dyn FnOnce() + Send>;

/// The Deps an effect read during its current or last run.
struct Tracking {
    deps: SmallVec<[Arc<Dep>; 4]>,
    /// Cursor: the number of slots confirmed by the current run.
    len: usize,
}

/// Untyped bookkeeping shared by every kind of effect.
pub struct EffectCore {
    id: EffectId,
    active: AtomicBool,
    dirty: AtomicU8,
    running: AtomicUsize,
    track_id: AtomicU64,
    tracking: Mutex<Tracking>,
}

impl EffectCore {
    fn new() -> Self {
        Self {
            id: EffectId::new(),
            active: AtomicBool::new(true),
            dirty: AtomicU8::new(DirtyLevel::Dirty as u8),
            running: AtomicUsize::new(0),
            track_id: AtomicU64::new(0),
            tracking: Mutex::new(Tracking {
                deps: SmallVec::new(),
                len: 0,
            }),
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn dirty_level(&self) -> DirtyLevel {
        DirtyLevel::from_u8(self.dirty.load(Ordering::SeqCst))
    }

    /// Whether a dependency changed since the last run.
    pub fn dirty(&self) -> bool {
        self.dirty_level() >= DirtyLevel::Dirty
    }

    pub(crate) fn set_dirty_level(&self, level: DirtyLevel) {
        self.dirty.store(level as u8, Ordering::SeqCst);
    }

    /// Whether the effect is somewhere on the current effect stack.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }

    /// Identifier of the current (or last) run.
    pub fn track_id(&self) -> u64 {
        self.track_id.load(Ordering::SeqCst)
    }

    /// Number of Deps the effect is subscribed to.
    pub fn dep_count(&self) -> usize {
        self.tracking.lock().deps.len()
    }

    fn pre_clean(&self) {
        self.tracking.lock().len = 0;
        self.track_id.fetch_add(1, Ordering::SeqCst);
    }

    fn post_clean(&self) {
        let stale: SmallVec<[Arc<Dep>; 4]> = {
            let mut tracking = self.tracking.lock();
            let len = tracking.len;
            if tracking.deps.len() <= len {
                return;
            }
            tracking.deps.drain(len..).collect()
        };

        for dep in stale {
            cleanup_dep_effect(&dep, self);
        }
    }

    /// Write `dep` into the next cursor slot, returning the Dep it displaced.
    pub(crate) fn place_dep(&self, dep: &Arc<Dep>) -> Option<Arc<Dep>> {
        let mut tracking = self.tracking.lock();
        let slot = tracking.len;
        tracking.len += 1;

        match tracking.deps.get_mut(slot) {
            Some(existing) if Arc::ptr_eq(existing, dep) => None,
            Some(existing) => Some(std::mem::replace(existing, Arc::clone(dep))),
            None => {
                tracking.deps.push(Arc::clone(dep));
                None
            }
        }
    }

    /// Release every Dep and deactivate. Returns false if already stopped.
    fn stop(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.pre_clean();
        self.post_clean();
        tracing::debug!(effect = self.id.raw(), "effect stopped");
        true
    }
}

impl fmt::Debug for EffectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectCore")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("dirty", &self.dirty_level())
            .field("running", &self.is_running())
            .field("deps", &self.dep_count())
            .finish()
    }
}

struct EffectInner<T> {
    core: EffectCore,
    getter: Box<dyn Fn() -> T + Send + Sync>,
    scheduler: Mutex<Option<Scheduler>>,
    on_stop: Mutex<Option<StopHook>>,
}

impl<T> EffectInner<T> {
    fn halt(&self) {
        if self.core.stop() {
            let hook = self.on_stop.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}

impl<T: 'static> Subscriber for EffectInner<T> {
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn notify(&self) {
        let scheduler = self.scheduler.lock().clone();
        if let Some(scheduler) = scheduler {
            scheduler();
        }
    }

    fn stop(&self) {
        self.halt();
    }
}

impl<T> Drop for EffectInner<T> {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Restores effect bookkeeping when a run ends, including by panic.
struct RunGuard {
    effect: Arc<dyn Subscriber>,
    // Dropped after `Drop::drop` has pruned, which pops the effect stack.
    _context: EffectContext,
}

impl RunGuard {
    fn enter(effect: Arc<dyn Subscriber>) -> Self {
        let context = EffectContext::enter(Arc::clone(&effect));
        let core = effect.core();
        core.pre_clean();
        core.running.fetch_add(1, Ordering::SeqCst);
        Self {
            effect,
            _context: context,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let core = self.effect.core();
        core.running.fetch_sub(1, Ordering::SeqCst);
        core.post_clean();
    }
}

/// A re-runnable computation with dependency tracking.
///
/// Cloning shares the same underlying effect.
///
/// # Example
///
/// ```rust,ignore
/// let state = reactive(Record::from_fields([("count", 0)]));
///
/// let effect = ReactiveEffect::new(move || state.get("count"));
/// effect.run();               // subscribes to `count`
/// state.set("count", 1);      // marks the effect dirty
/// assert!(effect.dirty());
/// ```
pub struct ReactiveEffect<T> {
    inner: Arc<EffectInner<T>>,
}

impl<T: 'static> ReactiveEffect<T> {
    /// Create an inert effect without a scheduler.
    ///
    /// The effect is recorded in the active effect scope, if any.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Self {
            inner: Arc::new(EffectInner {
                core: EffectCore::new(),
                getter: Box::new(getter),
                scheduler: Mutex::new(None),
                on_stop: Mutex::new(None),
            }),
        };
        record_effect_scope(effect.as_subscriber());
        effect
    }

    /// Create an inert effect with the given scheduler.
    pub fn with_scheduler<F>(getter: F, scheduler: Scheduler) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Self::new(getter);
        effect.set_scheduler(scheduler);
        effect
    }

    /// Replace the scheduler.
    pub fn set_scheduler(&self, scheduler: Scheduler) {
        *self.inner.scheduler.lock() = Some(scheduler);
    }

    /// Register a hook that runs once when the effect stops.
    pub fn set_on_stop<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.inner.on_stop.lock() = Some(Box::new(hook));
    }

    /// Run the getter.
    ///
    /// An active effect tracks the reads made by the getter and replaces its
    /// previous dependencies with them. A stopped effect just calls the
    /// getter.
    pub fn run(&self) -> T {
        self.inner.core.set_dirty_level(DirtyLevel::NotDirty);

        if !self.inner.core.is_active() {
            return (self.inner.getter)();
        }

        let _guard = RunGuard::enter(self.as_subscriber());
        (self.inner.getter)()
    }

    /// Stop the effect permanently and release all its dependencies.
    pub fn stop(&self) {
        self.inner.halt();
    }

    /// The effect as a type-erased subscriber.
    pub fn as_subscriber(&self) -> Arc<dyn Subscriber> {
        let inner: Arc<EffectInner<T>> = Arc::clone(&self.inner);
        inner
    }

    pub fn downgrade(&self) -> WeakEffect<T> {
        WeakEffect {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T> ReactiveEffect<T> {
    pub fn id(&self) -> EffectId {
        self.inner.core.id
    }

    pub fn core(&self) -> &EffectCore {
        &self.inner.core
    }

    pub fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    /// Whether a dependency changed since the last run.
    pub fn dirty(&self) -> bool {
        self.inner.core.dirty()
    }

    pub fn dep_count(&self) -> usize {
        self.inner.core.dep_count()
    }
}

impl<T> Clone for ReactiveEffect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ReactiveEffect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("core", &self.inner.core)
            .finish()
    }
}

/// A non-owning reference to a [`ReactiveEffect`].
pub struct WeakEffect<T> {
    inner: Weak<EffectInner<T>>,
}

impl<T> WeakEffect<T> {
    pub fn upgrade(&self) -> Option<ReactiveEffect<T>> {
        self.inner.upgrade().map(|inner| ReactiveEffect { inner })
    }
}

impl<T> Clone for WeakEffect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

/// Options for [`effect_with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Called instead of re-running when a dependency changes.
    pub scheduler: Option<Scheduler>,

    /// Skip the initial run.
    pub lazy: bool,

    /// Runs once when the effect is stopped.
    pub on_stop: Option<StopHook>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_stop = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("scheduler", &self.scheduler.is_some())
            .field("lazy", &self.lazy)
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

/// Handle returned by [`effect`]. Keeps the effect alive.
#[must_use = "the effect stops when its runner is dropped"]
pub struct EffectRunner<T> {
    effect: ReactiveEffect<T>,
}

impl<T: 'static> EffectRunner<T> {
    /// Run the effect now, regardless of its dirty state.
    pub fn run(&self) -> T {
        self.effect.run()
    }

    pub fn stop(&self) {
        self.effect.stop();
    }

    /// The underlying effect.
    pub fn effect(&self) -> &ReactiveEffect<T> {
        &self.effect
    }
}

impl<T> Clone for EffectRunner<T> {
    fn clone(&self) -> Self {
        Self {
            effect: self.effect.clone(),
        }
    }
}

impl<T> fmt::Debug for EffectRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRunner")
            .field("effect", &self.effect)
            .finish()
    }
}

/// Create an effect that runs now and again whenever its dependencies
/// change.
pub fn effect<T, F>(f: F) -> EffectRunner<T>
where
    T: 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    effect_with_options(f, EffectOptions::default())
}

/// Create an effect with a custom scheduler, lazy start or stop hook.
pub fn effect_with_options<T, F>(f: F, options: EffectOptions) -> EffectRunner<T>
where
    T: 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let effect = ReactiveEffect::new(f);

    let scheduler = match options.scheduler {
        Some(scheduler) => scheduler,
        None => {
            let weak = effect.downgrade();
            Arc::new(move || {
                if let Some(effect) = weak.upgrade() {
                    if effect.dirty() {
                        effect.run();
                    }
                }
            })
        }
    };
    effect.set_scheduler(scheduler);

    if let Some(hook) = options.on_stop {
        *effect.inner.on_stop.lock() = Some(hook);
    }

    if !options.lazy {
        effect.run();
    }

    EffectRunner { effect }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
