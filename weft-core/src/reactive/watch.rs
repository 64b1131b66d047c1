//! Watchers.
//!
//! A watcher runs a getter inside an effect and calls a callback with the
//! new and previous value whenever one of the getter's dependencies
//! changes.
//!
//! # How Watchers Work
//!
//! 1. The source is turned into a getter. Reactive records are traversed
//!    deeply so that a change anywhere inside them counts.
//!
//! 2. Unless `immediate` is set, the getter runs once to capture the
//!    initial value and the callback is not called.
//!
//! 3. When a dependency changes, the watcher's job re-runs the getter, runs
//!    the cleanup registered by the previous callback, then calls the
//!    callback. With [`Flush::Queued`] the job goes through the job queue
//!    instead of running on the spot.
//!
//! 4. Stopping the watcher runs the pending cleanup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::computed::Computed;
use super::context::untracked;
use super::effect::{ReactiveEffect, Scheduler};
use super::proxy::Reactive;
use super::refs::{Ref, RefValue};
use super::runtime::TargetId;
use super::scheduler::{queue_job, Job};
use super::subscriber::Subscriber;
use super::value::Value;

/// When a triggered watcher runs its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flush {
    /// Run the job as soon as the source changes.
    #[default]
    Sync,

    /// Queue the job and run it at the next flush.
    Queued,
}

/// Options for [`watch`] and [`watch_effect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Call the callback right away with no previous value.
    pub immediate: bool,

    /// `Some(false)` watches only the top level of a reactive source.
    /// `Some(true)` traverses `Ref<Value>` sources as well.
    pub deep: Option<bool>,

    /// Maximum traversal depth for deep sources.
    pub depth: Option<usize>,

    pub flush: Flush,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = Some(deep);
        self
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }

    fn traversal_depth(&self) -> usize {
        match self.deep {
            Some(false) => 1,
            _ => self.depth.unwrap_or(usize::MAX),
        }
    }
}

type Getter<T> = Box<dyn Fn() -> T + Send + Sync>;
type CleanupHook = Box<dyn FnOnce() + Send>;

/// Something a watcher can observe.
pub trait WatchSource {
    type Value: Clone + Send + Sync + 'static;

    /// Build the getter the watcher's effect runs.
    fn into_getter(self, options: &WatchOptions) -> Getter<Self::Value>;
}

impl WatchSource for Reactive {
    type Value = Value;

    fn into_getter(self, options: &WatchOptions) -> Getter<Value> {
        let depth = options.traversal_depth();
        let value = Value::Reactive(self);
        Box::new(move || {
            traverse(&value, depth);
            value.clone()
        })
    }
}

impl<T: RefValue> WatchSource for Ref<T> {
    type Value = T;

    fn into_getter(self, options: &WatchOptions) -> Getter<T> {
        let deep = options.deep == Some(true) || options.depth.is_some();
        let depth = options.traversal_depth();
        Box::new(move || {
            let value = self.get();
            if deep {
                value.traverse(depth);
            }
            value
        })
    }
}

impl<T> WatchSource for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn into_getter(self, _options: &WatchOptions) -> Getter<T> {
        Box::new(move || self.get())
    }
}

impl<T, F> WatchSource for F
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    type Value = T;

    fn into_getter(self, _options: &WatchOptions) -> Getter<T> {
        Box::new(self)
    }
}

/// Read every property reachable from `value`, up to `depth` levels.
///
/// Inside an effect this subscribes the effect to the whole structure.
/// Records that were already visited at the same or a greater depth are
/// skipped, so cyclic structures terminate.
pub fn traverse(value: &Value, depth: usize) {
    let mut seen = HashMap::new();
    traverse_inner(value, depth, &mut seen);
}

fn traverse_inner(value: &Value, depth: usize, seen: &mut HashMap<TargetId, usize>) {
    if depth == 0 {
        return;
    }

    match value {
        Value::Reactive(reactive) => {
            if !mark_seen(seen, reactive.id(), depth) {
                return;
            }
            for key in reactive.keys() {
                if let Some(child) = reactive.get(&key) {
                    traverse_inner(&child, depth - 1, seen);
                }
            }
        }
        Value::Record(record) => {
            if !mark_seen(seen, record.id(), depth) {
                return;
            }
            for (_, child) in record.entries() {
                traverse_inner(&child, depth - 1, seen);
            }
        }
        Value::Ref(r) => traverse_inner(&r.get(), depth - 1, seen),
        _ => {}
    }
}

fn mark_seen(seen: &mut HashMap<TargetId, usize>, id: TargetId, depth: usize) -> bool {
    match seen.get(&id) {
        Some(&visited) if visited >= depth => false,
        _ => {
            seen.insert(id, depth);
            true
        }
    }
}

/// Registers the cleanup for a watcher callback or watch effect body.
///
/// The cleanup runs before the next callback and when the watcher stops.
/// Registering again replaces the previous cleanup.
#[derive(Default)]
pub struct OnCleanup {
    hook: Option<CleanupHook>,
}

impl OnCleanup {
    pub fn register<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
    }
}

impl fmt::Debug for OnCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnCleanup")
            .field("registered", &self.hook.is_some())
            .finish()
    }
}

type Callback<T> = Box<dyn FnMut(&T, Option<&T>, &mut OnCleanup) + Send>;

struct WatchState<T> {
    old: Option<T>,
    cleanup: Option<CleanupHook>,
    callback: Option<Callback<T>>,
    pending: bool,
}

fn run_cleanup(slot: &Mutex<Option<CleanupHook>>) {
    let hook = slot.lock().take();
    if let Some(hook) = hook {
        untracked(hook);
    }
}

fn run_state_cleanup<T>(state: &Mutex<WatchState<T>>) {
    let hook = state.lock().cleanup.take();
    if let Some(hook) = hook {
        untracked(hook);
    }
}

/// Puts the callback back when the call ends, including by panic.
struct CallbackGuard<'a, T> {
    state: &'a Mutex<WatchState<T>>,
    callback: Option<Callback<T>>,
}

impl<T> Drop for CallbackGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            self.state.lock().callback = Some(callback);
        }
    }
}

fn watch_job<T>(effect: &ReactiveEffect<T>, state: &Mutex<WatchState<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    loop {
        if !effect.is_active() || !effect.dirty() {
            return;
        }

        {
            let mut state = state.lock();
            if state.callback.is_none() {
                // The callback is running further up the stack; it picks
                // this change up once it returns.
                state.pending = true;
                return;
            }
        }

        let new = effect.run();
        run_state_cleanup(state);

        let (callback, old) = {
            let mut state = state.lock();
            state.pending = false;
            (state.callback.take(), state.old.take())
        };

        let Some(callback) = callback else {
            state.lock().old = old;
            return;
        };

        let mut guard = CallbackGuard {
            state,
            callback: Some(callback),
        };
        let mut on_cleanup = OnCleanup::default();
        if let Some(callback) = guard.callback.as_mut() {
            untracked(|| callback(&new, old.as_ref(), &mut on_cleanup));
        }
        drop(guard);

        let mut state = state.lock();
        state.old = Some(new);
        state.cleanup = on_cleanup.hook;
        if !std::mem::take(&mut state.pending) {
            return;
        }
    }
}

fn job_scheduler(
    job: Arc<dyn Fn() + Send + Sync>,
    flush: Flush,
    owner: &Arc<dyn Subscriber>,
) -> Scheduler {
    match flush {
        Flush::Sync => job,
        Flush::Queued => {
            let job = Job::new(move || job()).owned_by(owner);
            Arc::new(move || {
                queue_job(&job);
            })
        }
    }
}

/// Handle to a running watcher.
///
/// The watcher stops when `stop` is called or when the last owner of its
/// effect goes away: this handle, or the effect scope it was created in.
#[must_use = "the watcher stops when its handle is dropped outside an effect scope"]
pub struct WatchHandle {
    effect: Arc<dyn Subscriber>,
}

impl WatchHandle {
    /// Stop watching and run the pending cleanup.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.core().is_active()
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", self.effect.core())
            .finish()
    }
}

/// Call `callback` whenever `source` changes.
///
/// The callback receives the new value, the previous value (absent on an
/// immediate first call) and an [`OnCleanup`] registrar.
pub fn watch<S, C>(source: S, callback: C, options: WatchOptions) -> WatchHandle
where
    S: WatchSource,
    C: FnMut(&S::Value, Option<&S::Value>, &mut OnCleanup) + Send + 'static,
{
    let getter = source.into_getter(&options);
    let effect = ReactiveEffect::new(getter);

    let state = Arc::new(Mutex::new(WatchState {
        old: None,
        cleanup: None,
        callback: Some(Box::new(callback) as Callback<S::Value>),
        pending: false,
    }));

    let job: Arc<dyn Fn() + Send + Sync> = {
        let weak = effect.downgrade();
        let state = Arc::clone(&state);
        Arc::new(move || {
            if let Some(effect) = weak.upgrade() {
                watch_job(&effect, &state);
            }
        })
    };

    let subscriber = effect.as_subscriber();
    effect.set_scheduler(job_scheduler(Arc::clone(&job), options.flush, &subscriber));

    {
        let state = Arc::clone(&state);
        effect.set_on_stop(move || run_state_cleanup(&state));
    }

    if options.immediate {
        job();
    } else {
        let initial = effect.run();
        state.lock().old = Some(initial);
    }

    WatchHandle { effect: subscriber }
}

/// Run `body` now and again whenever anything it read changes.
///
/// The cleanup registered through [`OnCleanup`] runs before each re-run and
/// when the watcher stops.
pub fn watch_effect<F>(body: F, options: WatchOptions) -> WatchHandle
where
    F: Fn(&mut OnCleanup) + Send + Sync + 'static,
{
    let cleanup: Arc<Mutex<Option<CleanupHook>>> = Arc::new(Mutex::new(None));

    let effect = {
        let cleanup = Arc::clone(&cleanup);
        ReactiveEffect::new(move || {
            run_cleanup(&cleanup);
            let mut on_cleanup = OnCleanup::default();
            body(&mut on_cleanup);
            *cleanup.lock() = on_cleanup.hook;
        })
    };

    let job: Arc<dyn Fn() + Send + Sync> = {
        let weak = effect.downgrade();
        Arc::new(move || {
            if let Some(effect) = weak.upgrade() {
                if effect.is_active() && effect.dirty() {
                    effect.run();
                }
            }
        })
    };

    let subscriber = effect.as_subscriber();
    effect.set_scheduler(job_scheduler(job, options.flush, &subscriber));
    effect.set_on_stop(move || run_cleanup(&cleanup));

    effect.run();
    WatchHandle { effect: subscriber }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
