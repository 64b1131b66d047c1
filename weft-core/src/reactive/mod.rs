//! Reactive Primitives
//!
//! This module implements the dependency-tracking engine: reactive records,
//! refs, computed values, effects, watchers, effect scopes and the job
//! queue that batches their work.
//!
//! # Concepts
//!
//! ## Reactive records
//!
//! A [`Reactive`] wraps a [`Record`]. Reading a property inside an effect
//! subscribes the effect to that property; writing the property notifies
//! every subscriber. Nested records are wrapped lazily on read.
//!
//! ## Refs and computeds
//!
//! A [`Ref`] is a single reactive cell. A [`Computed`] is a cached value
//! derived from other reactive state that only recomputes when read after
//! one of its inputs changed.
//!
//! ## Effects
//!
//! A [`ReactiveEffect`] is a re-runnable computation that records what it
//! read during its last run. When any of that changes, the effect is marked
//! dirty and its scheduler decides what to do: re-run, queue a job, or
//! notify further subscribers.
//!
//! ## Watchers and scopes
//!
//! [`watch`] turns changes into callbacks with old and new values.
//! [`EffectScope`] groups effects so they can be stopped together.
//!
//! # Implementation Notes
//!
//! Tracking relies on a thread-local stack of running effects. Reads
//! consult the top of the stack; the dependency map and the proxy cache
//! are process-wide and keyed by record identity.

mod computed;
mod context;
mod dep;
mod effect;
mod proxy;
mod refs;
mod runtime;
mod scheduler;
mod scope;
mod subscriber;
mod value;
mod watch;

pub use computed::{computed, computed_with_setter, Computed};
pub use context::{untracked, EffectContext, PauseTracking};
pub use dep::Dep;
pub use effect::{
    effect, effect_with_options, EffectCore, EffectOptions, EffectRunner, ReactiveEffect,
    Scheduler, WeakEffect,
};
pub use proxy::{is_reactive, reactive, to_raw, Reactive};
pub use refs::{ref_value, to_ref, to_refs, ObjectRef, Ref, RefValue};
pub use runtime::{dep_count, forget_target, subscriber_count, track, trigger, TargetId, TrackKey};
pub use scheduler::{
    configure_scheduler, flush_jobs, has_pending_flush, next_tick, pending_jobs, queue_job,
    scheduler_config, Job, JobId, SchedulerConfig, TickDriver,
};
pub use scope::{effect_scope, get_current_scope, on_scope_dispose, EffectScope};
pub use subscriber::{DirtyLevel, EffectId, Subscriber};
pub use value::{same_value, Record, Value};
pub use watch::{traverse, watch, watch_effect, Flush, OnCleanup, WatchHandle, WatchOptions, WatchSource};
