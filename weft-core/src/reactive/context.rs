//! Reactive Context
//!
//! The reactive context tracks which effect is currently running and which
//! effect scope is currently collecting effects. This enables automatic
//! dependency tracking: when a reactive value is read, we can register the
//! current effect as a subscriber.
//!
//! # Implementation
//!
//! We use thread-local stacks. Running an effect pushes it onto the effect
//! stack and the returned guard pops it again, so nesting restores the outer
//! effect exactly, including when the effect body panics. The same pattern
//! is used for effect scopes and for regions where tracking is paused.

use std::cell::RefCell;
use std::sync::Arc;

use super::scope::EffectScope;
use super::subscriber::{EffectId, Subscriber};

thread_local! {
    /// Effects currently executing, innermost last.
    static EFFECT_STACK: RefCell<Vec<Arc<dyn Subscriber>>> = RefCell::new(Vec::new());

    /// Effect stack depths at which tracking was paused.
    static PAUSED_AT: RefCell<Vec<usize>> = RefCell::new(Vec::new());

    /// Effect scopes currently collecting, innermost last.
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = RefCell::new(Vec::new());
}

/// Guard that pops the running effect when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct EffectContext {
    effect_id: EffectId,
}

impl EffectContext {
    /// Enter a new reactive context for the given effect.
    ///
    /// While this context is active, any reactive value that is read will
    /// register the effect as a subscriber.
    pub fn enter(effect: Arc<dyn Subscriber>) -> Self {
        let effect_id = effect.core().id();
        EFFECT_STACK.with(|stack| stack.borrow_mut().push(effect));
        Self { effect_id }
    }

    /// Check if any effect is running on this thread.
    pub fn is_active() -> bool {
        EFFECT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the ID of the innermost running effect, if any.
    pub fn current_effect() -> Option<EffectId> {
        EFFECT_STACK.with(|stack| stack.borrow().last().map(|effect| effect.core().id()))
    }

    /// The effect that reads should be attributed to right now.
    ///
    /// Returns `None` outside of any effect and inside an [`untracked`]
    /// region opened by the innermost effect.
    pub fn tracker() -> Option<Arc<dyn Subscriber>> {
        EFFECT_STACK.with(|stack| {
            let stack = stack.borrow();
            let paused = PAUSED_AT.with(|paused| paused.borrow().last() == Some(&stack.len()));
            if paused {
                None
            } else {
                stack.last().cloned()
            }
        })
    }
}

impl Drop for EffectContext {
    fn drop(&mut self) {
        let popped = EFFECT_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(effect) = popped {
            debug_assert_eq!(
                effect.core().id(),
                self.effect_id,
                "EffectContext mismatch: expected {:?}, got {:?}",
                self.effect_id,
                effect.core().id()
            );
        }
    }
}

/// Guard for a region in which reads are not tracked.
///
/// Effects started inside the region track normally; only reads made
/// directly by the effect that was innermost when tracking was paused are
/// ignored.
pub struct PauseTracking {
    depth: usize,
}

impl PauseTracking {
    /// Pause tracking until the guard is dropped.
    pub fn enter() -> Self {
        let depth = EFFECT_STACK.with(|stack| stack.borrow().len());
        PAUSED_AT.with(|paused| paused.borrow_mut().push(depth));
        Self { depth }
    }
}

impl Drop for PauseTracking {
    fn drop(&mut self) {
        let popped = PAUSED_AT.with(|paused| paused.borrow_mut().pop());
        debug_assert_eq!(popped, Some(self.depth), "PauseTracking guards dropped out of order");
    }
}

/// Run `f` without attributing its reads to the running effect.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _pause = PauseTracking::enter();
    f()
}

/// Guard that pops the current effect scope when dropped.
pub(crate) struct ScopeContext {
    _private: (),
}

impl ScopeContext {
    pub(crate) fn enter(scope: EffectScope) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope));
        Self { _private: () }
    }

    /// The innermost scope that is currently collecting effects.
    pub(crate) fn current() -> Option<EffectScope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::ReactiveEffect;

    #[test]
    fn context_tracks_effect() {
        let effect = ReactiveEffect::new(|| ());
        let id = effect.id();

        assert!(!EffectContext::is_active());
        assert!(EffectContext::current_effect().is_none());

        {
            let _ctx = EffectContext::enter(effect.as_subscriber());

            assert!(EffectContext::is_active());
            assert_eq!(EffectContext::current_effect(), Some(id));
        }

        assert!(!EffectContext::is_active());
        assert!(EffectContext::current_effect().is_none());
    }

    #[test]
    fn nested_contexts() {
        let outer = ReactiveEffect::new(|| ());
        let inner = ReactiveEffect::new(|| ());

        {
            let _ctx1 = EffectContext::enter(outer.as_subscriber());
            assert_eq!(EffectContext::current_effect(), Some(outer.id()));

            {
                let _ctx2 = EffectContext::enter(inner.as_subscriber());
                assert_eq!(EffectContext::current_effect(), Some(inner.id()));
            }

            // After inner context drops, outer should be current
            assert_eq!(EffectContext::current_effect(), Some(outer.id()));
        }

        assert!(EffectContext::current_effect().is_none());
    }

    #[test]
    fn untracked_hides_tracker_for_innermost_effect_only() {
        let outer = ReactiveEffect::new(|| ());
        let inner = ReactiveEffect::new(|| ());

        let _ctx = EffectContext::enter(outer.as_subscriber());
        assert!(EffectContext::tracker().is_some());

        untracked(|| {
            assert!(EffectContext::tracker().is_none());

            let _nested = EffectContext::enter(inner.as_subscriber());
            let tracker = EffectContext::tracker().map(|effect| effect.core().id());
            assert_eq!(tracker, Some(inner.id()));
        });

        assert!(EffectContext::tracker().is_some());
    }
}
