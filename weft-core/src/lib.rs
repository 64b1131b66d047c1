//! Weft Core
//!
//! This crate provides the runtime of the Weft UI toolkit. It implements:
//!
//! - Fine-grained reactivity (reactive records, refs, computeds, effects)
//! - Watchers, effect scopes and a batching job queue
//! - A virtual-node renderer with a minimal-move keyed children diff
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: Dependency tracking and everything built on it
//! - `render`: Virtual nodes, the host abstraction and the reconciler
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::reactive::{computed, effect, Reactive, Record};
//!
//! // Create reactive state
//! let state = Reactive::new(Record::from_fields([("count", 0)]));
//!
//! // Derive a value from it
//! let doubled = computed({
//!     let state = state.clone();
//!     move || state.get("count").and_then(|v| v.as_int()).unwrap_or(0) * 2
//! });
//!
//! // Run an effect whenever it changes
//! let _runner = effect(move || println!("doubled: {}", doubled.get()));
//!
//! state.set("count", 5);
//! // The effect re-runs and prints "doubled: 10"
//! ```

pub mod error;
pub mod reactive;
pub mod render;

pub use error::{Error, Result};
