//! Virtual-node reconciler.
//!
//! This module contains:
//! - `vnode`: The [`VNode`] tree and its builders
//! - `host`: The [`HostOps`] trait a platform implements
//! - `keyed`: The keyed children diff
//! - `sequence`: Longest increasing subsequence for minimal moves
//! - `renderer`: Mount, patch and unmount against a host
//! - `memory`: An arena-backed host that records its operations
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::render::{h, MemoryHost, Renderer};
//!
//! let mut host = MemoryHost::new();
//! let root = host.create_root();
//! let mut renderer = Renderer::new(host);
//!
//! renderer.render(Some(h("ul").children([h("li").key(1).text("one")])), &root)?;
//! assert_eq!(renderer.host().serialize(root)?, "<ul><li>one</li></ul>");
//! ```

mod host;
mod keyed;
mod memory;
mod renderer;
mod sequence;
mod vnode;

pub use host::{event_name, HostOps, Listener, PropValue};
pub use keyed::{diff_keyed, DiffHandler, DiffStats, KeyedNode};
pub use memory::{HostOp, HostOpLog, MemoryHost, NodeId};
pub use renderer::{mount_reactive, RenderRoot, Renderer};
pub use sequence::longest_increasing_subsequence;
pub use vnode::{fragment, h, text, Children, Key, VNode, VNodeType};
