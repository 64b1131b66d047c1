//! The renderer.
//!
//! Turns vnode trees into host nodes and keeps them in sync: each call to
//! [`Renderer::render`] patches the tree rendered last time into the new one
//! with as few host operations as it can. [`mount_reactive`] wires a render
//! function to the reactive runtime so the tree re-renders, batched through
//! the job queue, whenever state it read changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::host::{HostOps, PropValue};
use super::keyed::{diff_keyed, DiffHandler, KeyedNode};
use super::vnode::{text, Children, VNode, VNodeType};
use crate::error::{Error, Result};
use crate::reactive::{queue_job, Job, ReactiveEffect};

/// Renders vnode trees into a host.
pub struct Renderer<H: HostOps> {
    host: H,
    roots: HashMap<H::Node, VNode<H::Node>>,
}

impl<H: HostOps> Renderer<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            roots: HashMap::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The tree last rendered into `container`.
    pub fn root(&self, container: &H::Node) -> Option<&VNode<H::Node>> {
        self.roots.get(container)
    }

    /// Render `vnode` into `container`.
    ///
    /// The first render mounts, later renders patch against the previous
    /// tree and `None` unmounts whatever is there.
    ///
    /// If the host fails, the previous tree stays recorded for `container`
    /// so the next render patches the nodes that are still attached.
    pub fn render(&mut self, vnode: Option<VNode<H::Node>>, container: &H::Node) -> Result<()> {
        let previous = self.roots.remove(container);
        match (previous, vnode) {
            (Some(old), Some(mut new)) => {
                if let Err(err) = self.patch(&old, &mut new, container) {
                    self.roots.insert(container.clone(), old);
                    return Err(err);
                }
                self.roots.insert(container.clone(), new);
            }
            (None, Some(mut new)) => {
                self.mount(&mut new, container, None)?;
                self.roots.insert(container.clone(), new);
            }
            (Some(old), None) => {
                if let Err(err) = self.unmount(&old) {
                    self.roots.insert(container.clone(), old);
                    return Err(err);
                }
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Patch `old` into `new`. `new` takes over `old`'s host nodes when
    /// both are the same node; otherwise `old` is replaced in place.
    fn patch(
        &mut self,
        old: &VNode<H::Node>,
        new: &mut VNode<H::Node>,
        container: &H::Node,
    ) -> Result<()> {
        if !old.same_node(new) {
            let anchor = self.next_node(old)?;
            self.unmount(old)?;
            return self.mount(new, container, anchor.as_ref());
        }

        match new.node_type {
            VNodeType::Text => {
                let el = old.el.clone().ok_or(Error::missing_element("patch text"))?;
                let next = new.text_content().unwrap_or_default();
                if old.text_content().unwrap_or_default() != next {
                    self.host.set_text(&el, next)?;
                }
                new.el = Some(el);
            }
            VNodeType::Element(_) => {
                let el = old
                    .el
                    .clone()
                    .ok_or(Error::missing_element("patch element"))?;
                self.patch_props(&el, &old.props, &new.props)?;
                self.patch_children(old, new, &el, None)?;
                new.el = Some(el);
            }
            VNodeType::Fragment => {
                let start = old
                    .el
                    .clone()
                    .ok_or(Error::missing_element("patch fragment"))?;
                let end = old
                    .anchor
                    .clone()
                    .ok_or(Error::missing_element("patch fragment end"))?;
                normalize_fragment(new);
                self.patch_children(old, new, container, Some(&end))?;
                new.el = Some(start);
                new.anchor = Some(end);
            }
        }
        Ok(())
    }

    fn mount(
        &mut self,
        vnode: &mut VNode<H::Node>,
        container: &H::Node,
        anchor: Option<&H::Node>,
    ) -> Result<()> {
        match vnode.node_type.clone() {
            VNodeType::Text => {
                let node = self
                    .host
                    .create_text(vnode.text_content().unwrap_or_default())?;
                self.host.insert(&node, container, anchor)?;
                vnode.el = Some(node);
            }
            VNodeType::Element(tag) => {
                let el = self.host.create_element(&tag)?;
                for (key, value) in &vnode.props {
                    self.host.patch_prop(&el, key, None, Some(value))?;
                }
                match &mut vnode.children {
                    Children::Empty => {}
                    Children::Text(content) => self.host.set_element_text(&el, content)?,
                    Children::Nodes(children) => {
                        for child in children.iter_mut() {
                            self.mount(child, &el, None)?;
                        }
                    }
                }
                self.host.insert(&el, container, anchor)?;
                vnode.el = Some(el);
            }
            VNodeType::Fragment => {
                normalize_fragment(vnode);
                let start = self.host.create_text("")?;
                let end = self.host.create_text("")?;
                self.host.insert(&start, container, anchor)?;
                self.host.insert(&end, container, anchor)?;
                if let Children::Nodes(children) = &mut vnode.children {
                    for child in children.iter_mut() {
                        self.mount(child, container, Some(&end))?;
                    }
                }
                vnode.el = Some(start);
                vnode.anchor = Some(end);
            }
        }
        tracing::trace!(node = ?vnode.el, "mounted vnode");
        Ok(())
    }

    fn unmount(&mut self, vnode: &VNode<H::Node>) -> Result<()> {
        let el = vnode
            .el
            .as_ref()
            .ok_or(Error::missing_element("unmount"))?;

        if vnode.is_fragment() {
            if let Children::Nodes(children) = &vnode.children {
                for child in children {
                    self.unmount(child)?;
                }
            }
            self.host.remove(el)?;
            if let Some(end) = &vnode.anchor {
                self.host.remove(end)?;
            }
        } else {
            self.host.remove(el)?;
        }
        tracing::trace!(node = ?el, "unmounted vnode");
        Ok(())
    }

    /// Move the host nodes of a mounted vnode before `anchor`.
    fn move_node(
        &mut self,
        vnode: &VNode<H::Node>,
        container: &H::Node,
        anchor: Option<&H::Node>,
    ) -> Result<()> {
        let el = vnode
            .el
            .as_ref()
            .ok_or(Error::missing_element("move"))?;

        if vnode.is_fragment() {
            self.host.insert(el, container, anchor)?;
            if let Children::Nodes(children) = &vnode.children {
                for child in children {
                    self.move_node(child, container, anchor)?;
                }
            }
            if let Some(end) = &vnode.anchor {
                self.host.insert(end, container, anchor)?;
            }
            Ok(())
        } else {
            self.host.insert(el, container, anchor)
        }
    }

    /// The host node right after everything `vnode` rendered.
    fn next_node(&self, vnode: &VNode<H::Node>) -> Result<Option<H::Node>> {
        let last = vnode
            .anchor
            .as_ref()
            .or(vnode.el.as_ref())
            .ok_or(Error::missing_element("next sibling"))?;
        self.host.next_sibling(last)
    }

    fn patch_props(
        &mut self,
        el: &H::Node,
        old: &IndexMap<String, PropValue>,
        new: &IndexMap<String, PropValue>,
    ) -> Result<()> {
        for (key, next) in new {
            let prev = old.get(key);
            if prev != Some(next) {
                self.host.patch_prop(el, key, prev, Some(next))?;
            }
        }
        for (key, prev) in old {
            if !new.contains_key(key) {
                self.host.patch_prop(el, key, Some(prev), None)?;
            }
        }
        Ok(())
    }

    /// Reconcile children. `container` is the element that holds them and
    /// `anchor` closes the range for fragment children.
    fn patch_children(
        &mut self,
        old: &VNode<H::Node>,
        new: &mut VNode<H::Node>,
        container: &H::Node,
        anchor: Option<&H::Node>,
    ) -> Result<()> {
        match (&old.children, &mut new.children) {
            (Children::Nodes(previous), Children::Nodes(next)) => {
                let mut handler = ChildDiff {
                    renderer: self,
                    parent: container,
                    parent_anchor: anchor,
                };
                let stats = diff_keyed(previous, next, &mut handler)?;
                tracing::debug!(
                    patched = stats.patched,
                    mounted = stats.mounted,
                    moved = stats.moved,
                    unmounted = stats.unmounted,
                    "patched children"
                );
            }
            (Children::Nodes(previous), Children::Text(content)) => {
                for child in previous {
                    self.unmount(child)?;
                }
                self.host.set_element_text(container, content)?;
            }
            (Children::Nodes(previous), Children::Empty) => {
                for child in previous {
                    self.unmount(child)?;
                }
            }
            (Children::Text(before), Children::Text(after)) => {
                if before.as_str() != after.as_str() {
                    self.host.set_element_text(container, after)?;
                }
            }
            (Children::Text(_), Children::Nodes(next)) => {
                self.host.set_element_text(container, "")?;
                for child in next.iter_mut() {
                    self.mount(child, container, anchor)?;
                }
            }
            (Children::Text(_), Children::Empty) => {
                self.host.set_element_text(container, "")?;
            }
            (Children::Empty, Children::Text(content)) => {
                self.host.set_element_text(container, content)?;
            }
            (Children::Empty, Children::Nodes(next)) => {
                for child in next.iter_mut() {
                    self.mount(child, container, anchor)?;
                }
            }
            (Children::Empty, Children::Empty) => {}
        }
        Ok(())
    }
}

impl<H: HostOps + fmt::Debug> fmt::Debug for Renderer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("host", &self.host)
            .field("roots", &self.roots.len())
            .finish()
    }
}

/// Fragment children live between two markers, so a text child becomes a
/// text vnode.
fn normalize_fragment<N>(vnode: &mut VNode<N>) {
    match std::mem::replace(&mut vnode.children, Children::Empty) {
        Children::Text(content) => vnode.children = Children::Nodes(vec![text(content)]),
        Children::Empty => vnode.children = Children::Nodes(Vec::new()),
        nodes => vnode.children = nodes,
    }
}

/// Applies the keyed diff of one children list to the host.
struct ChildDiff<'a, H: HostOps> {
    renderer: &'a mut Renderer<H>,
    parent: &'a H::Node,
    parent_anchor: Option<&'a H::Node>,
}

impl<H: HostOps> ChildDiff<'_, H> {
    fn anchor_of(&self, anchor: Option<&VNode<H::Node>>) -> Result<Option<H::Node>> {
        match anchor {
            Some(vnode) => vnode
                .el
                .clone()
                .map(Some)
                .ok_or(Error::missing_element("diff anchor")),
            None => Ok(self.parent_anchor.cloned()),
        }
    }
}

impl<H: HostOps> DiffHandler<VNode<H::Node>> for ChildDiff<'_, H> {
    type Error = Error;

    fn patch(&mut self, old: &VNode<H::Node>, new: &mut VNode<H::Node>) -> Result<()> {
        self.renderer.patch(old, new, self.parent)
    }

    fn mount(&mut self, node: &mut VNode<H::Node>, anchor: Option<&VNode<H::Node>>) -> Result<()> {
        let anchor = self.anchor_of(anchor)?;
        self.renderer.mount(node, self.parent, anchor.as_ref())
    }

    fn move_before(
        &mut self,
        node: &VNode<H::Node>,
        anchor: Option<&VNode<H::Node>>,
    ) -> Result<()> {
        let anchor = self.anchor_of(anchor)?;
        self.renderer.move_node(node, self.parent, anchor.as_ref())
    }

    fn unmount(&mut self, node: &VNode<H::Node>) -> Result<()> {
        self.renderer.unmount(node)
    }
}

// ----------------------------------------------------------------------------
// Reactive mounting
// ----------------------------------------------------------------------------

/// A render function bound to a container.
///
/// Dropping the root stops re-rendering (unless an effect scope also owns
/// the render effect) but leaves the host nodes in place; call
/// [`RenderRoot::unmount`] to remove them.
#[must_use = "dropping the root stops re-rendering"]
pub struct RenderRoot<H: HostOps> {
    effect: ReactiveEffect<Result<()>>,
    renderer: Arc<Mutex<Renderer<H>>>,
    container: H::Node,
}

impl<H> RenderRoot<H>
where
    H: HostOps + Send + 'static,
    H::Node: Send + Sync + 'static,
{
    /// Re-render now, without waiting for a flush.
    pub fn update(&self) -> Result<()> {
        self.effect.run()
    }

    /// Stop re-rendering.
    pub fn stop(&self) {
        self.effect.stop();
    }

    /// Stop re-rendering and remove the rendered tree.
    pub fn unmount(&self) -> Result<()> {
        self.effect.stop();
        self.renderer.lock().render(None, &self.container)
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    pub fn container(&self) -> &H::Node {
        &self.container
    }
}

impl<H: HostOps> fmt::Debug for RenderRoot<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRoot")
            .field("effect", &self.effect)
            .field("container", &self.container)
            .finish()
    }
}

/// Render `render_fn` into `container` now, and again whenever reactive
/// state it read changes.
///
/// Changes do not re-render synchronously: the first one queues an update
/// job and the rest join it, so any number of mutations before the next
/// [`flush_jobs`](crate::reactive::flush_jobs) cost one render.
pub fn mount_reactive<H, F>(
    renderer: Arc<Mutex<Renderer<H>>>,
    container: H::Node,
    render_fn: F,
) -> Result<RenderRoot<H>>
where
    H: HostOps + Send + 'static,
    H::Node: Send + Sync + 'static,
    F: Fn() -> VNode<H::Node> + Send + Sync + 'static,
{
    let effect = {
        let renderer = Arc::clone(&renderer);
        let container = container.clone();
        ReactiveEffect::new(move || {
            let vnode = render_fn();
            renderer.lock().render(Some(vnode), &container)
        })
    };

    let job = {
        let weak = effect.downgrade();
        Job::new(move || {
            let Some(effect) = weak.upgrade() else {
                return;
            };
            if !effect.dirty() {
                return;
            }
            if let Err(err) = effect.run() {
                tracing::error!(error = %err, "re-render failed");
            }
        })
        .owned_by(&effect.as_subscriber())
    };
    effect.set_scheduler(Arc::new(move || {
        queue_job(&job);
    }));

    effect.run()?;
    tracing::debug!(container = ?container, "mounted reactive root");

    Ok(RenderRoot {
        effect,
        renderer,
        container,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
