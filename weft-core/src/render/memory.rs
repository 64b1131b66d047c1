//! In-memory host.
//!
//! [`MemoryHost`] keeps nodes in an arena and records every operation the
//! renderer issues as a [`HostOp`]. Tests read the tree back with
//! [`MemoryHost::serialize`] and assert on the operation log; the log can
//! be shipped elsewhere as MessagePack or JSON.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::host::{HostOps, Listener};
use crate::error::{Error, Result};

/// Handle of a node owned by a [`MemoryHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One operation applied to a [`MemoryHost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOp {
    CreateElement {
        id: NodeId,
        tag: String,
    },
    CreateText {
        id: NodeId,
        text: String,
    },
    Insert {
        child: NodeId,
        parent: NodeId,
        anchor: Option<NodeId>,
    },
    Remove {
        node: NodeId,
    },
    SetElementText {
        el: NodeId,
        text: String,
    },
    SetText {
        node: NodeId,
        text: String,
    },
    SetAttribute {
        el: NodeId,
        name: String,
        value: String,
    },
    RemoveAttribute {
        el: NodeId,
        name: String,
    },
    AddListener {
        el: NodeId,
        event: String,
    },
    RemoveListener {
        el: NodeId,
        event: String,
    },
}

/// A recorded sequence of host operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOpLog {
    pub ops: Vec<HostOp>,
}

impl HostOpLog {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HostOp> {
        self.ops.iter()
    }

    /// Encode as MessagePack with field names.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Vec<HostOp>> for HostOpLog {
    fn from(ops: Vec<HostOp>) -> Self {
        Self { ops }
    }
}

impl<'a> IntoIterator for &'a HostOpLog {
    type Item = &'a HostOp;
    type IntoIter = std::slice::Iter<'a, HostOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

#[derive(Debug)]
enum NodeKind {
    Root,
    Element(String),
    Text(String),
}

#[derive(Debug)]
struct MemoryNode {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: IndexMap<String, String>,
    listeners: HashMap<String, Listener>,
}

impl MemoryNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: IndexMap::new(),
            listeners: HashMap::new(),
        }
    }
}

/// Arena-backed host for tests and headless rendering.
#[derive(Debug, Default)]
pub struct MemoryHost {
    next_id: u64,
    nodes: HashMap<NodeId, MemoryNode>,
    ops: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a container to render into. Not recorded in the log.
    pub fn create_root(&mut self) -> NodeId {
        self.alloc(NodeKind::Root)
    }

    /// Number of live nodes, containers included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(node)?.children.clone())
    }

    /// Tag of an element, `None` for text nodes and containers.
    pub fn tag(&self, node: NodeId) -> Result<Option<String>> {
        Ok(match &self.node(node)?.kind {
            NodeKind::Element(tag) => Some(tag.clone()),
            _ => None,
        })
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        Ok(self.node(node)?.attributes.get(name).cloned())
    }

    /// Concatenated text of a node and its descendants.
    pub fn text_content(&self, node: NodeId) -> Result<String> {
        let mut out = String::new();
        self.collect_text(node, &mut out)?;
        Ok(out)
    }

    /// Render the subtree under `node` as markup. Containers contribute
    /// only their children.
    pub fn serialize(&self, node: NodeId) -> Result<String> {
        let mut out = String::new();
        self.write_node(node, &mut out)?;
        Ok(out)
    }

    /// Call the listener registered for `event` on `node`. Returns whether
    /// there was one.
    pub fn dispatch(&self, node: NodeId, event: &str) -> Result<bool> {
        let listener = self.node(node)?.listeners.get(event).cloned();
        match listener {
            Some(listener) => {
                tracing::trace!(%node, event, "dispatching event");
                listener.call();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The operations recorded so far.
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Drain the recorded operations.
    pub fn take_ops(&mut self) -> HostOpLog {
        HostOpLog::from(std::mem::take(&mut self.ops))
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(id, MemoryNode::new(kind));
        id
    }

    fn node(&self, id: NodeId) -> Result<&MemoryNode> {
        self.nodes.get(&id).ok_or(Error::UnknownNode(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemoryNode> {
        self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id.0))
    }

    fn detach(&mut self, id: NodeId) -> Result<()> {
        let parent = self.node_mut(id)?.parent.take();
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|&child| child != id);
        }
        Ok(())
    }

    fn free(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.free(child);
            }
        }
    }

    fn clear_children(&mut self, id: NodeId) -> Result<()> {
        let children = std::mem::take(&mut self.node_mut(id)?.children);
        for child in children {
            self.free(child);
        }
        Ok(())
    }

    fn collect_text(&self, id: NodeId, out: &mut String) -> Result<()> {
        let node = self.node(id)?;
        if let NodeKind::Text(text) = &node.kind {
            out.push_str(text);
        }
        for &child in &node.children {
            self.collect_text(child, out)?;
        }
        Ok(())
    }

    fn write_node(&self, id: NodeId, out: &mut String) -> Result<()> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Root => {
                for &child in &node.children {
                    self.write_node(child, out)?;
                }
            }
            NodeKind::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in &node.attributes {
                    if value.is_empty() {
                        out.push_str(&format!(" {name}"));
                    } else {
                        out.push_str(&format!(" {name}=\"{value}\""));
                    }
                }
                out.push('>');
                for &child in &node.children {
                    self.write_node(child, out)?;
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
        Ok(())
    }
}

impl HostOps for MemoryHost {
    type Node = NodeId;

    fn create_element(&mut self, tag: &str) -> Result<NodeId> {
        let id = self.alloc(NodeKind::Element(tag.to_string()));
        self.ops.push(HostOp::CreateElement {
            id,
            tag: tag.to_string(),
        });
        Ok(id)
    }

    fn create_text(&mut self, text: &str) -> Result<NodeId> {
        let id = self.alloc(NodeKind::Text(text.to_string()));
        self.ops.push(HostOp::CreateText {
            id,
            text: text.to_string(),
        });
        Ok(id)
    }

    fn insert(&mut self, child: &NodeId, parent: &NodeId, anchor: Option<&NodeId>) -> Result<()> {
        self.node(*child)?;
        self.node(*parent)?;
        self.detach(*child)?;

        let siblings = &mut self.node_mut(*parent)?.children;
        let position = anchor.and_then(|anchor| siblings.iter().position(|id| id == anchor));
        match position {
            Some(index) => siblings.insert(index, *child),
            None => siblings.push(*child),
        }
        self.node_mut(*child)?.parent = Some(*parent);

        self.ops.push(HostOp::Insert {
            child: *child,
            parent: *parent,
            anchor: anchor.copied(),
        });
        Ok(())
    }

    fn remove(&mut self, node: &NodeId) -> Result<()> {
        self.detach(*node)?;
        self.free(*node);
        self.ops.push(HostOp::Remove { node: *node });
        Ok(())
    }

    fn set_element_text(&mut self, el: &NodeId, text: &str) -> Result<()> {
        self.clear_children(*el)?;
        if !text.is_empty() {
            let child = self.alloc(NodeKind::Text(text.to_string()));
            self.node_mut(child)?.parent = Some(*el);
            self.node_mut(*el)?.children.push(child);
        }
        self.ops.push(HostOp::SetElementText {
            el: *el,
            text: text.to_string(),
        });
        Ok(())
    }

    fn set_text(&mut self, node: &NodeId, text: &str) -> Result<()> {
        self.node_mut(*node)?.kind = NodeKind::Text(text.to_string());
        self.ops.push(HostOp::SetText {
            node: *node,
            text: text.to_string(),
        });
        Ok(())
    }

    fn set_attribute(&mut self, el: &NodeId, name: &str, value: &str) -> Result<()> {
        self.node_mut(*el)?
            .attributes
            .insert(name.to_string(), value.to_string());
        self.ops.push(HostOp::SetAttribute {
            el: *el,
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn remove_attribute(&mut self, el: &NodeId, name: &str) -> Result<()> {
        self.node_mut(*el)?.attributes.shift_remove(name);
        self.ops.push(HostOp::RemoveAttribute {
            el: *el,
            name: name.to_string(),
        });
        Ok(())
    }

    fn add_listener(&mut self, el: &NodeId, event: &str, listener: &Listener) -> Result<()> {
        self.node_mut(*el)?
            .listeners
            .insert(event.to_string(), listener.clone());
        self.ops.push(HostOp::AddListener {
            el: *el,
            event: event.to_string(),
        });
        Ok(())
    }

    fn remove_listener(&mut self, el: &NodeId, event: &str) -> Result<()> {
        self.node_mut(*el)?.listeners.remove(event);
        self.ops.push(HostOp::RemoveListener {
            el: *el,
            event: event.to_string(),
        });
        Ok(())
    }

    fn parent_node(&self, node: &NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(*node)?.parent)
    }

    fn next_sibling(&self, node: &NodeId) -> Result<Option<NodeId>> {
        let Some(parent) = self.node(*node)?.parent else {
            return Ok(None);
        };
        let siblings = &self.node(parent)?.children;
        Ok(siblings
            .iter()
            .position(|id| id == node)
            .and_then(|index| siblings.get(index + 1))
            .copied())
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_before_anchor_and_append() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let a = host.create_element("a").unwrap();
        let b = host.create_element("b").unwrap();
        let c = host.create_element("c").unwrap();

        host.insert(&a, &root, None).unwrap();
        host.insert(&c, &root, None).unwrap();
        host.insert(&b, &root, Some(&c)).unwrap();
        assert_eq!(host.children(root).unwrap(), vec![a, b, c]);

        // Moving detaches from the old position.
        host.insert(&a, &root, None).unwrap();
        assert_eq!(host.children(root).unwrap(), vec![b, c, a]);
        assert_eq!(host.next_sibling(&c).unwrap(), Some(a));
        assert_eq!(host.next_sibling(&a).unwrap(), None);
        assert_eq!(host.parent_node(&a).unwrap(), Some(root));
    }

    #[test]
    fn missing_anchor_appends() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let other = host.create_root();
        let stray = host.create_text("stray").unwrap();
        host.insert(&stray, &other, None).unwrap();

        let a = host.create_text("a").unwrap();
        let b = host.create_text("b").unwrap();
        host.insert(&a, &root, None).unwrap();
        host.insert(&b, &root, Some(&stray)).unwrap();
        assert_eq!(host.serialize(root).unwrap(), "ab");
    }

    #[test]
    fn remove_frees_the_subtree() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let div = host.create_element("div").unwrap();
        host.set_element_text(&div, "hi").unwrap();
        host.insert(&div, &root, None).unwrap();
        assert_eq!(host.node_count(), 3);

        host.remove(&div).unwrap();
        assert_eq!(host.node_count(), 1);
        assert!(host.children(root).unwrap().is_empty());
        assert!(matches!(
            host.set_text(&div, "x"),
            Err(Error::UnknownNode(_))
        ));
    }

    #[test]
    fn serializes_attributes_and_text() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let input = host.create_element("input").unwrap();
        host.set_attribute(&input, "type", "checkbox").unwrap();
        host.set_attribute(&input, "checked", "").unwrap();
        host.insert(&input, &root, None).unwrap();

        assert_eq!(
            host.serialize(root).unwrap(),
            r#"<input type="checkbox" checked></input>"#
        );
        assert_eq!(host.attribute(input, "type").unwrap().as_deref(), Some("checkbox"));
        assert_eq!(host.tag(input).unwrap().as_deref(), Some("input"));

        host.remove_attribute(&input, "checked").unwrap();
        assert_eq!(host.attribute(input, "checked").unwrap(), None);
    }

    #[test]
    fn op_log_encodes() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let p = host.create_element("p").unwrap();
        host.insert(&p, &root, None).unwrap();

        let log = host.take_ops();
        assert_eq!(log.len(), 2);
        assert!(host.ops().is_empty());

        let json = log.to_json().unwrap();
        assert!(json.contains(r#""op":"create_element""#));
        assert!(json.contains(r#""tag":"p""#));

        let bytes = log.to_msgpack().unwrap();
        assert_eq!(HostOpLog::from_msgpack(&bytes).unwrap(), log);
    }

    #[test]
    fn unknown_nodes_are_errors() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let ghost = NodeId(99);
        assert!(matches!(
            host.insert(&ghost, &root, None),
            Err(Error::UnknownNode(99))
        ));
        assert!(host.dispatch(ghost, "click").is_err());
    }
}
