//! Virtual nodes.
//!
//! A [`VNode`] describes one element, text or fragment the renderer should
//! produce. After mounting, `el` holds the host node (for fragments, the
//! start marker) and `anchor` holds a fragment's end marker.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::host::{Listener, PropValue};
use super::keyed::KeyedNode;

/// What a vnode renders to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VNodeType {
    Element(String),
    Text,
    Fragment,
}

/// Identity of a child among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

/// The children of a vnode.
#[derive(Debug, Clone)]
pub enum Children<N> {
    Empty,
    Text(String),
    Nodes(Vec<VNode<N>>),
}

impl<N> Children<N> {
    pub fn is_empty(&self) -> bool {
        match self {
            Children::Empty => true,
            Children::Text(_) => false,
            Children::Nodes(nodes) => nodes.is_empty(),
        }
    }
}

/// A virtual node whose host node handle is `N`.
#[derive(Debug, Clone)]
pub struct VNode<N> {
    pub node_type: VNodeType,
    pub key: Option<Key>,
    pub props: IndexMap<String, PropValue>,
    pub children: Children<N>,
    pub el: Option<N>,
    pub anchor: Option<N>,
}

impl<N> VNode<N> {
    fn new(node_type: VNodeType, children: Children<N>) -> Self {
        Self {
            node_type,
            key: None,
            props: IndexMap::new(),
            children,
            el: None,
            anchor: None,
        }
    }

    /// Set the key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set a prop.
    pub fn prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Attach a listener: `.on("click", f)` sets the `onClick` prop.
    pub fn on<F>(self, event: &str, listener: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut chars = event.chars();
        let name = match chars.next() {
            Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
            None => "on".to_string(),
        };
        self.prop(name, Listener::new(listener))
    }

    /// Replace the children with a text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children = Children::Text(text.into());
        self
    }

    /// Append one child.
    pub fn child(mut self, child: VNode<N>) -> Self {
        match &mut self.children {
            Children::Nodes(nodes) => nodes.push(child),
            _ => self.children = Children::Nodes(vec![child]),
        }
        self
    }

    /// Replace the children.
    pub fn children(mut self, children: impl IntoIterator<Item = VNode<N>>) -> Self {
        self.children = Children::Nodes(children.into_iter().collect());
        self
    }

    pub fn is_element(&self) -> bool {
        matches!(self.node_type, VNodeType::Element(_))
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.node_type, VNodeType::Fragment)
    }

    /// Text content of a text vnode or a text-only element.
    pub fn text_content(&self) -> Option<&str> {
        match &self.children {
            Children::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl<N> KeyedNode for VNode<N> {
    type Key = Key;

    fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    fn same_node(&self, other: &Self) -> bool {
        self.node_type == other.node_type && self.key == other.key
    }
}

/// An element vnode.
pub fn h<N>(tag: impl Into<String>) -> VNode<N> {
    VNode::new(VNodeType::Element(tag.into()), Children::Empty)
}

/// A text vnode.
pub fn text<N>(content: impl Into<String>) -> VNode<N> {
    VNode::new(VNodeType::Text, Children::Text(content.into()))
}

/// A fragment: several sibling nodes without a wrapper element.
pub fn fragment<N>(children: impl IntoIterator<Item = VNode<N>>) -> VNode<N> {
    VNode::new(
        VNodeType::Fragment,
        Children::Nodes(children.into_iter().collect()),
    )
}
