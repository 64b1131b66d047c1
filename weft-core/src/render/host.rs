//! Host operations.
//!
//! The renderer never touches a concrete node tree. Everything it does goes
//! through [`HostOps`], which a platform implements for its own node handle
//! type. [`MemoryHost`](super::MemoryHost) is the in-memory implementation
//! used by the tests.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::Result;

/// An event listener attached through a prop.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn() + Send + Sync>);

impl Listener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self) {
        (self.0)();
    }

    pub fn ptr_eq(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener(..)")
    }
}

/// The value of a vnode prop.
#[derive(Clone, Debug)]
pub enum PropValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Listener(Listener),
    /// Class names, joined with spaces when applied.
    Class(Vec<String>),
    /// Style declarations, applied as `name: value` pairs in order.
    Style(IndexMap<String, String>),
}

impl PropValue {
    /// A class list. Empty names are dropped.
    pub fn class_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropValue::Class(
            names
                .into_iter()
                .map(Into::into)
                .filter(|name| !name.is_empty())
                .collect(),
        )
    }

    /// A class list keeping only the names whose flag is set.
    pub fn class_toggles<I, S>(toggles: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        Self::class_list(
            toggles
                .into_iter()
                .filter_map(|(name, enabled)| enabled.then(|| name.into())),
        )
    }

    pub fn style<I, K, V>(declarations: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        PropValue::Style(
            declarations
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    /// The attribute text of a class list or style, `None` when empty.
    fn joined(&self) -> Option<String> {
        let joined = match self {
            PropValue::Class(names) => names.join(" "),
            PropValue::Style(declarations) => declarations
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect::<Vec<_>>()
                .join("; "),
            _ => return None,
        };
        (!joined.is_empty()).then_some(joined)
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Listener(a), PropValue::Listener(b)) => a.ptr_eq(b),
            (PropValue::Class(a), PropValue::Class(b)) => a == b,
            (PropValue::Style(a), PropValue::Style(b)) => a.iter().eq(b.iter()),
            _ => false,
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Str(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Str(s)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

impl From<i64> for PropValue {
    fn from(i: i64) -> Self {
        PropValue::Int(i)
    }
}

impl From<i32> for PropValue {
    fn from(i: i32) -> Self {
        PropValue::Int(i64::from(i))
    }
}

impl From<Listener> for PropValue {
    fn from(listener: Listener) -> Self {
        PropValue::Listener(listener)
    }
}

/// The event name of an `on*` prop key: `onClick` becomes `click`.
pub fn event_name(key: &str) -> Option<String> {
    let rest = key.strip_prefix("on")?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if first.is_ascii_lowercase() {
        return None;
    }
    Some(first.to_lowercase().chain(chars).collect())
}

/// The node tree a renderer draws into.
///
/// Every operation is fallible so that hosts can reject handles they do not
/// own.
pub trait HostOps {
    type Node: Clone + Eq + Hash + fmt::Debug;

    fn create_element(&mut self, tag: &str) -> Result<Self::Node>;

    fn create_text(&mut self, text: &str) -> Result<Self::Node>;

    /// Insert (or move) `child` into `parent` before `anchor`. A missing
    /// anchor appends.
    fn insert(
        &mut self,
        child: &Self::Node,
        parent: &Self::Node,
        anchor: Option<&Self::Node>,
    ) -> Result<()>;

    /// Detach `node` from its parent.
    fn remove(&mut self, node: &Self::Node) -> Result<()>;

    /// Replace all children of `el` with a single text.
    fn set_element_text(&mut self, el: &Self::Node, text: &str) -> Result<()>;

    /// Change the content of a text node.
    fn set_text(&mut self, node: &Self::Node, text: &str) -> Result<()>;

    fn set_attribute(&mut self, el: &Self::Node, name: &str, value: &str) -> Result<()>;

    fn remove_attribute(&mut self, el: &Self::Node, name: &str) -> Result<()>;

    /// Attach `listener` for `event`, replacing any previous one.
    fn add_listener(&mut self, el: &Self::Node, event: &str, listener: &Listener) -> Result<()>;

    fn remove_listener(&mut self, el: &Self::Node, event: &str) -> Result<()>;

    fn parent_node(&self, node: &Self::Node) -> Result<Option<Self::Node>>;

    fn next_sibling(&self, node: &Self::Node) -> Result<Option<Self::Node>>;

    /// Apply one prop change.
    ///
    /// `on*` keys become listener operations. `false` and absent values
    /// remove the attribute, `true` sets it empty, strings and integers set
    /// it verbatim. Class lists are joined with spaces and styles rendered
    /// as `name: value` pairs; an empty one removes the attribute.
    fn patch_prop(
        &mut self,
        el: &Self::Node,
        key: &str,
        prev: Option<&PropValue>,
        next: Option<&PropValue>,
    ) -> Result<()> {
        if let Some(event) = event_name(key) {
            return match next {
                Some(PropValue::Listener(listener)) => self.add_listener(el, &event, listener),
                _ if matches!(prev, Some(PropValue::Listener(_))) => {
                    self.remove_listener(el, &event)
                }
                _ => Ok(()),
            };
        }

        match next {
            None | Some(PropValue::Bool(false)) => self.remove_attribute(el, key),
            Some(PropValue::Bool(true)) => self.set_attribute(el, key, ""),
            Some(PropValue::Str(value)) => self.set_attribute(el, key, value),
            Some(PropValue::Int(value)) => self.set_attribute(el, key, &value.to_string()),
            Some(value @ (PropValue::Class(_) | PropValue::Style(_))) => match value.joined() {
                Some(joined) => self.set_attribute(el, key, &joined),
                None => self.remove_attribute(el, key),
            },
            Some(PropValue::Listener(_)) => {
                tracing::warn!(key, "listener bound to a non-event prop ignored");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        assert_eq!(event_name("onClick").as_deref(), Some("click"));
        assert_eq!(event_name("onDoubleClick").as_deref(), Some("doubleClick"));
        assert_eq!(event_name("once"), None);
        assert_eq!(event_name("on"), None);
        assert_eq!(event_name("class"), None);
    }

    #[test]
    fn listeners_compare_by_identity() {
        let a = Listener::new(|| ());
        let b = Listener::new(|| ());
        assert_eq!(PropValue::from(a.clone()), PropValue::from(a));
        assert_ne!(PropValue::Listener(b.clone()), PropValue::Listener(Listener::new(|| ())));
        assert_ne!(PropValue::from("1"), PropValue::from(1));
    }

    #[test]
    fn class_lists_and_styles_join() {
        let classes = PropValue::class_toggles([("item", true), ("active", false), ("last", true)]);
        assert_eq!(classes, PropValue::class_list(["item", "", "last"]));
        assert_eq!(classes.joined().as_deref(), Some("item last"));

        let style = PropValue::style([("color", "red"), ("width", "1px")]);
        assert_eq!(style.joined().as_deref(), Some("color: red; width: 1px"));
        assert_ne!(style, PropValue::style([("width", "1px"), ("color", "red")]));

        assert_eq!(PropValue::class_list(Vec::<String>::new()).joined(), None);
    }
}
