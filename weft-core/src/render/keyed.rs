//! Keyed children diff.
//!
//! Given the children rendered last time and the children to render now,
//! [`diff_keyed`] works out which nodes to patch in place, mount, unmount
//! and move, keeping the number of moves minimal.
//!
//! # Algorithm
//!
//! 1. Patch the common prefix while both sides hold the same node.
//! 2. Patch the common suffix the same way, from the back.
//! 3. If the old side is used up, mount what is left of the new side. If
//!    the new side is used up, unmount what is left of the old side.
//! 4. Otherwise, match the remaining old nodes to new positions (by key,
//!    or by a linear search for unkeyed nodes), patch the matches and
//!    unmount the rest. The nodes whose old positions form the longest
//!    increasing subsequence stay put; every other matched node is moved
//!    and every unmatched new node is mounted, walking backwards so that
//!    each node's successor is already in place to serve as its anchor.
//!
//! The diff itself never touches a host. All effects go through the
//! caller's [`DiffHandler`].

use std::collections::HashMap;
use std::hash::Hash;

use super::sequence::longest_increasing_subsequence;

/// A node the keyed diff can match up.
pub trait KeyedNode {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> Option<&Self::Key>;

    /// Whether `other` can be patched into `self`: same type and same key.
    fn same_node(&self, other: &Self) -> bool;
}

/// Receives the operations decided by [`diff_keyed`].
pub trait DiffHandler<N> {
    type Error;

    /// Update `new` in place from `old`.
    fn patch(&mut self, old: &N, new: &mut N) -> Result<(), Self::Error>;

    /// Create `node` before `anchor`. A missing anchor means the end of the
    /// children range.
    fn mount(&mut self, node: &mut N, anchor: Option<&N>) -> Result<(), Self::Error>;

    /// Move an already patched node before `anchor`.
    fn move_before(&mut self, node: &N, anchor: Option<&N>) -> Result<(), Self::Error>;

    fn unmount(&mut self, node: &N) -> Result<(), Self::Error>;
}

/// What a diff did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub patched: usize,
    pub mounted: usize,
    pub moved: usize,
    pub unmounted: usize,
}

/// Reconcile `old` into `new` through `handler`.
pub fn diff_keyed<N, H>(old: &[N], new: &mut [N], handler: &mut H) -> Result<DiffStats, H::Error>
where
    N: KeyedNode,
    H: DiffHandler<N>,
{
    let mut stats = DiffStats::default();
    let mut start = 0;
    let mut old_end = old.len();
    let mut new_end = new.len();

    // 1. Common prefix.
    while start < old_end && start < new_end && old[start].same_node(&new[start]) {
        handler.patch(&old[start], &mut new[start])?;
        stats.patched += 1;
        start += 1;
    }

    // 2. Common suffix.
    while start < old_end && start < new_end && old[old_end - 1].same_node(&new[new_end - 1]) {
        handler.patch(&old[old_end - 1], &mut new[new_end - 1])?;
        stats.patched += 1;
        old_end -= 1;
        new_end -= 1;
    }

    tracing::trace!(
        prefix = start,
        suffix = old.len() - old_end,
        "keyed diff trimmed common ends"
    );

    // 3. One side used up.
    if start >= old_end {
        for index in start..new_end {
            let (head, tail) = new.split_at_mut(new_end);
            handler.mount(&mut head[index], tail.first())?;
            stats.mounted += 1;
        }
        return Ok(stats);
    }
    if start >= new_end {
        for node in &old[start..old_end] {
            handler.unmount(node)?;
            stats.unmounted += 1;
        }
        return Ok(stats);
    }

    // 4. General middle.
    let to_be_patched = new_end - start;
    let key_to_new: HashMap<N::Key, usize> = (start..new_end)
        .filter_map(|index| new[index].key().map(|key| (key.clone(), index)))
        .collect();

    // Old index + 1 for every new slot, 0 for slots still unmatched.
    let mut sources = vec![0usize; to_be_patched];
    let mut matched = 0;
    let mut moved = false;
    let mut max_new_index = 0;

    for (old_index, previous) in old.iter().enumerate().take(old_end).skip(start) {
        if matched >= to_be_patched {
            handler.unmount(previous)?;
            stats.unmounted += 1;
            continue;
        }

        let new_index = match previous.key() {
            Some(key) => key_to_new.get(key).copied(),
            None => (start..new_end)
                .find(|&index| sources[index - start] == 0 && previous.same_node(&new[index])),
        };

        let claimable = new_index.filter(|&index| {
            sources[index - start] == 0 && previous.same_node(&new[index])
        });

        let Some(new_index) = claimable else {
            handler.unmount(previous)?;
            stats.unmounted += 1;
            continue;
        };

        sources[new_index - start] = old_index + 1;
        if new_index >= max_new_index {
            max_new_index = new_index;
        } else {
            moved = true;
        }
        handler.patch(previous, &mut new[new_index])?;
        stats.patched += 1;
        matched += 1;
    }

    let stable = if moved {
        longest_increasing_subsequence(&sources)
    } else {
        Vec::new()
    };
    let mut stable = stable.iter().rev().peekable();

    for offset in (0..to_be_patched).rev() {
        let index = start + offset;
        let (head, tail) = new.split_at_mut(index + 1);
        let node = &mut head[index];
        let anchor = tail.first();

        if sources[offset] == 0 {
            handler.mount(node, anchor)?;
            stats.mounted += 1;
        } else if moved {
            if stable.peek() == Some(&&offset) {
                stable.next();
            } else {
                handler.move_before(node, anchor)?;
                stats.moved += 1;
            }
        }
    }

    tracing::trace!(
        patched = stats.patched,
        mounted = stats.mounted,
        moved = stats.moved,
        unmounted = stats.unmounted,
        "keyed diff finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        tag: &'static str,
        key: Option<&'static str>,
    }

    impl KeyedNode for Node {
        type Key = &'static str;

        fn key(&self) -> Option<&Self::Key> {
            self.key.as_ref()
        }

        fn same_node(&self, other: &Self) -> bool {
            self.tag == other.tag && self.key == other.key
        }
    }

    fn keyed(keys: &[&'static str]) -> Vec<Node> {
        keys.iter()
            .map(|&key| Node {
                tag: "li",
                key: Some(key),
            })
            .collect()
    }

    fn unkeyed(tag: &'static str) -> Node {
        Node { tag, key: None }
    }

    fn label(node: &Node) -> String {
        node.key.unwrap_or(node.tag).to_string()
    }

    #[derive(Default)]
    struct Recorder {
        ops: Vec<String>,
    }

    impl DiffHandler<Node> for Recorder {
        type Error = ();

        fn patch(&mut self, old: &Node, new: &mut Node) -> Result<(), ()> {
            assert!(old.same_node(new));
            self.ops.push(format!("patch {}", label(new)));
            Ok(())
        }

        fn mount(&mut self, node: &mut Node, anchor: Option<&Node>) -> Result<(), ()> {
            let anchor = anchor.map_or("end".to_string(), label);
            self.ops.push(format!("mount {} before {}", label(node), anchor));
            Ok(())
        }

        fn move_before(&mut self, node: &Node, anchor: Option<&Node>) -> Result<(), ()> {
            let anchor = anchor.map_or("end".to_string(), label);
            self.ops.push(format!("move {} before {}", label(node), anchor));
            Ok(())
        }

        fn unmount(&mut self, node: &Node) -> Result<(), ()> {
            self.ops.push(format!("unmount {}", label(node)));
            Ok(())
        }
    }

    fn run(old: &[Node], new: &mut [Node]) -> (DiffStats, Vec<String>) {
        let mut recorder = Recorder::default();
        let stats = diff_keyed(old, new, &mut recorder).expect("recorder never fails");
        (stats, recorder.ops)
    }

    #[test]
    fn minimal_moves_in_middle() {
        let old = keyed(&["a", "b", "c", "d", "e", "f", "g"]);
        let mut new = keyed(&["a", "b", "e", "c", "d", "h", "f", "g"]);
        let (stats, ops) = run(&old, &mut new);

        assert_eq!(
            ops,
            vec![
                "patch a",
                "patch b",
                "patch g",
                "patch f",
                "patch c",
                "patch d",
                "patch e",
                "mount h before f",
                "move e before c",
            ]
        );
        assert_eq!(
            stats,
            DiffStats {
                patched: 7,
                mounted: 1,
                moved: 1,
                unmounted: 0
            }
        );
    }

    #[test]
    fn pure_append_mounts_in_order() {
        let old = keyed(&["a", "b"]);
        let mut new = keyed(&["a", "b", "c", "d"]);
        let (stats, ops) = run(&old, &mut new);

        assert_eq!(
            ops,
            vec!["patch a", "patch b", "mount c before end", "mount d before end"]
        );
        assert_eq!(stats.mounted, 2);
        assert_eq!(stats.moved, 0);
    }

    #[test]
    fn insertion_at_front_uses_following_anchor() {
        let old = keyed(&["b", "c"]);
        let mut new = keyed(&["a", "b", "c"]);
        let (_, ops) = run(&old, &mut new);
        assert_eq!(ops, vec!["patch c", "patch b", "mount a before b"]);
    }

    #[test]
    fn pure_removal_unmounts() {
        let old = keyed(&["a", "b", "c", "d"]);
        let mut new = keyed(&["a", "d"]);
        let (stats, ops) = run(&old, &mut new);

        assert_eq!(ops, vec!["patch a", "patch d", "unmount b", "unmount c"]);
        assert_eq!(stats.unmounted, 2);
    }

    #[test]
    fn identical_lists_only_patch() {
        let old = keyed(&["a", "b", "c"]);
        let mut new = old.clone();
        let (stats, _) = run(&old, &mut new);
        assert_eq!(
            stats,
            DiffStats {
                patched: 3,
                ..DiffStats::default()
            }
        );
    }

    #[test]
    fn empty_lists_do_nothing() {
        let (stats, ops) = run(&[], &mut []);
        assert!(ops.is_empty());
        assert_eq!(stats, DiffStats::default());
    }

    #[test]
    fn reversal_keeps_one_node() {
        let old = keyed(&["a", "b", "c", "d"]);
        let mut new = keyed(&["d", "c", "b", "a"]);
        let (stats, _) = run(&old, &mut new);
        assert_eq!(stats.patched, 4);
        assert_eq!(stats.moved, 3);
    }

    #[test]
    fn unmatched_keys_are_replaced() {
        let old = keyed(&["a", "x", "y", "b"]);
        let mut new = keyed(&["a", "p", "q", "b"]);
        let (stats, ops) = run(&old, &mut new);

        assert_eq!(
            ops,
            vec![
                "patch a",
                "patch b",
                "unmount x",
                "unmount y",
                "mount q before b",
                "mount p before q",
            ]
        );
        assert_eq!(stats.moved, 0);
    }

    #[test]
    fn unkeyed_nodes_match_by_type() {
        let old = vec![unkeyed("p"), unkeyed("span"), unkeyed("div")];
        let mut new = vec![unkeyed("div"), unkeyed("p"), unkeyed("em")];
        let (stats, ops) = run(&old, &mut new);

        assert_eq!(
            ops,
            vec![
                "patch p",
                "unmount span",
                "patch div",
                "mount em before end",
                "move div before p",
            ]
        );
        assert_eq!(stats.moved, 1);
    }

    #[test]
    fn duplicate_keys_unmount_later_node() {
        let old = keyed(&["a", "x", "x", "y", "b"]);
        let mut new = keyed(&["a", "y", "x", "z", "b"]);
        let (stats, ops) = run(&old, &mut new);

        assert_eq!(
            ops,
            vec![
                "patch a",
                "patch b",
                "patch x",
                "unmount x",
                "patch y",
                "mount z before b",
                "move y before x",
            ]
        );
        assert_eq!(stats.unmounted, 1);
    }

    #[test]
    fn key_match_with_other_type_is_replaced() {
        let old = vec![Node {
            tag: "li",
            key: Some("a"),
        }];
        let mut new = vec![Node {
            tag: "div",
            key: Some("a"),
        }];
        let (_, ops) = run(&old, &mut new);
        assert_eq!(ops, vec!["unmount a", "mount a before end"]);
    }

    #[test]
    fn surplus_old_nodes_unmount_once_all_matched() {
        let old = keyed(&["s", "c", "d", "e", "t"]);
        let mut new = keyed(&["s", "d", "t"]);
        let (stats, ops) = run(&old, &mut new);
        assert_eq!(
            ops,
            vec!["patch s", "patch t", "unmount c", "patch d", "unmount e"]
        );
        assert_eq!(stats.patched, 3);
    }

    #[test]
    fn handler_errors_stop_the_diff() {
        struct Failing;

        impl DiffHandler<Node> for Failing {
            type Error = &'static str;

            fn patch(&mut self, _: &Node, _: &mut Node) -> Result<(), Self::Error> {
                Err("patch failed")
            }

            fn mount(&mut self, _: &mut Node, _: Option<&Node>) -> Result<(), Self::Error> {
                Ok(())
            }

            fn move_before(&mut self, _: &Node, _: Option<&Node>) -> Result<(), Self::Error> {
                Ok(())
            }

            fn unmount(&mut self, _: &Node) -> Result<(), Self::Error> {
                Ok(())
            }
        }

        let old = keyed(&["a"]);
        let mut new = keyed(&["a"]);
        assert_eq!(diff_keyed(&old, &mut new, &mut Failing), Err("patch failed"));
    }
}
