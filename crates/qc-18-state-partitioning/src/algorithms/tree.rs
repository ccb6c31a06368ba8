//! # Composition Tree Traversal
//!
//! Orders nodes of a composition tree given a child lookup. The arena
//! is acyclic, so traversal terminates; a visited set guards against a
//! corrupted arena anyway.

use std::collections::HashSet;

use crate::domain::{ChannelId, StateMap};

/// Parent-before-children order.
pub fn pre_order<F>(root: &ChannelId, children_of: F) -> Vec<ChannelId>
where
    F: Fn(&ChannelId) -> Vec<ChannelId>,
{
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root.clone()];

    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        // Reverse so the first child is visited first.
        for child in children_of(&node).into_iter().rev() {
            stack.push(child);
        }
        order.push(node);
    }

    order
}

/// Children-before-parent order (leaves first).
///
/// Siblings appear in attachment order.
pub fn post_order<F>(root: &ChannelId, children_of: F) -> Vec<ChannelId>
where
    F: Fn(&ChannelId) -> Vec<ChannelId>,
{
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(root.clone(), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !seen.insert(node.clone()) {
            continue;
        }
        stack.push((node.clone(), true));
        for child in children_of(&node).into_iter().rev() {
            stack.push((child, false));
        }
    }

    order
}

/// Merge `layers` into `base` in order; later layers win on collision.
pub fn merge_last_write_wins<'a, I>(base: &mut StateMap, layers: I)
where
    I: IntoIterator<Item = &'a StateMap>,
{
    for layer in layers {
        for (key, value) in layer {
            base.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn id(s: &str) -> ChannelId {
        ChannelId::from(s)
    }

    //        root
    //       /    \
    //      a      b
    //     / \
    //    a1  a2
    fn sample_tree() -> HashMap<ChannelId, Vec<ChannelId>> {
        let mut links = HashMap::new();
        links.insert(id("root"), vec![id("a"), id("b")]);
        links.insert(id("a"), vec![id("a1"), id("a2")]);
        links
    }

    #[test]
    fn test_pre_order() {
        let links = sample_tree();
        let order = pre_order(&id("root"), |n| links.get(n).cloned().unwrap_or_default());
        let names: Vec<&str> = order.iter().map(ChannelId::as_str).collect();
        assert_eq!(names, vec!["root", "a", "a1", "a2", "b"]);
    }

    #[test]
    fn test_post_order_leaves_first() {
        let links = sample_tree();
        let order = post_order(&id("root"), |n| links.get(n).cloned().unwrap_or_default());
        let names: Vec<&str> = order.iter().map(ChannelId::as_str).collect();
        assert_eq!(names, vec!["a1", "a2", "a", "b", "root"]);
    }

    #[test]
    fn test_single_node() {
        let order = post_order(&id("solo"), |_| Vec::new());
        assert_eq!(order, vec![id("solo")]);
    }

    #[test]
    fn test_corrupted_cycle_terminates() {
        let mut links = HashMap::new();
        links.insert(id("x"), vec![id("y")]);
        links.insert(id("y"), vec![id("x")]);
        let order = post_order(&id("x"), |n| links.get(n).cloned().unwrap_or_default());
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_merge_later_layer_wins() {
        let mut base = StateMap::new();
        base.insert("own".into(), json!(1));
        let mut first = StateMap::new();
        first.insert("k".into(), json!("first"));
        let mut second = StateMap::new();
        second.insert("k".into(), json!("second"));

        merge_last_write_wins(&mut base, [&first, &second]);
        assert_eq!(base.get("k"), Some(&json!("second")));
        assert_eq!(base.get("own"), Some(&json!(1)));
    }
}
