//! Conversions between flat arrays and the node structures LeetCode-style
//! submissions take as arguments.
//!
//! A linked list is written as its values in order: `[1, 2, 3]`. A binary tree
//! is written in level order with `None` marking a missing child:
//! `[1, None, 2, 3]`. Flattening is the inverse and trims trailing `None`s, so
//! flattening a built structure yields the canonical form of its input.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("a {spec} argument must be a flat array, got {found}")]
    NotAnArray { spec: BuildSpec, found: &'static str },
    #[error("unknown build spec '{0}' (expected raw, linked-list or tree)")]
    UnknownSpec(String),
}

/// How a flat argument is turned into the structure the submission expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildSpec {
    #[default]
    Raw,
    #[serde(alias = "listnode", alias = "linked_list")]
    LinkedList,
    #[serde(alias = "btree")]
    Tree,
}

impl BuildSpec {
    /// Spec for the argument at `index`. Missing entries mean `Raw`.
    pub fn for_argument(specs: &[BuildSpec], index: usize) -> BuildSpec {
        specs.get(index).copied().unwrap_or_default()
    }

    pub fn apply(self, value: Value) -> Result<Value, MarshalError> {
        match (self, value) {
            (BuildSpec::Raw, value) => Ok(value),
            (BuildSpec::LinkedList, Value::List(items)) => {
                Ok(Value::LinkedList(build_linked_list(&items)))
            }
            (BuildSpec::Tree, Value::List(items)) => Ok(Value::Tree(build_tree(&items))),
            (BuildSpec::LinkedList, Value::None) => Ok(Value::LinkedList(None)),
            (BuildSpec::Tree, Value::None) => Ok(Value::Tree(None)),
            (spec, other) => Err(MarshalError::NotAnArray {
                spec,
                found: other.kind_name(),
            }),
        }
    }
}

impl fmt::Display for BuildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildSpec::Raw => "raw",
            BuildSpec::LinkedList => "linked-list",
            BuildSpec::Tree => "tree",
        };
        f.write_str(name)
    }
}

impl FromStr for BuildSpec {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "" => Ok(BuildSpec::Raw),
            "linked-list" | "linked_list" | "listnode" => Ok(BuildSpec::LinkedList),
            "tree" | "btree" => Ok(BuildSpec::Tree),
            other => Err(MarshalError::UnknownSpec(other.to_string())),
        }
    }
}

/// Singly linked list node.
///
/// Clone, equality and drop walk the chain iteratively, so long lists do not
/// exhaust the stack.
#[derive(Debug)]
pub struct ListNode {
    pub val: Value,
    pub next: Option<Box<ListNode>>,
}

impl ListNode {
    pub fn new(val: Value) -> Self {
        Self { val, next: None }
    }
}

impl Clone for ListNode {
    fn clone(&self) -> Self {
        let values = flatten_linked_list(Some(self));
        match build_linked_list(&values) {
            Some(head) => *head,
            None => ListNode::new(self.val.clone()),
        }
    }
}

impl PartialEq for ListNode {
    fn eq(&self, other: &Self) -> bool {
        let mut left = Some(self);
        let mut right = Some(other);
        loop {
            match (left, right) {
                (None, None) => return true,
                (Some(a), Some(b)) if a.val == b.val => {
                    left = a.next.as_deref();
                    right = b.next.as_deref();
                }
                _ => return false,
            }
        }
    }
}

impl Drop for ListNode {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

/// Binary tree node. Like [`ListNode`], clone, equality and drop never recurse.
#[derive(Debug)]
pub struct TreeNode {
    pub val: Value,
    pub left: Option<Box<TreeNode>>,
    pub right: Option<Box<TreeNode>>,
}

impl TreeNode {
    pub fn new(val: Value) -> Self {
        Self {
            val,
            left: None,
            right: None,
        }
    }
}

impl Clone for TreeNode {
    fn clone(&self) -> Self {
        // Breadth-first order puts every child after its parent.
        let mut order: Vec<&TreeNode> = vec![self];
        let mut links: Vec<(Option<usize>, Option<usize>)> = Vec::new();
        let mut at = 0;
        while let Some(&node) = order.get(at) {
            let left = node.left.as_deref().map(|child| {
                order.push(child);
                order.len() - 1
            });
            let right = node.right.as_deref().map(|child| {
                order.push(child);
                order.len() - 1
            });
            links.push((left, right));
            at += 1;
        }

        let mut built: Vec<Option<Box<TreeNode>>> = (0..order.len()).map(|_| None).collect();
        for index in (0..order.len()).rev() {
            let (left, right) = links[index];
            let node = TreeNode {
                val: order[index].val.clone(),
                left: left.and_then(|i| built[i].take()),
                right: right.and_then(|i| built[i].take()),
            };
            built[index] = Some(Box::new(node));
        }
        match built.swap_remove(0) {
            Some(root) => *root,
            None => TreeNode::new(self.val.clone()),
        }
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            if a.val != b.val {
                return false;
            }
            for (x, y) in [(&a.left, &b.left), (&a.right, &b.right)] {
                match (x.as_deref(), y.as_deref()) {
                    (None, None) => {}
                    (Some(x), Some(y)) => pending.push((x, y)),
                    _ => return false,
                }
            }
        }
        true
    }
}

impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending: Vec<Box<TreeNode>> = self.left.take().into_iter().chain(self.right.take()).collect();
        while let Some(mut node) = pending.pop() {
            pending.extend(node.left.take());
            pending.extend(node.right.take());
        }
    }
}

pub fn build_linked_list(values: &[Value]) -> Option<Box<ListNode>> {
    let mut head: Option<Box<ListNode>> = None;
    let mut cursor = &mut head;
    for value in values {
        cursor = &mut cursor.insert(Box::new(ListNode::new(value.clone()))).next;
    }
    head
}

pub fn flatten_linked_list(head: Option<&ListNode>) -> Vec<Value> {
    let mut out = Vec::new();
    let mut cursor = head;
    while let Some(node) = cursor {
        out.push(node.val.clone());
        cursor = node.next.as_deref();
    }
    out
}

/// Builds a tree from a level-order array.
///
/// Children are handed out breadth-first to present nodes only, so entries
/// under a missing parent are ignored.
pub fn build_tree(level: &[Value]) -> Option<Box<TreeNode>> {
    if level.first().is_none_or(Value::is_none) {
        return None;
    }

    let mut children: Vec<(Option<usize>, Option<usize>)> = vec![(None, None); level.len()];
    let mut reached = vec![false; level.len()];
    reached[0] = true;
    let mut queue = VecDeque::from([0usize]);
    let mut next = 1;
    while let Some(parent) = queue.pop_front() {
        if next >= level.len() {
            break;
        }
        for side in 0..2 {
            if next >= level.len() {
                break;
            }
            if !level[next].is_none() {
                if side == 0 {
                    children[parent].0 = Some(next);
                } else {
                    children[parent].1 = Some(next);
                }
                reached[next] = true;
                queue.push_back(next);
            }
            next += 1;
        }
    }

    // Children always sit at a higher index than their parent.
    let mut slots: Vec<Option<Box<TreeNode>>> = (0..level.len()).map(|_| None).collect();
    for index in (0..level.len()).rev() {
        if !reached[index] {
            continue;
        }
        let (left, right) = children[index];
        let node = TreeNode {
            val: level[index].clone(),
            left: left.and_then(|i| slots[i].take()),
            right: right.and_then(|i| slots[i].take()),
        };
        slots[index] = Some(Box::new(node));
    }
    slots[0].take()
}

pub fn flatten_tree(root: Option<&TreeNode>) -> Vec<Value> {
    let mut out = Vec::new();
    let mut queue: VecDeque<Option<&TreeNode>> = VecDeque::new();
    if let Some(root) = root {
        queue.push_back(Some(root));
    }
    while let Some(slot) = queue.pop_front() {
        match slot {
            Some(node) => {
                out.push(node.val.clone());
                queue.push_back(node.left.as_deref());
                queue.push_back(node.right.as_deref());
            }
            None => out.push(Value::None),
        }
    }
    while matches!(out.last(), Some(Value::None)) {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    fn level(values: &[Option<i64>]) -> Vec<Value> {
        values
            .iter()
            .map(|v| v.map(Value::Int).unwrap_or(Value::None))
            .collect()
    }

    #[test]
    fn empty_inputs_build_nothing() {
        assert!(build_linked_list(&[]).is_none());
        assert!(build_tree(&[]).is_none());
        assert!(build_tree(&[Value::None, Value::Int(1)]).is_none());
        assert!(flatten_tree(None).is_empty());
    }

    #[test]
    fn tree_follows_level_order_with_gaps() {
        let root = build_tree(&level(&[Some(1), None, Some(2), Some(3)])).unwrap();
        assert_eq!(root.val, Value::Int(1));
        assert!(root.left.is_none());
        let right = root.right.as_deref().unwrap();
        assert_eq!(right.val, Value::Int(2));
        assert_eq!(right.left.as_deref().unwrap().val, Value::Int(3));
        assert!(right.right.is_none());
    }

    #[test]
    fn tree_flatten_trims_trailing_missing() {
        let input = level(&[Some(3), Some(9), Some(20), None, None, Some(15), Some(7), None, None]);
        let root = build_tree(&input);
        assert_eq!(
            flatten_tree(root.as_deref()),
            level(&[Some(3), Some(9), Some(20), None, None, Some(15), Some(7)])
        );
    }

    #[test]
    fn long_list_drops_without_recursion() {
        let values = ints(&(0..200_000).collect::<Vec<_>>());
        let head = build_linked_list(&values);
        assert_eq!(flatten_linked_list(head.as_deref()).len(), 200_000);
        let copy = head.clone();
        assert_eq!(copy, head);
    }

    #[test]
    fn build_spec_rejects_non_arrays() {
        assert_eq!(
            BuildSpec::LinkedList.apply(Value::Int(4)),
            Err(MarshalError::NotAnArray {
                spec: BuildSpec::LinkedList,
                found: "int"
            })
        );
        assert_eq!(BuildSpec::Raw.apply(Value::Int(4)), Ok(Value::Int(4)));
        assert_eq!(BuildSpec::for_argument(&[BuildSpec::Tree], 3), BuildSpec::Raw);
        assert_eq!("listnode".parse::<BuildSpec>(), Ok(BuildSpec::LinkedList));
        assert_eq!("btree".parse::<BuildSpec>(), Ok(BuildSpec::Tree));
    }

    #[test]
    fn deep_tree_clones_compares_and_drops_iteratively() {
        let mut chain = vec![Value::Int(0)];
        for i in 1..300_000 {
            chain.push(Value::Int(i));
            chain.push(Value::None);
        }
        let root = build_tree(&chain);
        let copy = root.clone();
        assert!(copy == root);

        let mut depth = 0;
        let mut cursor = copy.as_deref();
        while let Some(node) = cursor {
            depth += 1;
            cursor = node.left.as_deref();
        }
        assert_eq!(depth, 300_000);

        let mut other = build_tree(&chain);
        if let Some(root) = other.as_deref_mut() {
            root.val = Value::Int(-1);
        }
        assert!(other != root);
    }

    /// Level-order arrays where child slots follow present nodes only.
    fn level_order() -> impl Strategy<Value = Vec<Option<i64>>> {
        prop::collection::vec(prop::option::weighted(0.7, -50i64..50), 0..40).prop_map(|slots| {
            let mut slots = slots.into_iter();
            let mut level = Vec::new();
            let mut open = match slots.next() {
                Some(Some(root)) => {
                    level.push(Some(root));
                    1usize
                }
                _ => return level,
            };
            while open > 0 {
                open -= 1;
                for _ in 0..2 {
                    let Some(slot) = slots.next() else {
                        return level;
                    };
                    open += usize::from(slot.is_some());
                    level.push(slot);
                }
            }
            level
        })
    }

    proptest! {
        #[test]
        fn tree_flatten_inverts_level_order(raw in level_order()) {
            let input = level(&raw);
            let mut trimmed = input.clone();
            while matches!(trimmed.last(), Some(Value::None)) {
                trimmed.pop();
            }
            prop_assert_eq!(flatten_tree(build_tree(&input).as_deref()), trimmed);
        }

        #[test]
        fn linked_list_round_trips(values in prop::collection::vec(any::<i64>(), 0..64)) {
            let values = ints(&values);
            let head = build_linked_list(&values);
            prop_assert_eq!(flatten_linked_list(head.as_deref()), values);
        }

        #[test]
        fn tree_flatten_is_canonical(raw in prop::collection::vec(prop::option::weighted(0.7, -50i64..50), 0..40)) {
            let once = flatten_tree(build_tree(&level(&raw)).as_deref());
            let twice = flatten_tree(build_tree(&once).as_deref());
            prop_assert_eq!(&once, &twice);
            prop_assert!(!matches!(once.last(), Some(Value::None)));
        }
    }
}
