//! Group visibility scope
//!
//! A user sees recordings owned by members of their groups and of every group
//! nested below them. The hierarchy is treated as an arbitrary directed graph:
//! cycles introduced by bad data must not hang or duplicate the traversal.

use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

use crate::db::GroupAdjacency;

/// All groups reachable from `roots` (the roots included), breadth-first
pub fn descendant_groups(adjacency: &GroupAdjacency, roots: &[Uuid]) -> Vec<Uuid> {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<Uuid> = VecDeque::new();

    for root in roots {
        if visited.insert(*root) {
            queue.push_back(*root);
        }
    }

    while let Some(group) = queue.pop_front() {
        order.push(group);
        if let Some(children) = adjacency.get(&group) {
            for child in children {
                if visited.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
    }

    order
}
