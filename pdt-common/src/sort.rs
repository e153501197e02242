//! Migration dependency ordering
//!
//! Produces the order in which migrations are applied to an instance: every
//! migration comes after the migrations it depends on. Among migrations that
//! are ready at the same time the one with the smallest (case, id) key goes
//! first, so the output is deterministic for a given input.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::db::Migration;
use crate::{Error, Result};

/// Something that takes part in dependency ordering
pub trait DependencyNode {
    /// Unique id of the node within the input
    fn node_id(&self) -> i64;

    /// Tie-break key; smaller keys come first among ready nodes
    fn tie_break_key(&self) -> (i64, i64);

    /// Ids of nodes that must precede this one
    fn dependencies(&self) -> &[i64];
}

impl DependencyNode for Migration {
    fn node_id(&self) -> i64 {
        self.id
    }

    fn tie_break_key(&self) -> (i64, i64) {
        (self.case, self.id)
    }

    fn dependencies(&self) -> &[i64] {
        &self.depends_on
    }
}

/// Order migrations so that dependencies come first
///
/// Dependencies on migrations missing from `items` are ignored: the input is
/// usually a filtered subset. Returns [`Error::DependencyCycle`] with the ids
/// that could not be placed when the dependencies restricted to `items`
/// contain a cycle.
pub fn sort_migrations<T: DependencyNode>(items: Vec<T>) -> Result<Vec<T>> {
    let position: HashMap<i64, usize> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| (item.node_id(), idx))
        .collect();

    let mut in_degree = vec![0usize; items.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];

    for (idx, item) in items.iter().enumerate() {
        let mut deps: Vec<usize> = item
            .dependencies()
            .iter()
            .filter_map(|dep| position.get(dep).copied())
            .collect();
        deps.sort_unstable();
        deps.dedup();

        for dep in deps {
            in_degree[idx] += 1;
            dependents[dep].push(idx);
        }
    }

    let mut ready: BinaryHeap<Reverse<((i64, i64), usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(idx, _)| Reverse((items[idx].tie_break_key(), idx)))
        .collect();

    let mut order = Vec::with_capacity(items.len());
    while let Some(Reverse((_, idx))) = ready.pop() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse((items[dependent].tie_break_key(), dependent)));
            }
        }
    }

    if order.len() < items.len() {
        let mut unresolved: Vec<i64> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(idx, _)| items[idx].node_id())
            .collect();
        unresolved.sort_unstable();
        return Err(Error::DependencyCycle(unresolved));
    }

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect())
}
