//! Array-backed weighted tree supporting O(log n) membership updates and
//! O(log n) weighted picks.
//!
//! Nodes live at 1-based indices `1..=len`; the children of `i` are `2i` and
//! `2i + 1`. Every node caches the total weight of its left and right
//! subtrees, so the total weight of the tree is
//! `weight(1) + left_sum(1) + right_sum(1)`.
//!
//! Indices are arena slots, not handles: deleting an entry moves the last
//! entry into the freed slot. Resolve an identity to its index again after
//! any mutation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ClusterIdentity, TreeError};

pub type Weight = u128;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub weight: Weight,
    pub left_sum: Weight,
    pub right_sum: Weight,
}

impl Node {
    /// Weight of the subtree rooted at this node.
    pub fn subtree_weight(&self) -> Weight {
        self.weight + self.left_sum + self.right_sum
    }
}

#[derive(Clone, Debug)]
pub struct IndexedWeightTree<T> {
    // slot 0 is the empty sentinel in both vectors
    nodes: Vec<Node>,
    index_to_address: Vec<T>,
    address_to_index: HashMap<T, usize>,
}

impl<T: ClusterIdentity> Default for IndexedWeightTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ClusterIdentity> IndexedWeightTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            index_to_address: vec![T::default()],
            address_to_index: HashMap::new(),
        }
    }

    pub fn nodes_in_tree(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_in_tree() == 0
    }

    pub fn total_weight(&self) -> Weight {
        match self.nodes.get(1) {
            Some(root) => root.subtree_weight(),
            None => 0,
        }
    }

    pub fn contains(&self, address: &T) -> bool {
        self.address_to_index.contains_key(address)
    }

    pub fn index_of(&self, address: &T) -> Option<usize> {
        self.address_to_index.get(address).copied()
    }

    pub fn weight_of(&self, address: &T) -> Option<Weight> {
        self.index_of(address).map(|index| self.nodes[index].weight)
    }

    pub fn node(&self, index: usize) -> Result<Node, TreeError> {
        self.check_index(index)?;
        Ok(self.nodes[index])
    }

    pub fn address_at(&self, index: usize) -> Result<T, TreeError> {
        self.check_index(index)?;
        Ok(self.index_to_address[index])
    }

    /// Live entries in index order.
    pub fn members(&self) -> impl Iterator<Item = (T, Weight)> + '_ {
        self.index_to_address
            .iter()
            .zip(self.nodes.iter())
            .skip(1)
            .map(|(address, node)| (*address, node.weight))
    }

    pub fn insert(&mut self, address: T, weight: Weight) -> Result<usize, TreeError> {
        self.check_storable(&address)?;
        if self.contains(&address) {
            return Err(TreeError::AlreadyPresent(address.to_string()));
        }
        self.total_weight()
            .checked_add(weight)
            .ok_or(TreeError::WeightOverflow)?;
        Ok(self.insert_unchecked(address, weight))
    }

    pub fn update(&mut self, address: T, weight: Weight) -> Result<(), TreeError> {
        let index = self
            .index_of(&address)
            .ok_or_else(|| TreeError::NotPresent(address.to_string()))?;
        let old = self.nodes[index].weight;
        (self.total_weight() - old)
            .checked_add(weight)
            .ok_or(TreeError::WeightOverflow)?;
        self.update_unchecked(address, weight);
        Ok(())
    }

    /// Updates `address` if present, inserts it otherwise.
    pub fn upsert(&mut self, address: T, weight: Weight) -> Result<(), TreeError> {
        if self.contains(&address) {
            self.update(address, weight)
        } else {
            self.insert(address, weight).map(|_| ())
        }
    }

    /// Inserts every pair, or none of them.
    pub fn insert_multiple(&mut self, addresses: &[T], weights: &[Weight]) -> Result<(), TreeError> {
        check_lengths(addresses, weights)?;
        let mut seen = HashSet::with_capacity(addresses.len());
        let mut total = self.total_weight();
        for (address, weight) in addresses.iter().zip(weights) {
            self.check_storable(address)?;
            if self.contains(address) {
                return Err(TreeError::AlreadyPresent(address.to_string()));
            }
            if !seen.insert(*address) {
                return Err(TreeError::DuplicateInBatch(address.to_string()));
            }
            total = total.checked_add(*weight).ok_or(TreeError::WeightOverflow)?;
        }
        self.insert_multiple_unchecked(addresses, weights);
        Ok(())
    }

    /// Upserts every pair, or none of them. A later occurrence of the same
    /// address in the batch wins; new addresses are appended in order of
    /// first occurrence.
    ///
    /// Lowered weights are written before raised or inserted ones, so no
    /// cached sum ever exceeds its final value while the batch is applied.
    pub fn upsert_multiple(&mut self, addresses: &[T], weights: &[Weight]) -> Result<(), TreeError> {
        check_lengths(addresses, weights)?;
        let mut batch: Vec<(T, Weight)> = Vec::with_capacity(addresses.len());
        let mut slots: HashMap<T, usize> = HashMap::with_capacity(addresses.len());
        for (address, weight) in addresses.iter().zip(weights) {
            self.check_storable(address)?;
            match slots.get(address) {
                Some(&slot) => batch[slot].1 = *weight,
                None => {
                    slots.insert(*address, batch.len());
                    batch.push((*address, *weight));
                }
            }
        }

        // every old weight is part of the current total, so this cannot underflow
        let old_total: Weight = batch
            .iter()
            .map(|(address, _)| self.weight_of(address).unwrap_or(0))
            .sum();
        let mut total = self.total_weight() - old_total;
        for (_, weight) in &batch {
            total = total.checked_add(*weight).ok_or(TreeError::WeightOverflow)?;
        }

        let (lowered, raised): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|(address, weight)| matches!(self.weight_of(address), Some(old) if *weight < old));
        for (address, weight) in lowered {
            self.update_unchecked(address, weight);
        }
        for (address, weight) in raised {
            if self.contains(&address) {
                self.update_unchecked(address, weight);
            } else {
                self.insert_unchecked(address, weight);
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, address: T) -> Result<(), TreeError> {
        if !self.contains(&address) {
            return Err(TreeError::NotPresent(address.to_string()));
        }
        self.delete_unchecked(address);
        Ok(())
    }

    /// Returns whether `address` was present.
    pub fn delete_if_present(&mut self, address: T) -> bool {
        if self.contains(&address) {
            self.delete_unchecked(address);
            true
        } else {
            false
        }
    }

    /// Appends `address` without checking that it is new or non-zero.
    ///
    /// Inserting an address that is already present corrupts the registry.
    pub fn insert_unchecked(&mut self, address: T, weight: Weight) -> usize {
        debug_assert!(!address.is_zero());
        debug_assert!(!self.contains(&address));

        let index = self.nodes.len();
        self.nodes.push(Node {
            weight,
            ..Default::default()
        });
        self.index_to_address.push(address);
        self.address_to_index.insert(address, index);
        self.add_to_ancestors(index, weight);

        debug!(cluster = %address, index, weight, "Inserted cluster");
        index
    }

    pub fn insert_multiple_unchecked(&mut self, addresses: &[T], weights: &[Weight]) {
        for (address, weight) in addresses.iter().zip(weights) {
            self.insert_unchecked(*address, *weight);
        }
    }

    /// # Panics
    ///
    /// Panics if `address` is not in the tree.
    pub fn update_unchecked(&mut self, address: T, weight: Weight) {
        let index = self.address_to_index[&address];
        let old = self.nodes[index].weight;
        self.nodes[index].weight = weight;
        if weight > old {
            self.add_to_ancestors(index, weight - old);
        } else {
            self.sub_from_ancestors(index, old - weight);
        }

        debug!(cluster = %address, index, old, weight, "Updated cluster");
    }

    /// Removes `address` by moving the last entry into its slot.
    ///
    /// # Panics
    ///
    /// Panics if `address` is not in the tree.
    pub fn delete_unchecked(&mut self, address: T) {
        let target = self.address_to_index[&address];
        let last = self.nodes_in_tree();
        let target_weight = self.nodes[target].weight;

        if target == last {
            self.sub_from_ancestors(target, target_weight);
        } else {
            let moved = self.index_to_address[last];
            let moved_weight = self.nodes[last].weight;

            self.sub_from_ancestors(last, moved_weight);
            self.sub_from_ancestors(target, target_weight);

            self.nodes[target].weight = moved_weight;
            self.index_to_address[target] = moved;
            self.address_to_index.insert(moved, target);
            self.add_to_ancestors(target, moved_weight);
        }

        // the last slot is a leaf, so its cached sums are already zero
        self.nodes.pop();
        self.index_to_address.pop();
        self.address_to_index.remove(&address);

        debug!(cluster = %address, index = target, "Deleted cluster");
    }

    /// Descends from the root to the entry covering `value`.
    ///
    /// At each node, values below the node's own weight select it; the
    /// boundary `value == weight` falls through to the subtrees. Returns
    /// `None` when `value >= total_weight()`.
    pub fn pick(&self, mut value: Weight) -> Option<usize> {
        if value >= self.total_weight() {
            return None;
        }
        let mut index = 1;
        loop {
            let node = &self.nodes[index];
            if value < node.weight {
                return Some(index);
            }
            value -= node.weight;
            if value < node.left_sum {
                index *= 2;
            } else {
                value -= node.left_sum;
                index = index * 2 + 1;
            }
        }
    }

    /// Draws up to `count` distinct entries, each with probability
    /// proportional to its weight among the entries not yet drawn.
    ///
    /// `draw(total)` must return a value in `[0, total)`; out-of-range
    /// values are reduced modulo `total`. Picked entries are zeroed for the
    /// rest of the pass and restored before returning. The pass ends early
    /// once the remaining weight is zero.
    pub fn pick_without_replacement(
        &mut self,
        count: usize,
        mut draw: impl FnMut(Weight) -> Weight,
    ) -> Vec<T> {
        let count = count.min(self.nodes_in_tree());
        let mut zeroed: Vec<(usize, Weight)> = Vec::with_capacity(count);

        for _ in 0..count {
            let total = self.total_weight();
            if total == 0 {
                break;
            }
            let value = draw(total) % total;
            let Some(index) = self.pick(value) else {
                break;
            };
            let weight = self.nodes[index].weight;
            self.nodes[index].weight = 0;
            self.sub_from_ancestors(index, weight);
            zeroed.push((index, weight));
        }

        let winners = zeroed
            .iter()
            .map(|(index, _)| self.index_to_address[*index])
            .collect();

        for (index, weight) in zeroed.into_iter().rev() {
            self.nodes[index].weight = weight;
            self.add_to_ancestors(index, weight);
        }

        winners
    }

    fn add_to_ancestors(&mut self, index: usize, amount: Weight) {
        if amount == 0 {
            return;
        }
        let mut child = index;
        while child > 1 {
            let parent = child / 2;
            if child % 2 == 0 {
                self.nodes[parent].left_sum += amount;
            } else {
                self.nodes[parent].right_sum += amount;
            }
            child = parent;
        }
    }

    fn sub_from_ancestors(&mut self, index: usize, amount: Weight) {
        if amount == 0 {
            return;
        }
        let mut child = index;
        while child > 1 {
            let parent = child / 2;
            if child % 2 == 0 {
                self.nodes[parent].left_sum -= amount;
            } else {
                self.nodes[parent].right_sum -= amount;
            }
            child = parent;
        }
    }

    fn check_storable(&self, address: &T) -> Result<(), TreeError> {
        if address.is_zero() {
            return Err(TreeError::ZeroIdentity);
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), TreeError> {
        let len = self.nodes_in_tree();
        if index == 0 || index > len {
            return Err(TreeError::IndexOutOfRange { index, len });
        }
        Ok(())
    }
}

fn check_lengths<T>(addresses: &[T], weights: &[Weight]) -> Result<(), TreeError> {
    if addresses.len() != weights.len() {
        return Err(TreeError::LengthMismatch {
            addresses: addresses.len(),
            weights: weights.len(),
        });
    }
    Ok(())
}
