use std::collections::BTreeMap;

use cluster_selector_core::{ClusterIdentity, IndexedWeightTree, Weight};
use rand::{Rng, RngCore};
use tracing::{debug, info};

use crate::{EpochClock, SelectionError, SelectorSnapshot};

/// Weighted committee selection over an [`IndexedWeightTree`], with one
/// immutable result per epoch.
///
/// An epoch without its own result inherits the result of the nearest
/// earlier epoch that has one. [`ClusterSelector::update_missing_clusters`]
/// writes those inherited results out so later lookups hit directly.
#[derive(Clone, Debug)]
pub struct ClusterSelector<T> {
    tree: IndexedWeightTree<T>,
    clock: EpochClock,
    committee_size: usize,
    results: BTreeMap<u64, Vec<T>>,
    last_updated_epoch: u64,
}

impl<T: ClusterIdentity> ClusterSelector<T> {
    pub fn new(clock: EpochClock, committee_size: usize) -> Self {
        Self {
            tree: IndexedWeightTree::new(),
            clock,
            committee_size,
            results: BTreeMap::new(),
            last_updated_epoch: 0,
        }
    }

    pub fn from_snapshot(
        clock: EpochClock,
        committee_size: usize,
        snapshot: &SelectorSnapshot<T>,
    ) -> Result<Self, SelectionError> {
        let mut selector = Self::new(clock, committee_size);
        let (addresses, weights): (Vec<T>, Vec<Weight>) = snapshot.members.iter().copied().unzip();
        selector.tree.insert_multiple(&addresses, &weights)?;
        selector.results = snapshot.results.clone();
        selector.last_updated_epoch = snapshot
            .results
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default()
            .max(snapshot.last_updated_epoch);
        Ok(selector)
    }

    pub fn snapshot(&self) -> SelectorSnapshot<T> {
        SelectorSnapshot {
            members: self.tree.members().collect(),
            results: self.results.clone(),
            last_updated_epoch: self.last_updated_epoch,
            ..Default::default()
        }
    }

    pub fn tree(&self) -> &IndexedWeightTree<T> {
        &self.tree
    }

    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    pub fn committee_size(&self) -> usize {
        self.committee_size
    }

    pub fn nodes_in_tree(&self) -> usize {
        self.tree.nodes_in_tree()
    }

    pub fn last_updated_epoch(&self) -> u64 {
        self.last_updated_epoch
    }

    pub fn has_selection(&self, epoch: u64) -> bool {
        self.results.contains_key(&epoch)
    }

    pub fn selected_epochs(&self) -> impl Iterator<Item = u64> + '_ {
        self.results.keys().copied()
    }

    pub fn current_epoch(&self, unix_timestamp: u64) -> Result<u64, SelectionError> {
        self.clock.epoch_at(unix_timestamp)
    }

    pub fn upsert(&mut self, address: T, weight: Weight) -> Result<(), SelectionError> {
        Ok(self.tree.upsert(address, weight)?)
    }

    pub fn upsert_multiple(&mut self, addresses: &[T], weights: &[Weight]) -> Result<(), SelectionError> {
        Ok(self.tree.upsert_multiple(addresses, weights)?)
    }

    pub fn insert(&mut self, address: T, weight: Weight) -> Result<(), SelectionError> {
        self.tree.insert(address, weight)?;
        Ok(())
    }

    pub fn insert_multiple(&mut self, addresses: &[T], weights: &[Weight]) -> Result<(), SelectionError> {
        Ok(self.tree.insert_multiple(addresses, weights)?)
    }

    pub fn update(&mut self, address: T, weight: Weight) -> Result<(), SelectionError> {
        Ok(self.tree.update(address, weight)?)
    }

    pub fn delete(&mut self, address: T) -> Result<(), SelectionError> {
        Ok(self.tree.delete(address)?)
    }

    pub fn delete_if_present(&mut self, address: T) -> bool {
        self.tree.delete_if_present(address)
    }

    /// See [`IndexedWeightTree::insert_unchecked`].
    pub fn insert_unchecked(&mut self, address: T, weight: Weight) {
        self.tree.insert_unchecked(address, weight);
    }

    pub fn insert_multiple_unchecked(&mut self, addresses: &[T], weights: &[Weight]) {
        self.tree.insert_multiple_unchecked(addresses, weights);
    }

    /// See [`IndexedWeightTree::update_unchecked`].
    pub fn update_unchecked(&mut self, address: T, weight: Weight) {
        self.tree.update_unchecked(address, weight);
    }

    /// See [`IndexedWeightTree::delete_unchecked`].
    pub fn delete_unchecked(&mut self, address: T) {
        self.tree.delete_unchecked(address);
    }

    /// Draws the committee for the epoch containing `unix_timestamp` and
    /// persists it. Each epoch can be selected at most once.
    ///
    /// Draws are uniform over `[0, remaining_weight)`, so each unpicked
    /// cluster wins with probability proportional to its weight among the
    /// remaining candidates.
    pub fn select_clusters<R: RngCore + ?Sized>(
        &mut self,
        unix_timestamp: u64,
        rng: &mut R,
    ) -> Result<Vec<T>, SelectionError> {
        let epoch = self.current_epoch(unix_timestamp)?;
        if self.tree.is_empty() {
            return Err(SelectionError::NoClusterSelected);
        }
        if self.has_selection(epoch) {
            return Err(SelectionError::AlreadySelected(epoch));
        }

        let winners = self
            .tree
            .pick_without_replacement(self.committee_size, |total| rng.gen_range(0..total));
        // every live cluster has zero weight
        if winners.is_empty() {
            return Err(SelectionError::NoClusterSelected);
        }

        info!(
            epoch,
            winners = winners.len(),
            candidates = self.tree.nodes_in_tree(),
            "Selected clusters"
        );
        self.results.insert(epoch, winners.clone());
        self.last_updated_epoch = self.last_updated_epoch.max(epoch);
        Ok(winners)
    }

    /// The committee in force at `epoch`: its own selection, or the nearest
    /// earlier one.
    pub fn get_clusters(&self, epoch: u64) -> Result<&[T], SelectionError> {
        self.resolve(epoch).map(|(_, clusters)| clusters)
    }

    /// Writes the committee in force at `epoch` into every empty slot
    /// between the epoch it was resolved from and `epoch`.
    pub fn update_missing_clusters(
        &mut self,
        epoch: u64,
        unix_timestamp: u64,
    ) -> Result<Vec<T>, SelectionError> {
        let current = self.current_epoch(unix_timestamp)?;
        if epoch > current {
            return Err(SelectionError::FutureEpoch { epoch, current });
        }
        let (found, clusters) = self.resolve(epoch)?;
        let clusters = clusters.to_vec();

        for missing in found + 1..=epoch {
            self.results.insert(missing, clusters.clone());
        }
        if epoch > found {
            debug!(from = found + 1, to = epoch, "Backfilled clusters");
        }
        self.last_updated_epoch = self.last_updated_epoch.max(epoch);
        Ok(clusters)
    }

    fn resolve(&self, epoch: u64) -> Result<(u64, &[T]), SelectionError> {
        self.results
            .range(..=epoch)
            .next_back()
            .map(|(found, clusters)| (*found, clusters.as_slice()))
            .ok_or(SelectionError::NoPriorSelection(epoch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_selector_core::{Address, TreeError};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const START: u64 = 1_000;
    const LENGTH: u64 = 100;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn selector(committee_size: usize) -> ClusterSelector<Address> {
        ClusterSelector::new(EpochClock::new(START, LENGTH).unwrap(), committee_size)
    }

    fn at_epoch(epoch: u64) -> u64 {
        START + (epoch - 1) * LENGTH
    }

    #[test]
    fn test_empty_tree_fails() {
        let mut selector = selector(3);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            selector.select_clusters(START, &mut rng),
            Err(SelectionError::NoClusterSelected)
        );
        assert!(!selector.has_selection(1));
    }

    #[test]
    fn test_single_leaf_always_wins() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for seed in 0..20 {
            let mut selector = selector(5);
            selector.upsert(addr(9), 1 + seed).unwrap();
            let winners = selector.select_clusters(START, &mut rng).unwrap();
            assert_eq!(winners, vec![addr(9)]);
        }
    }

    #[test]
    fn test_all_zero_weights_select_nothing() {
        let mut selector = selector(2);
        selector.upsert(addr(1), 0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            selector.select_clusters(START, &mut rng),
            Err(SelectionError::NoClusterSelected)
        );
    }

    #[test]
    fn test_committee_size_bounds_winners() {
        let mut selector = selector(3);
        for n in 1..=10 {
            selector.upsert(addr(n), n as Weight).unwrap();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut winners = selector.select_clusters(START, &mut rng).unwrap();
        assert_eq!(winners.len(), 3);
        winners.sort();
        winners.dedup();
        assert_eq!(winners.len(), 3);
    }

    #[test]
    fn test_select_once_per_epoch() {
        let mut selector = selector(2);
        selector.upsert(addr(1), 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let first = selector.select_clusters(at_epoch(2), &mut rng).unwrap();
        assert_eq!(
            selector.select_clusters(at_epoch(2) + LENGTH - 1, &mut rng),
            Err(SelectionError::AlreadySelected(2))
        );
        selector.upsert(addr(2), 1_000).unwrap();
        assert_eq!(selector.get_clusters(2).unwrap(), first.as_slice());
        assert_eq!(selector.last_updated_epoch(), 2);
    }

    #[test]
    fn test_select_before_start_fails() {
        let mut selector = selector(2);
        selector.upsert(addr(1), 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            selector.select_clusters(START - 1, &mut rng),
            Err(SelectionError::EpochNotStarted {
                now: START - 1,
                start_time: START
            })
        );
    }

    #[test]
    fn test_get_clusters_walks_back() {
        let mut selector = selector(1);
        selector.upsert(addr(1), 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        assert_eq!(
            selector.get_clusters(1),
            Err(SelectionError::NoPriorSelection(1))
        );
        selector.select_clusters(at_epoch(3), &mut rng).unwrap();

        assert_eq!(selector.get_clusters(2), Err(SelectionError::NoPriorSelection(2)));
        assert_eq!(selector.get_clusters(3).unwrap(), &[addr(1)]);
        assert_eq!(selector.get_clusters(50).unwrap(), &[addr(1)]);
        assert!(!selector.has_selection(50));
    }

    #[test]
    fn test_update_missing_clusters_fills_gap() {
        let mut selector = selector(1);
        selector.upsert(addr(1), 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        selector.select_clusters(at_epoch(2), &mut rng).unwrap();

        let now = at_epoch(8);
        let resolved = selector.update_missing_clusters(6, now).unwrap();
        assert_eq!(resolved, vec![addr(1)]);
        assert_eq!(selector.selected_epochs().collect::<Vec<_>>(), vec![2, 3, 4, 5, 6]);
        assert_eq!(selector.last_updated_epoch(), 6);

        assert_eq!(
            selector.update_missing_clusters(9, now),
            Err(SelectionError::FutureEpoch {
                epoch: 9,
                current: 8
            })
        );
    }

    #[test]
    fn test_backfilled_epoch_is_frozen() {
        let mut selector = selector(1);
        selector.upsert(addr(1), 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        selector.select_clusters(at_epoch(1), &mut rng).unwrap();

        selector.update_missing_clusters(2, at_epoch(2)).unwrap();
        assert_eq!(
            selector.select_clusters(at_epoch(2), &mut rng),
            Err(SelectionError::AlreadySelected(2))
        );
    }

    #[test]
    fn test_update_missing_clusters_without_selection_fails() {
        let mut selector = selector(1);
        assert_eq!(
            selector.update_missing_clusters(1, at_epoch(1)),
            Err(SelectionError::NoPriorSelection(1))
        );
    }

    #[test]
    fn test_tree_errors_pass_through() {
        let mut selector = selector(1);
        assert_eq!(
            selector.delete(addr(5)),
            Err(SelectionError::Tree(TreeError::NotPresent(addr(5).to_string())))
        );
    }

    #[test]
    fn test_snapshot_restores_indices_and_results() {
        let mut selector = selector(2);
        for n in 1..=5 {
            selector.upsert(addr(n), n as Weight * 10).unwrap();
        }
        selector.delete(addr(2)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        selector.select_clusters(at_epoch(1), &mut rng).unwrap();

        let snapshot = selector.snapshot();
        let restored =
            ClusterSelector::from_snapshot(*selector.clock(), 2, &snapshot).unwrap();

        for n in [1, 3, 4, 5] {
            assert_eq!(restored.tree().index_of(&addr(n)), selector.tree().index_of(&addr(n)));
        }
        assert_eq!(restored.get_clusters(1), selector.get_clusters(1));
        assert_eq!(restored.last_updated_epoch(), 1);
    }
}
