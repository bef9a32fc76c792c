use cluster_selector_core::{ClusterIdentity, Weight};
use rand::RngCore;
use tracing::info;

use crate::{
    Authorizer, Capability, ClusterSelector, GasRefunder, RefundPool, RefundReceipt,
    SelectionError, SelectorSnapshot, ServiceError,
};

/// The externally callable surface: a [`ClusterSelector`] plus its refund
/// pool, with every mutation checked against an injected [`Authorizer`].
#[derive(Debug)]
pub struct SelectorService<T, A> {
    selector: ClusterSelector<T>,
    refunder: GasRefunder,
    pool: RefundPool<T>,
    authorizer: A,
}

impl<T: ClusterIdentity, A: Authorizer<T>> SelectorService<T, A> {
    pub fn new(selector: ClusterSelector<T>, refunder: GasRefunder, authorizer: A) -> Self {
        Self {
            selector,
            refunder,
            pool: RefundPool::default(),
            authorizer,
        }
    }

    pub fn with_pool(mut self, pool: RefundPool<T>) -> Self {
        self.pool = pool;
        self
    }

    pub fn selector(&self) -> &ClusterSelector<T> {
        &self.selector
    }

    pub fn pool(&self) -> &RefundPool<T> {
        &self.pool
    }

    pub fn refunder(&self) -> &GasRefunder {
        &self.refunder
    }

    pub fn snapshot(&self) -> SelectorSnapshot<T> {
        SelectorSnapshot {
            refund_balance: self.pool.balance(),
            paid: self.pool.paid().clone(),
            ..self.selector.snapshot()
        }
    }

    fn authorize(&self, caller: &T, capability: Capability) -> Result<(), ServiceError> {
        if self.authorizer.is_authorized(caller, capability) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized {
                caller: caller.to_string(),
                capability,
            })
        }
    }

    pub fn upsert(&mut self, caller: &T, address: T, weight: Weight) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        Ok(self.selector.upsert(address, weight)?)
    }

    pub fn upsert_multiple(
        &mut self,
        caller: &T,
        addresses: &[T],
        weights: &[Weight],
    ) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        Ok(self.selector.upsert_multiple(addresses, weights)?)
    }

    pub fn insert_multiple(
        &mut self,
        caller: &T,
        addresses: &[T],
        weights: &[Weight],
    ) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        Ok(self.selector.insert_multiple(addresses, weights)?)
    }

    pub fn delete(&mut self, caller: &T, address: T) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        Ok(self.selector.delete(address)?)
    }

    pub fn delete_if_present(&mut self, caller: &T, address: T) -> Result<bool, ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        Ok(self.selector.delete_if_present(address))
    }

    /// Caller guarantees `address` is new.
    pub fn insert_unchecked(&mut self, caller: &T, address: T, weight: Weight) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        self.selector.insert_unchecked(address, weight);
        Ok(())
    }

    /// Caller guarantees every address is new and distinct.
    pub fn insert_multiple_unchecked(
        &mut self,
        caller: &T,
        addresses: &[T],
        weights: &[Weight],
    ) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        self.selector.insert_multiple_unchecked(addresses, weights);
        Ok(())
    }

    /// Caller guarantees `address` is present.
    pub fn update_unchecked(&mut self, caller: &T, address: T, weight: Weight) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        self.selector.update_unchecked(address, weight);
        Ok(())
    }

    /// Caller guarantees `address` is present.
    pub fn delete_unchecked(&mut self, caller: &T, address: T) -> Result<(), ServiceError> {
        self.authorize(caller, Capability::Updater)?;
        self.selector.delete_unchecked(address);
        Ok(())
    }

    /// Open to any caller; the caller is refunded from the pool.
    pub fn select_clusters<R: RngCore + ?Sized>(
        &mut self,
        caller: &T,
        unix_timestamp: u64,
        rng: &mut R,
        gas_price: u128,
        tx_size: u64,
    ) -> Result<RefundReceipt<T>, ServiceError> {
        Ok(self.refunder.select_and_refund(
            &mut self.selector,
            &mut self.pool,
            *caller,
            unix_timestamp,
            rng,
            gas_price,
            tx_size,
        )?)
    }

    pub fn get_clusters(&self, epoch: u64) -> Result<Vec<T>, ServiceError> {
        Ok(self.selector.get_clusters(epoch)?.to_vec())
    }

    pub fn update_missing_clusters(
        &mut self,
        epoch: u64,
        unix_timestamp: u64,
    ) -> Result<Vec<T>, ServiceError> {
        Ok(self.selector.update_missing_clusters(epoch, unix_timestamp)?)
    }

    pub fn current_epoch(&self, unix_timestamp: u64) -> Result<u64, SelectionError> {
        self.selector.current_epoch(unix_timestamp)
    }

    pub fn nodes_in_tree(&self) -> usize {
        self.selector.nodes_in_tree()
    }

    pub fn fund(&mut self, amount: u128) -> u128 {
        let balance = self.pool.fund(amount);
        info!(amount, balance, "Funded refund pool");
        balance
    }

    pub fn flush_refunds(&mut self, caller: &T, to: T) -> Result<u128, ServiceError> {
        self.authorize(caller, Capability::RewardController)?;
        if to.is_zero() {
            return Err(ServiceError::ZeroRecipient);
        }
        Ok(self.pool.flush(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EpochClock, NoDataCost, RefundConfig};
    use cluster_selector_core::{Address, ErrorKind};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    const UPDATER: u64 = 100;
    const CONTROLLER: u64 = 200;

    fn roles(caller: &Address, capability: Capability) -> bool {
        match capability {
            Capability::Updater => *caller == addr(UPDATER),
            Capability::RewardController => *caller == addr(CONTROLLER),
        }
    }

    type Roles = fn(&Address, Capability) -> bool;

    fn service() -> SelectorService<Address, Roles> {
        SelectorService::new(
            ClusterSelector::new(EpochClock::new(0, 10).unwrap(), 2),
            GasRefunder::new(
                RefundConfig {
                    fixed_overhead: 100,
                    per_winner: 10,
                },
                Box::new(NoDataCost),
            ),
            roles as Roles,
        )
    }

    #[test]
    fn test_updates_require_updater() {
        let mut service = service();
        let err = service.upsert(&addr(1), addr(5), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(service.nodes_in_tree(), 0);

        service.upsert(&addr(UPDATER), addr(5), 10).unwrap();
        assert_eq!(service.nodes_in_tree(), 1);

        assert!(service.delete_if_present(&addr(CONTROLLER), addr(5)).is_err());
        assert_eq!(service.delete_if_present(&addr(UPDATER), addr(5)), Ok(true));
    }

    #[test]
    fn test_unchecked_updates_require_updater() {
        let mut service = service();
        let outsider = addr(CONTROLLER);
        service.upsert(&addr(UPDATER), addr(5), 10).unwrap();
        let before = service.snapshot();

        let denied = [
            service.insert_unchecked(&outsider, addr(6), 1),
            service.insert_multiple_unchecked(&outsider, &[addr(7), addr(8)], &[1, 2]),
            service.update_unchecked(&outsider, addr(5), 99),
            service.delete_unchecked(&outsider, addr(5)),
        ];
        for result in denied {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Authorization);
        }
        assert_eq!(service.snapshot(), before);

        let updater = addr(UPDATER);
        service.insert_unchecked(&updater, addr(6), 1).unwrap();
        service
            .insert_multiple_unchecked(&updater, &[addr(7), addr(8)], &[2, 3])
            .unwrap();
        service.update_unchecked(&updater, addr(5), 20).unwrap();
        service.delete_unchecked(&updater, addr(6)).unwrap();
        assert_eq!(service.nodes_in_tree(), 3);
        assert_eq!(service.selector().tree().total_weight(), 20 + 2 + 3);
    }

    #[test]
    fn test_anyone_selects_and_is_refunded() {
        let mut service = service();
        service
            .upsert_multiple(&addr(UPDATER), &[addr(1), addr(2), addr(3)], &[1, 2, 3])
            .unwrap();
        service.fund(1_000);

        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let caller = addr(77);
        let receipt = service.select_clusters(&caller, 0, &mut rng, 2, 0).unwrap();
        assert_eq!(receipt.winners.len(), 2);
        assert_eq!(receipt.computed, (100 + 20) * 2);
        assert_eq!(service.pool().paid_to(&caller), 240);
        assert_eq!(service.get_clusters(1).unwrap(), receipt.winners);

        let err = service.select_clusters(&caller, 5, &mut rng, 2, 0).unwrap_err();
        assert_eq!(err, ServiceError::Selection(SelectionError::AlreadySelected(1)));
        assert_eq!(service.pool().balance(), 760);
    }

    #[test]
    fn test_flush_requires_reward_controller() {
        let mut service = service();
        service.fund(500);
        assert!(service.flush_refunds(&addr(UPDATER), addr(9)).is_err());
        assert_eq!(
            service.flush_refunds(&addr(CONTROLLER), Address::ZERO),
            Err(ServiceError::ZeroRecipient)
        );
        assert_eq!(service.flush_refunds(&addr(CONTROLLER), addr(9)), Ok(500));
        assert_eq!(service.pool().balance(), 0);
    }

    #[test]
    fn test_snapshot_carries_pool() {
        let mut service = service();
        service.upsert(&addr(UPDATER), addr(1), 5).unwrap();
        service.fund(1_000);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        service.select_clusters(&addr(3), 0, &mut rng, 1, 0).unwrap();

        let snapshot = service.snapshot();
        assert_eq!(snapshot.members, vec![(addr(1), 5)]);
        assert_eq!(snapshot.refund_balance, 1_000 - 110);
        assert_eq!(snapshot.paid.get(&addr(3)), Some(&110));
        assert_eq!(snapshot.results.get(&1), Some(&vec![addr(1)]));
    }
}
