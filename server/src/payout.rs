use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use types::{PayoutEntry, PayoutStatus};

use crate::{consts::PAYOUT_BATCH_SIZE, error::Error, store::Store, utils};

/// Failure detail of a lease that was never resolved by its worker.
pub const LEASE_ABANDONED: &str = "lease abandoned, verify on-chain";

/// The external rail that moves funds.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Transfers `amount` whole tokens to `to`. Returns the reference of a
    /// confirmed transaction, or an error if it could not be confirmed.
    async fn transfer(&self, to: &Pubkey, amount: u64) -> Result<String, Error>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
}

/// Drains the payout queue against a payment rail, one entry at a time.
pub struct PayoutExecutor {
    store: Arc<dyn Store>,
    rail: Arc<dyn PaymentRail>,

    // Upper bound on a single transfer, confirmation included.
    timeout: Duration,

    // Serializes drains within this process; the store lease covers the rest.
    drain_lock: Mutex<()>,
}

impl PayoutExecutor {
    pub fn new(store: Arc<dyn Store>, rail: Arc<dyn PaymentRail>) -> Self {
        PayoutExecutor {
            store,
            rail,
            timeout: Duration::from_secs(240),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Claims up to `PAYOUT_BATCH_SIZE` pending entries, oldest first, and
    /// executes them in order. A failed entry is recorded and the batch moves on.
    pub async fn drain(&self, now: i64) -> Result<DrainReport, Error> {
        let _guard = self.drain_lock.lock().await;
        let batch = self
            .store
            .claim_pending_payouts(PAYOUT_BATCH_SIZE, now)
            .await?;
        if batch.is_empty() {
            log::info!("no pending payouts to process");
            return Ok(DrainReport::default());
        }
        log::info!("found {} pending payouts to process", batch.len());
        let mut report = DrainReport::default();
        for entry in batch.iter() {
            match self.execute(entry).await {
                Ok(signature) => {
                    log::info!(
                        "payout {} of {} to {} sent: {}",
                        entry.id,
                        entry.amount,
                        entry.wallet,
                        signature
                    );
                    report.sent += 1;
                    match self
                        .store
                        .mark_payout_sent(entry.id, &signature, utils::unix_timestamp())
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => log::error!("payout {} was no longer pending", entry.id),
                        // funds moved, the lease keeps it from being paid again
                        Err(err) => log::error!(
                            "payout {} sent as {} but not recorded: {:?}",
                            entry.id,
                            signature,
                            err
                        ),
                    }
                }
                Err(err) => {
                    let detail = err.to_string();
                    log::error!(
                        "failed to send payout {} to {}: {}",
                        entry.id,
                        entry.wallet,
                        detail
                    );
                    report.failed += 1;
                    if let Err(err) = self.store.mark_payout_failed(entry.id, &detail).await {
                        log::error!("payout {} failure not recorded, lease held: {:?}", entry.id, err);
                    }
                }
            }
        }
        Ok(report)
    }

    async fn execute(&self, entry: &PayoutEntry) -> Result<String, Error> {
        log::info!("sending {} to {}", entry.amount, entry.wallet);
        match tokio::time::timeout(self.timeout, self.rail.transfer(&entry.wallet, entry.amount))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(Error::PayoutExecutionFailed(format!(
                "transfer not confirmed within {}s, verify on-chain before requeue",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Queues a fresh pending copy of a failed entry. The failed entry stays
/// as it is.
pub async fn requeue(store: &dyn Store, id: i64, now: i64) -> Result<i64, Error> {
    let entry = store
        .get_payout(id)
        .await?
        .ok_or(Error::PayoutNotFound(id))?;
    if entry.status != PayoutStatus::Failed {
        return Err(Error::Internal(format!(
            "payout {} is {:?}, only failed payouts can be requeued",
            id, entry.status
        )));
    }
    let new_id = store
        .enqueue_payout(&entry.wallet, entry.amount, entry.kind, now)
        .await?;
    log::info!("requeued failed payout {} as {}", id, new_id);
    Ok(new_id)
}

/// Fails every pending entry whose lease is at least `max_age` seconds old,
/// so an operator can check the chain and `requeue` it.
pub async fn expire_leases(store: &dyn Store, max_age: i64, now: i64) -> Result<Vec<i64>, Error> {
    if max_age < 0 {
        return Err(Error::Internal(format!(
            "lease age must not be negative, got {}",
            max_age
        )));
    }
    let expired = store
        .fail_abandoned_payouts(now.saturating_sub(max_age), LEASE_ABANDONED)
        .await?;
    for id in expired.iter() {
        log::warn!("payout {} lease abandoned, marked failed", id);
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::memory::MemoryStore;
    use types::PayoutKind;

    /// Rejects transfers to `rejected`, stalls on `stalled`, and records calls.
    #[derive(Default)]
    struct ScriptedRail {
        rejected: HashSet<Pubkey>,
        stalled: HashSet<Pubkey>,
        calls: std::sync::Mutex<Vec<Pubkey>>,
    }

    #[async_trait]
    impl PaymentRail for ScriptedRail {
        async fn transfer(&self, to: &Pubkey, amount: u64) -> Result<String, Error> {
            self.calls.lock().unwrap().push(*to);
            if self.stalled.contains(to) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.rejected.contains(to) {
                return Err(Error::PayoutExecutionFailed("rail rejected".to_string()));
            }
            Ok(format!("sig-{}-{}", to, amount))
        }
    }

    fn executor(store: &Arc<MemoryStore>, rail: &Arc<ScriptedRail>) -> PayoutExecutor {
        PayoutExecutor::new(store.clone(), rail.clone()).with_timeout(Duration::from_millis(50))
    }

    fn assert_terminal_shape(entry: &PayoutEntry) {
        match entry.status {
            PayoutStatus::Pending => {}
            PayoutStatus::Sent => {
                assert!(entry.signature.is_some() && entry.sent_at.is_some());
                assert!(entry.error.is_none());
            }
            PayoutStatus::Failed => {
                assert!(entry.error.is_some());
                assert!(entry.signature.is_none() && entry.sent_at.is_none());
            }
        }
    }

    #[tokio::test]
    async fn failure_is_recorded_and_batch_continues() {
        let store = Arc::new(MemoryStore::new());
        let bad = Pubkey::new_unique();
        let rail = Arc::new(ScriptedRail {
            rejected: HashSet::from([bad]),
            ..Default::default()
        });
        let e = store
            .enqueue_payout(&bad, 10, PayoutKind::Achievement, 0)
            .await
            .unwrap();
        let mut good = Vec::new();
        for i in 1..=11 {
            let wallet = Pubkey::new_unique();
            store
                .enqueue_payout(&wallet, 25, PayoutKind::Monthly, i)
                .await
                .unwrap();
            good.push(wallet);
        }
        let executor = executor(&store, &rail);

        let report = executor.drain(100).await.unwrap();
        assert_eq!(report, DrainReport { sent: 9, failed: 1 });
        let failed = store.get_payout(e).await.unwrap().unwrap();
        assert_eq!(failed.status, PayoutStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("payout execution failed: rail rejected"));

        let report = executor.drain(200).await.unwrap();
        assert_eq!(report, DrainReport { sent: 2, failed: 0 });
        let calls = rail.calls.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|w| **w == bad).count(), 1);
        assert_eq!(calls.len(), 12);
        assert_eq!(calls[0], bad);
        assert_eq!(&calls[1..], &good[..]);

        for entry in store.payouts().await.iter() {
            assert_terminal_shape(entry);
            assert!(entry.status.is_terminal());
        }
        assert!(!store.mark_payout_sent(e, "late", 300).await.unwrap());
        assert_eq!(executor.drain(300).await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn unconfirmed_transfer_fails_instead_of_waiting() {
        let store = Arc::new(MemoryStore::new());
        let slow = Pubkey::new_unique();
        let rail = Arc::new(ScriptedRail {
            stalled: HashSet::from([slow]),
            ..Default::default()
        });
        let id = store
            .enqueue_payout(&slow, 65, PayoutKind::Achievement, 0)
            .await
            .unwrap();
        let report = executor(&store, &rail).drain(1).await.unwrap();
        assert_eq!(report.failed, 1);
        let entry = store.get_payout(id).await.unwrap().unwrap();
        assert_eq!(entry.status, PayoutStatus::Failed);
        assert!(entry.error.unwrap().contains("not confirmed"));
    }

    #[tokio::test]
    async fn requeue_copies_failed_entries_only() {
        let store = Arc::new(MemoryStore::new());
        let bad = Pubkey::new_unique();
        let rail = Arc::new(ScriptedRail {
            rejected: HashSet::from([bad]),
            ..Default::default()
        });
        let executor = executor(&store, &rail);
        let id = store
            .enqueue_payout(&bad, 200, PayoutKind::Achievement, 0)
            .await
            .unwrap();
        assert!(requeue(store.as_ref(), id, 1).await.is_err());
        executor.drain(1).await.unwrap();

        let copy = requeue(store.as_ref(), id, 2).await.unwrap();
        assert_ne!(copy, id);
        let original = store.get_payout(id).await.unwrap().unwrap();
        assert_eq!(original.status, PayoutStatus::Failed);
        let copy = store.get_payout(copy).await.unwrap().unwrap();
        assert_eq!(copy.status, PayoutStatus::Pending);
        assert_eq!((copy.wallet, copy.amount, copy.kind), (bad, 200, PayoutKind::Achievement));
        assert!(matches!(
            requeue(store.as_ref(), 999, 3).await,
            Err(Error::PayoutNotFound(999))
        ));
    }

    #[tokio::test]
    async fn abandoned_lease_can_be_failed_and_requeued() {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(ScriptedRail::default());
        let wallet = Pubkey::new_unique();
        let id = store
            .enqueue_payout(&wallet, 50, PayoutKind::Achievement, 0)
            .await
            .unwrap();
        let fresh = store
            .enqueue_payout(&Pubkey::new_unique(), 5, PayoutKind::Monthly, 1)
            .await
            .unwrap();

        // a worker leased the first entry and died before recording it
        let leased = store.claim_pending_payouts(1, 10).await.unwrap();
        assert_eq!(leased[0].id, id);
        let executor = executor(&store, &rail);
        assert_eq!(executor.drain(20).await.unwrap(), DrainReport { sent: 1, failed: 0 });
        assert!(requeue(store.as_ref(), id, 20).await.is_err());

        // too young to expire
        assert!(expire_leases(store.as_ref(), 100, 50).await.unwrap().is_empty());
        assert_eq!(expire_leases(store.as_ref(), 100, 110).await.unwrap(), vec![id]);
        let entry = store.get_payout(id).await.unwrap().unwrap();
        assert_eq!(entry.status, PayoutStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some(LEASE_ABANDONED));
        assert_terminal_shape(&entry);
        assert_eq!(
            store.get_payout(fresh).await.unwrap().unwrap().status,
            PayoutStatus::Sent
        );
        assert!(expire_leases(store.as_ref(), 100, 500).await.unwrap().is_empty());
        assert!(expire_leases(store.as_ref(), -1, 500).await.is_err());

        let copy = requeue(store.as_ref(), id, 120).await.unwrap();
        assert_eq!(executor.drain(130).await.unwrap(), DrainReport { sent: 1, failed: 0 });
        assert_eq!(
            store.get_payout(copy).await.unwrap().unwrap().status,
            PayoutStatus::Sent
        );
        let calls = rail.calls.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|w| **w == wallet).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_workers_pay_each_entry_once() {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(ScriptedRail::default());
        for i in 0..30 {
            store
                .enqueue_payout(&Pubkey::new_unique(), 10, PayoutKind::Achievement, i)
                .await
                .unwrap();
        }
        // separate executors stand in for separate worker processes
        let workers: Vec<Arc<PayoutExecutor>> =
            (0..3).map(|_| Arc::new(executor(&store, &rail))).collect();
        let mut handles = Vec::new();
        for worker in workers.iter() {
            let worker = worker.clone();
            handles.push(tokio::spawn(async move { worker.drain(5).await }));
        }
        let mut sent = 0;
        for handle in handles {
            sent += handle.await.unwrap().unwrap().sent;
        }
        assert_eq!(sent, 30);
        let calls = rail.calls.lock().unwrap().clone();
        let unique: HashSet<Pubkey> = calls.iter().copied().collect();
        assert_eq!(calls.len(), unique.len());
        assert_eq!(unique.len(), 30);
    }
}
