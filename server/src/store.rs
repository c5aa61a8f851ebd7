use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use types::{AncestorRecord, Member, PayoutEntry, PayoutKind, RewardState};

use crate::error::Error;

/// Everything written by one successful placement.
#[derive(Clone, Debug)]
pub struct PlacementCommit {
    /// The new member, with its resolved sponsor and branch.
    pub member: Member,

    /// Whether the sponsor absorbs this placement as a spillover.
    pub spillover: bool,

    /// Ancestor chain of the new member, depth 1 first.
    pub ancestors: Vec<AncestorRecord>,

    /// Members whose `branch` counter and referral total go up by one.
    pub counted: Vec<Pubkey>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Placed,

    /// The wallet is already in the directory.
    Duplicate,

    /// Another placement filled the slot first.
    SlotTaken,
}

/// A tier award to write atomically.
#[derive(Clone, Copy, Debug)]
pub struct Award {
    pub wallet: Pubkey,
    pub tier: u32,
    pub amount: u64,
    pub now: i64,
}

/// Durable state of the network.
///
/// Implementations must make each method atomic. Conditional methods report
/// whether they applied, and losers are expected to re-read and retry.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_member(&self, wallet: &Pubkey) -> Result<Option<Member>, Error>;

    /// Inserts a member without a sponsor. Returns false if it already exists.
    async fn insert_root(&self, member: &Member) -> Result<bool, Error>;

    /// Inserts the member, claims `sponsor.slot(branch)` only if it is empty,
    /// records ancestry, and bumps counters. All or nothing.
    async fn commit_placement(&self, commit: &PlacementCommit) -> Result<CommitOutcome, Error>;

    async fn ancestors_of(&self, wallet: &Pubkey) -> Result<Vec<AncestorRecord>, Error>;

    /// Sets a new expiry, marks active, and resets rank. Returns false if absent.
    async fn renew_member(&self, wallet: &Pubkey, expiry_at: i64) -> Result<bool, Error>;

    async fn reward_exists(&self, wallet: &Pubkey, tier: u32) -> Result<bool, Error>;

    /// Records a first-time tier qualification and queues its achievement
    /// payout. Returns false, writing nothing, if the tier was already held
    /// or an active tier at or above it exists.
    async fn award_tier(&self, award: &Award) -> Result<bool, Error>;

    async fn deactivate_rewards(&self, wallet: &Pubkey) -> Result<u64, Error>;

    async fn active_rewards(&self) -> Result<Vec<RewardState>, Error>;

    /// Advances `last_payout_at` from `previous` to `now` and queues a monthly
    /// payout. Returns false if the state moved on or is no longer active.
    async fn enqueue_monthly(
        &self,
        state: &RewardState,
        amount: u64,
        now: i64,
    ) -> Result<bool, Error>;

    /// Leases up to `limit` unclaimed pending payouts, oldest first.
    async fn claim_pending_payouts(&self, limit: usize, now: i64)
        -> Result<Vec<PayoutEntry>, Error>;

    /// Pending to sent. Returns false if the entry was not pending.
    async fn mark_payout_sent(&self, id: i64, signature: &str, now: i64) -> Result<bool, Error>;

    /// Pending to failed. Returns false if the entry was not pending.
    async fn mark_payout_failed(&self, id: i64, error: &str) -> Result<bool, Error>;

    /// Moves pending entries leased at or before `claimed_before` to failed
    /// with `error`. Returns the ids moved, in id order.
    async fn fail_abandoned_payouts(
        &self,
        claimed_before: i64,
        error: &str,
    ) -> Result<Vec<i64>, Error>;

    async fn get_payout(&self, id: i64) -> Result<Option<PayoutEntry>, Error>;

    /// Queues a fresh pending payout.
    async fn enqueue_payout(
        &self,
        wallet: &Pubkey,
        amount: u64,
        kind: PayoutKind,
        now: i64,
    ) -> Result<i64, Error>;
}
