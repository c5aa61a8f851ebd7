use std::collections::HashMap;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use types::{AncestorRecord, Member, PayoutEntry, PayoutKind, PayoutStatus, RewardState};

use crate::{
    error::Error,
    store::{Award, CommitOutcome, PlacementCommit, Store},
};

/// In-process store. A single lock covers the whole state, so every
/// operation is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    members: HashMap<Pubkey, Member>,
    ancestors: Vec<AncestorRecord>,
    rewards: HashMap<(Pubkey, u32), RewardState>,
    payouts: Vec<PayoutEntry>,
}

impl State {
    fn push_payout(&mut self, wallet: Pubkey, amount: u64, kind: PayoutKind, now: i64) -> i64 {
        let id = self.payouts.len() as i64 + 1;
        self.payouts.push(PayoutEntry {
            id,
            wallet,
            amount,
            kind,
            status: PayoutStatus::Pending,
            signature: None,
            error: None,
            created_at: now,
            sent_at: None,
            claimed_at: None,
        });
        id
    }

    fn payout_mut(&mut self, id: i64) -> Option<&mut PayoutEntry> {
        self.payouts.iter_mut().find(|entry| entry.id == id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn members(&self) -> Vec<Member> {
        self.state.lock().await.members.values().cloned().collect()
    }

    pub async fn rewards(&self) -> Vec<RewardState> {
        self.state.lock().await.rewards.values().cloned().collect()
    }

    pub async fn payouts(&self) -> Vec<PayoutEntry> {
        self.state.lock().await.payouts.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_member(&self, wallet: &Pubkey) -> Result<Option<Member>, Error> {
        Ok(self.state.lock().await.members.get(wallet).cloned())
    }

    async fn insert_root(&self, member: &Member) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        if state.members.contains_key(&member.wallet) {
            return Ok(false);
        }
        state.members.insert(member.wallet, member.clone());
        Ok(true)
    }

    async fn commit_placement(&self, commit: &PlacementCommit) -> Result<CommitOutcome, Error> {
        let member = &commit.member;
        let (sponsor, branch) = match (member.sponsor, member.branch) {
            (Some(sponsor), Some(branch)) => (sponsor, branch),
            _ => {
                return Err(Error::Internal(
                    "placement commit without sponsor or branch".to_string(),
                ))
            }
        };
        let mut state = self.state.lock().await;
        if state.members.contains_key(&member.wallet) {
            return Ok(CommitOutcome::Duplicate);
        }
        match state.members.get(&sponsor) {
            None => return Err(Error::SponsorNotFound(sponsor.to_string())),
            Some(row) if row.slot(branch).is_some() => return Ok(CommitOutcome::SlotTaken),
            Some(_) => {}
        }
        if let Some(missing) = commit
            .counted
            .iter()
            .find(|wallet| !state.members.contains_key(*wallet))
        {
            return Err(Error::BrokenUpline(missing.to_string()));
        }

        // validated, apply
        if let Some(row) = state.members.get_mut(&sponsor) {
            *row.slot_mut(branch) = Some(member.wallet);
            if commit.spillover {
                row.spill_count += 1;
            }
        }
        for wallet in commit.counted.iter() {
            if let Some(row) = state.members.get_mut(wallet) {
                *row.total_mut(branch) += 1;
                row.total_direct_referrals += 1;
            }
        }
        state.members.insert(member.wallet, member.clone());
        state.ancestors.extend(commit.ancestors.iter().cloned());
        Ok(CommitOutcome::Placed)
    }

    async fn ancestors_of(&self, wallet: &Pubkey) -> Result<Vec<AncestorRecord>, Error> {
        let state = self.state.lock().await;
        let mut records: Vec<AncestorRecord> = state
            .ancestors
            .iter()
            .filter(|record| record.wallet.eq(wallet))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.depth);
        Ok(records)
    }

    async fn renew_member(&self, wallet: &Pubkey, expiry_at: i64) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        match state.members.get_mut(wallet) {
            Some(member) => {
                member.expiry_at = expiry_at;
                member.status = types::MemberStatus::Active;
                member.rank = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reward_exists(&self, wallet: &Pubkey, tier: u32) -> Result<bool, Error> {
        Ok(self
            .state
            .lock()
            .await
            .rewards
            .contains_key(&(*wallet, tier)))
    }

    async fn award_tier(&self, award: &Award) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        if state.rewards.contains_key(&(award.wallet, award.tier)) {
            return Ok(false);
        }
        // tiers only move up while a tier is active
        if state.rewards.values().any(|reward| {
            reward.wallet.eq(&award.wallet) && reward.is_active && reward.tier >= award.tier
        }) {
            return Ok(false);
        }
        for (_, reward) in state
            .rewards
            .iter_mut()
            .filter(|((wallet, _), _)| wallet.eq(&award.wallet))
        {
            reward.is_active = false;
        }
        state.rewards.insert(
            (award.wallet, award.tier),
            RewardState {
                wallet: award.wallet,
                tier: award.tier,
                is_active: true,
                first_qualified_at: award.now,
                last_achievement_at: award.now,
                last_payout_at: award.now,
                payout_count: 1,
            },
        );
        if let Some(member) = state.members.get_mut(&award.wallet) {
            member.rank = award.tier;
        }
        state.push_payout(award.wallet, award.amount, PayoutKind::Achievement, award.now);
        Ok(true)
    }

    async fn deactivate_rewards(&self, wallet: &Pubkey) -> Result<u64, Error> {
        let mut state = self.state.lock().await;
        let mut n = 0;
        for reward in state.rewards.values_mut() {
            if reward.wallet.eq(wallet) && reward.is_active {
                reward.is_active = false;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn active_rewards(&self) -> Result<Vec<RewardState>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .rewards
            .values()
            .filter(|reward| reward.is_active)
            .cloned()
            .collect())
    }

    async fn enqueue_monthly(
        &self,
        previous: &RewardState,
        amount: u64,
        now: i64,
    ) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        match state.rewards.get_mut(&(previous.wallet, previous.tier)) {
            Some(reward)
                if reward.is_active && reward.last_payout_at == previous.last_payout_at =>
            {
                reward.last_payout_at = now;
                reward.payout_count += 1;
            }
            _ => return Ok(false),
        }
        state.push_payout(previous.wallet, amount, PayoutKind::Monthly, now);
        Ok(true)
    }

    async fn claim_pending_payouts(
        &self,
        limit: usize,
        now: i64,
    ) -> Result<Vec<PayoutEntry>, Error> {
        let mut state = self.state.lock().await;
        let mut pending: Vec<&mut PayoutEntry> = state
            .payouts
            .iter_mut()
            .filter(|entry| entry.status == PayoutStatus::Pending && entry.claimed_at.is_none())
            .collect();
        pending.sort_by_key(|entry| (entry.created_at, entry.id));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|entry| {
                entry.claimed_at = Some(now);
                entry.clone()
            })
            .collect())
    }

    async fn mark_payout_sent(&self, id: i64, signature: &str, now: i64) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        match state.payout_mut(id) {
            Some(entry) if entry.status == PayoutStatus::Pending => {
                entry.status = PayoutStatus::Sent;
                entry.signature = Some(signature.to_string());
                entry.sent_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_payout_failed(&self, id: i64, error: &str) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        match state.payout_mut(id) {
            Some(entry) if entry.status == PayoutStatus::Pending => {
                entry.status = PayoutStatus::Failed;
                entry.error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_abandoned_payouts(
        &self,
        claimed_before: i64,
        error: &str,
    ) -> Result<Vec<i64>, Error> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for entry in state.payouts.iter_mut() {
            match entry.claimed_at {
                Some(claimed_at)
                    if entry.status == PayoutStatus::Pending && claimed_at <= claimed_before =>
                {
                    entry.status = PayoutStatus::Failed;
                    entry.error = Some(error.to_string());
                    expired.push(entry.id);
                }
                _ => {}
            }
        }
        Ok(expired)
    }

    async fn get_payout(&self, id: i64) -> Result<Option<PayoutEntry>, Error> {
        let state = self.state.lock().await;
        Ok(state.payouts.iter().find(|entry| entry.id == id).cloned())
    }

    async fn enqueue_payout(
        &self,
        wallet: &Pubkey,
        amount: u64,
        kind: PayoutKind,
        now: i64,
    ) -> Result<i64, Error> {
        let mut state = self.state.lock().await;
        Ok(state.push_payout(*wallet, amount, kind, now))
    }
}
