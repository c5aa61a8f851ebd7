use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use types::Member;

use crate::{
    consts::{MAX_REWARD_HOPS, MONTHLY_RECURRENCE},
    error::Error,
    store::{Award, Store},
};

/// A reward level and the branch counts that unlock it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tier {
    pub tier: u32,
    pub left: u64,
    pub center: u64,
    pub right: u64,

    /// Whole-token payout for reaching, and for every month of holding, the tier.
    pub value: u64,
}

impl Tier {
    pub const fn uniform(tier: u32, count: u64, value: u64) -> Self {
        Tier {
            tier,
            left: count,
            center: count,
            right: count,
            value,
        }
    }

    fn is_met_by(&self, member: &Member) -> bool {
        member.total_left >= self.left
            && member.total_center >= self.center
            && member.total_right >= self.right
    }
}

const DEFAULT_TIERS: [Tier; 10] = [
    Tier::uniform(1, 1, 10),
    Tier::uniform(2, 5, 25),
    Tier::uniform(3, 15, 65),
    Tier::uniform(4, 50, 200),
    Tier::uniform(5, 150, 500),
    Tier::uniform(6, 450, 1_500),
    Tier::uniform(7, 2_450, 5_000),
    Tier::uniform(8, 10_450, 20_000),
    Tier::uniform(9, 30_450, 50_000),
    Tier::uniform(10, 80_450, 125_000),
];

/// Tiers ordered from lowest to highest.
#[derive(Clone, Debug)]
pub struct TierTable(Vec<Tier>);

impl TierTable {
    /// Accepts tiers whose numbers, thresholds and values all strictly increase.
    pub fn new(tiers: Vec<Tier>) -> Result<Self, Error> {
        if tiers.is_empty() {
            return Err(Error::InvalidTierTable("no tiers".to_string()));
        }
        for pair in tiers.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            let increasing = hi.tier > lo.tier
                && hi.left > lo.left
                && hi.center > lo.center
                && hi.right > lo.right
                && hi.value > lo.value;
            if !increasing {
                return Err(Error::InvalidTierTable(format!(
                    "tier {} does not exceed tier {}",
                    hi.tier, lo.tier
                )));
            }
        }
        Ok(TierTable(tiers))
    }

    /// The highest tier whose thresholds the member meets.
    pub fn qualifying(&self, member: &Member) -> Option<&Tier> {
        self.0.iter().rev().find(|tier| tier.is_met_by(member))
    }

    pub fn get(&self, tier: u32) -> Option<&Tier> {
        self.0.iter().find(|t| t.tier == tier)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        TierTable(DEFAULT_TIERS.to_vec())
    }
}

/// Evaluates uplines against the tier table and queues their rewards.
pub struct Rewards {
    store: Arc<dyn Store>,
    tiers: TierTable,
}

impl Rewards {
    pub fn new(store: Arc<dyn Store>, tiers: TierTable) -> Self {
        Rewards { store, tiers }
    }

    /// Walks at most `MAX_REWARD_HOPS` members starting at `from` and up its
    /// sponsor chain, awarding each member its highest qualifying tier unless
    /// that tier was ever awarded before or the member holds an active tier at
    /// or above it.
    ///
    /// A failure on one member does not stop the walk; the first failure is
    /// returned once the walk is done.
    pub async fn calculate_and_award(&self, from: &Pubkey, now: i64) -> Result<Vec<Award>, Error> {
        let mut awarded = Vec::new();
        let mut failure: Option<Error> = None;
        let mut current = Some(*from);
        for _ in 0..MAX_REWARD_HOPS {
            let Some(wallet) = current else {
                break;
            };
            let member = match self.store.get_member(&wallet).await {
                Ok(Some(member)) => member,
                Ok(None) => {
                    failure.get_or_insert(Error::MemberNotFound(wallet.to_string()));
                    break;
                }
                Err(err) => {
                    failure.get_or_insert(err);
                    break;
                }
            };
            log::debug!(
                "checking upline {} with counts L={} C={} R={}",
                wallet,
                member.total_left,
                member.total_center,
                member.total_right
            );
            match self.evaluate(&member, now).await {
                Ok(Some(award)) => awarded.push(award),
                Ok(None) => {}
                Err(err) => {
                    log::error!("failed to evaluate rewards of {}: {:?}", wallet, err);
                    failure.get_or_insert(err);
                }
            }
            current = member.sponsor;
        }
        match failure {
            Some(err) => Err(Error::RewardCalculationFailed(format!(
                "from {}: {}",
                from, err
            ))),
            None => Ok(awarded),
        }
    }

    async fn evaluate(&self, member: &Member, now: i64) -> Result<Option<Award>, Error> {
        let Some(tier) = self.tiers.qualifying(member) else {
            return Ok(None);
        };
        if self.store.reward_exists(&member.wallet, tier.tier).await? {
            return Ok(None);
        }
        let award = Award {
            wallet: member.wallet,
            tier: tier.tier,
            amount: tier.value,
            now,
        };
        // a concurrent evaluation may have won between the check and the write
        if !self.store.award_tier(&award).await? {
            return Ok(None);
        }
        log::info!(
            "upline {} qualified for tier {}, queued {}",
            member.wallet,
            tier.tier,
            tier.value
        );
        Ok(Some(award))
    }

    /// Deactivates every reward state of a renewed member.
    pub async fn reset_member_rewards(&self, wallet: &Pubkey) -> Result<u64, Error> {
        log::info!("resetting rewards for renewed member {}", wallet);
        self.store.deactivate_rewards(wallet).await
    }

    /// Queues a monthly payout for every active tier whose last payout is at
    /// least `MONTHLY_RECURRENCE` old. Returns the number queued.
    pub async fn find_due_monthly_payouts(&self, now: i64) -> Result<usize, Error> {
        let mut queued = 0;
        for state in self.store.active_rewards().await? {
            let Some(tier) = self.tiers.get(state.tier) else {
                log::warn!("active reward of {} has unknown tier {}", state.wallet, state.tier);
                continue;
            };
            if state.last_payout_at.saturating_add(MONTHLY_RECURRENCE) > now {
                continue;
            }
            if self.store.enqueue_monthly(&state, tier.value, now).await? {
                log::info!("monthly payout due for {} (tier {})", state.wallet, state.tier);
                queued += 1;
            }
        }
        Ok(queued)
    }
}
