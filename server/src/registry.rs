use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use types::{Branch, MemberStatusResponse, RegistrationStatus};

use crate::{
    consts::MEMBERSHIP_PERIOD,
    error::Error,
    placement::{self, Placement},
    rewards::Rewards,
    store::Store,
};

/// Result of the reward pass that follows a committed placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewardOutcome {
    /// Number of tiers awarded along the upline.
    Awarded(usize),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub placement: Placement,
    pub rewards: RewardOutcome,
}

/// Membership entrypoints: registration, renewal and status.
pub struct Registry {
    store: Arc<dyn Store>,
    rewards: Arc<Rewards>,

    // Sponsor used when no referrer is given.
    root: Pubkey,
    referral_base_url: String,
}

impl Registry {
    pub fn new(
        store: Arc<dyn Store>,
        rewards: Arc<Rewards>,
        root: Pubkey,
        referral_base_url: String,
    ) -> Self {
        Registry {
            store,
            rewards,
            root,
            referral_base_url,
        }
    }

    /// Registers `wallet` under `referrer`, or under the root if none.
    ///
    /// The placement either commits in full or fails with nothing written.
    /// Once it has committed the registration stands: a failing reward pass
    /// is reported in the result and never undoes it.
    pub async fn register_member(
        &self,
        wallet: &Pubkey,
        referrer: Option<&Pubkey>,
        branch: Branch,
        now: i64,
    ) -> Result<Registration, Error> {
        let requested = referrer.unwrap_or(&self.root);
        let placement =
            placement::place(self.store.as_ref(), wallet, requested, branch, now).await?;
        log::info!(
            "registered {} under {} at {}",
            wallet,
            placement.sponsor,
            placement.branch
        );
        let rewards = match self
            .rewards
            .calculate_and_award(&placement.sponsor, now)
            .await
        {
            Ok(awards) => RewardOutcome::Awarded(awards.len()),
            Err(err) => {
                log::error!("reward calculation after registering {}: {}", wallet, err);
                RewardOutcome::Failed(err.to_string())
            }
        };
        Ok(Registration { placement, rewards })
    }

    /// Extends membership by one period from `now`, resets rank and
    /// deactivates the member's reward tiers.
    pub async fn renew_member(&self, wallet: &Pubkey, now: i64) -> Result<i64, Error> {
        let expiry_at = now.saturating_add(MEMBERSHIP_PERIOD);
        if !self.store.renew_member(wallet, expiry_at).await? {
            log::warn!("cannot renew unknown member {}", wallet);
            return Err(Error::MemberNotFound(wallet.to_string()));
        }
        log::info!("renewed {} until {}", wallet, expiry_at);
        if let Err(err) = self.rewards.reset_member_rewards(wallet).await {
            log::error!("failed to reset rewards of renewed {}: {:?}", wallet, err);
        }
        Ok(expiry_at)
    }

    pub async fn member_status(
        &self,
        wallet: &Pubkey,
        now: i64,
    ) -> Result<MemberStatusResponse, Error> {
        let wallet_address = wallet.to_string();
        let Some(member) = self.store.get_member(wallet).await? else {
            return Ok(MemberStatusResponse {
                status: RegistrationStatus::NotRegistered,
                wallet_address,
                expiry_at: None,
                current_rank: None,
                referral_link: None,
            });
        };
        let status = if member.is_active_at(now) {
            RegistrationStatus::Active
        } else {
            RegistrationStatus::Expired
        };
        Ok(MemberStatusResponse {
            status,
            referral_link: Some(format!("{}?ref={}", self.referral_base_url, wallet_address)),
            wallet_address,
            expiry_at: Some(member.expiry_at),
            current_rank: Some(member.rank),
        })
    }
}
