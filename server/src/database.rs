use std::str::FromStr;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use solana_sdk::pubkey::Pubkey;
use tokio_postgres::{NoTls, Row};
use types::{AncestorRecord, Branch, Member, PayoutEntry, PayoutKind, RewardState};

use crate::{
    config,
    error::Error,
    store::{Award, CommitOutcome, PlacementCommit, Store},
};

const SCHEMA: &str = include_str!("../schema.sql");

const MEMBER_COLUMNS: &str = "wallet, sponsor, branch, left_wallet, center_wallet, right_wallet,
    total_left, total_center, total_right, total_direct_referrals, spill_count,
    activated_at, expiry_at, status, rank";

const REWARD_COLUMNS: &str = "wallet, tier, is_active, first_qualified_at, last_achievement_at,
    last_payout_at, payout_count";

const PAYOUT_COLUMNS: &str =
    "id, wallet, amount, kind, status, signature, error, created_at, sent_at, claimed_at";

pub fn create_pool() -> Result<Pool, Error> {
    let mut cfg = deadpool_postgres::Config::new();
    cfg.url = Some(config::db_url()?);
    cfg.create_pool(None, NoTls).map_err(From::from)
}

fn slot_column(branch: Branch) -> &'static str {
    match branch {
        Branch::Left => "left_wallet",
        Branch::Center => "center_wallet",
        Branch::Right => "right_wallet",
    }
}

fn total_column(branch: Branch) -> &'static str {
    match branch {
        Branch::Left => "total_left",
        Branch::Center => "total_center",
        Branch::Right => "total_right",
    }
}

fn pubkey(value: String) -> Result<Pubkey, Error> {
    Pubkey::from_str(value.as_str()).map_err(From::from)
}

fn opt_pubkey(value: Option<String>) -> Result<Option<Pubkey>, Error> {
    value.map(pubkey).transpose()
}

fn read_member(row: &Row) -> Result<Member, Error> {
    Ok(Member {
        wallet: pubkey(row.try_get("wallet")?)?,
        sponsor: opt_pubkey(row.try_get("sponsor")?)?,
        branch: row.try_get("branch")?,
        left: opt_pubkey(row.try_get("left_wallet")?)?,
        center: opt_pubkey(row.try_get("center_wallet")?)?,
        right: opt_pubkey(row.try_get("right_wallet")?)?,
        total_left: row.try_get::<_, i64>("total_left")? as u64,
        total_center: row.try_get::<_, i64>("total_center")? as u64,
        total_right: row.try_get::<_, i64>("total_right")? as u64,
        total_direct_referrals: row.try_get::<_, i64>("total_direct_referrals")? as u64,
        spill_count: row.try_get::<_, i64>("spill_count")? as u64,
        activated_at: row.try_get("activated_at")?,
        expiry_at: row.try_get("expiry_at")?,
        status: row.try_get("status")?,
        rank: row.try_get::<_, i32>("rank")? as u32,
    })
}

fn read_reward(row: &Row) -> Result<RewardState, Error> {
    Ok(RewardState {
        wallet: pubkey(row.try_get("wallet")?)?,
        tier: row.try_get::<_, i32>("tier")? as u32,
        is_active: row.try_get("is_active")?,
        first_qualified_at: row.try_get("first_qualified_at")?,
        last_achievement_at: row.try_get("last_achievement_at")?,
        last_payout_at: row.try_get("last_payout_at")?,
        payout_count: row.try_get::<_, i32>("payout_count")? as u32,
    })
}

fn read_payout(row: &Row) -> Result<PayoutEntry, Error> {
    Ok(PayoutEntry {
        id: row.try_get("id")?,
        wallet: pubkey(row.try_get("wallet")?)?,
        amount: row.try_get::<_, i64>("amount")? as u64,
        kind: row.try_get("kind")?,
        status: row.try_get("status")?,
        signature: row.try_get("signature")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
        claimed_at: row.try_get("claimed_at")?,
    })
}

/// Postgres-backed store. Every multi-row write runs in one transaction.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        PgStore { pool }
    }

    /// Creates the enum types and tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), Error> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        log::info!("database schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_member(&self, wallet: &Pubkey) -> Result<Option<Member>, Error> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM members WHERE wallet = $1", MEMBER_COLUMNS),
                &[&wallet.to_string()],
            )
            .await?;
        row.as_ref().map(read_member).transpose()
    }

    async fn insert_root(&self, member: &Member) -> Result<bool, Error> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute(
                "INSERT INTO members (wallet, activated_at, expiry_at, status)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (wallet) DO NOTHING",
                &[
                    &member.wallet.to_string(),
                    &member.activated_at,
                    &member.expiry_at,
                    &member.status,
                ],
            )
            .await?;
        Ok(n == 1)
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
        let wallet = member.wallet.to_string();
        let sponsor = sponsor.to_string();
        let mut counted: Vec<String> = commit.counted.iter().map(|w| w.to_string()).collect();
        if !counted.contains(&sponsor) {
            counted.push(sponsor.clone());
        }
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        // lock the whole upline in one order so concurrent placements cannot deadlock
        let locked = tx
            .query(
                "SELECT wallet FROM members WHERE wallet = ANY($1) ORDER BY wallet FOR UPDATE",
                &[&counted],
            )
            .await?;
        if locked.len() != counted.len() {
            let found: Vec<String> = locked
                .iter()
                .map(|row| row.try_get(0))
                .collect::<Result<_, _>>()?;
            if !found.contains(&sponsor) {
                return Err(Error::SponsorNotFound(sponsor));
            }
            let missing = counted
                .iter()
                .find(|w| !found.contains(w))
                .cloned()
                .unwrap_or_default();
            return Err(Error::BrokenUpline(missing));
        }

        let inserted = tx
            .execute(
                "INSERT INTO members (wallet, sponsor, branch, activated_at, expiry_at, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (wallet) DO NOTHING",
                &[
                    &wallet,
                    &sponsor,
                    &branch,
                    &member.activated_at,
                    &member.expiry_at,
                    &member.status,
                ],
            )
            .await?;
        if inserted == 0 {
            return Ok(CommitOutcome::Duplicate);
        }

        let spill: i64 = if commit.spillover { 1 } else { 0 };
        let claimed = tx
            .execute(
                &format!(
                    "UPDATE members SET {slot} = $1, spill_count = spill_count + $3
                    WHERE wallet = $2 AND {slot} IS NULL",
                    slot = slot_column(branch)
                ),
                &[&wallet, &sponsor, &spill],
            )
            .await?;
        if claimed == 0 {
            return Ok(CommitOutcome::SlotTaken);
        }

        let insert_ancestor = tx
            .prepare(
                "INSERT INTO ancestors (wallet, ancestor, depth, branch) VALUES ($1, $2, $3, $4)",
            )
            .await?;
        for record in commit.ancestors.iter() {
            tx.execute(
                &insert_ancestor,
                &[
                    &record.wallet.to_string(),
                    &record.ancestor.to_string(),
                    &(record.depth as i32),
                    &record.branch,
                ],
            )
            .await?;
        }

        let counted: Vec<String> = commit.counted.iter().map(|w| w.to_string()).collect();
        tx.execute(
            &format!(
                "UPDATE members SET {total} = {total} + 1,
                total_direct_referrals = total_direct_referrals + 1
                WHERE wallet = ANY($1)",
                total = total_column(branch)
            ),
            &[&counted],
        )
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Placed)
    }

    async fn ancestors_of(&self, wallet: &Pubkey) -> Result<Vec<AncestorRecord>, Error> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT wallet, ancestor, depth, branch FROM ancestors
                WHERE wallet = $1 ORDER BY depth",
                &[&wallet.to_string()],
            )
            .await?;
        rows.iter()
            .map(|row| -> Result<AncestorRecord, Error> {
                Ok(AncestorRecord {
                    wallet: pubkey(row.try_get("wallet")?)?,
                    ancestor: pubkey(row.try_get("ancestor")?)?,
                    depth: row.try_get::<_, i32>("depth")? as u32,
                    branch: row.try_get("branch")?,
                })
            })
            .collect()
    }

    async fn renew_member(&self, wallet: &Pubkey, expiry_at: i64) -> Result<bool, Error> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute(
                "UPDATE members SET expiry_at = $2, status = 'active', rank = 0 WHERE wallet = $1",
                &[&wallet.to_string(), &expiry_at],
            )
            .await?;
        Ok(n == 1)
    }

    async fn reward_exists(&self, wallet: &Pubkey, tier: u32) -> Result<bool, Error> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM reward_states WHERE wallet = $1 AND tier = $2",
                &[&wallet.to_string(), &(tier as i32)],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn award_tier(&self, award: &Award) -> Result<bool, Error> {
        let wallet = award.wallet.to_string();
        let tier = award.tier as i32;
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        // serialize awards for one wallet
        if tx
            .query_opt(
                "SELECT 1 FROM members WHERE wallet = $1 FOR UPDATE",
                &[&wallet],
            )
            .await?
            .is_none()
        {
            return Err(Error::MemberNotFound(wallet.clone()));
        }
        let outranked = tx
            .query_opt(
                "SELECT 1 FROM reward_states WHERE wallet = $1 AND is_active AND tier >= $2",
                &[&wallet, &tier],
            )
            .await?;
        if outranked.is_some() {
            return Ok(false);
        }
        let inserted = tx
            .execute(
                "INSERT INTO reward_states
                (wallet, tier, is_active, first_qualified_at, last_achievement_at, last_payout_at, payout_count)
                VALUES ($1, $2, TRUE, $3, $3, $3, 1)
                ON CONFLICT (wallet, tier) DO NOTHING",
                &[&wallet, &tier, &award.now],
            )
            .await?;
        if inserted == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE reward_states SET is_active = FALSE WHERE wallet = $1 AND tier <> $2",
            &[&wallet, &tier],
        )
        .await?;
        tx.execute(
            "UPDATE members SET rank = $2 WHERE wallet = $1",
            &[&wallet, &tier],
        )
        .await?;
        tx.execute(
            "INSERT INTO payouts (wallet, amount, kind, created_at) VALUES ($1, $2, $3, $4)",
            &[
                &wallet,
                &(award.amount as i64),
                &PayoutKind::Achievement,
                &award.now,
            ],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn deactivate_rewards(&self, wallet: &Pubkey) -> Result<u64, Error> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute(
                "UPDATE reward_states SET is_active = FALSE WHERE wallet = $1 AND is_active",
                &[&wallet.to_string()],
            )
            .await?;
        Ok(n)
    }

    async fn active_rewards(&self) -> Result<Vec<RewardState>, Error> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM reward_states WHERE is_active ORDER BY last_payout_at",
                    REWARD_COLUMNS
                ),
                &[],
            )
            .await?;
        rows.iter().map(read_reward).collect()
    }

    async fn enqueue_monthly(
        &self,
        previous: &RewardState,
        amount: u64,
        now: i64,
    ) -> Result<bool, Error> {
        let wallet = previous.wallet.to_string();
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        let advanced = tx
            .execute(
                "UPDATE reward_states SET last_payout_at = $3, payout_count = payout_count + 1
                WHERE wallet = $1 AND tier = $2 AND is_active AND last_payout_at = $4",
                &[
                    &wallet,
                    &(previous.tier as i32),
                    &now,
                    &previous.last_payout_at,
                ],
            )
            .await?;
        if advanced == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO payouts (wallet, amount, kind, created_at) VALUES ($1, $2, $3, $4)",
            &[&wallet, &(amount as i64), &PayoutKind::Monthly, &now],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn claim_pending_payouts(
        &self,
        limit: usize,
        now: i64,
    ) -> Result<Vec<PayoutEntry>, Error> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "UPDATE payouts SET claimed_at = $2
                    WHERE id IN (
                        SELECT id FROM payouts
                        WHERE status = 'pending' AND claimed_at IS NULL
                        ORDER BY created_at, id
                        LIMIT $1
                        FOR UPDATE SKIP LOCKED
                    )
                    RETURNING {}",
                    PAYOUT_COLUMNS
                ),
                &[&(limit as i64), &now],
            )
            .await?;
        let mut entries = rows
            .iter()
            .map(read_payout)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        Ok(entries)
    }

    async fn mark_payout_sent(&self, id: i64, signature: &str, now: i64) -> Result<bool, Error> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute(
                "UPDATE payouts SET status = 'sent', signature = $2, sent_at = $3
                WHERE id = $1 AND status = 'pending'",
                &[&id, &signature, &now],
            )
            .await?;
        Ok(n == 1)
    }

    async fn mark_payout_failed(&self, id: i64, error: &str) -> Result<bool, Error> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute(
                "UPDATE payouts SET status = 'failed', error = $2
                WHERE id = $1 AND status = 'pending'",
                &[&id, &error],
            )
            .await?;
        Ok(n == 1)
    }

    async fn fail_abandoned_payouts(
        &self,
        claimed_before: i64,
        error: &str,
    ) -> Result<Vec<i64>, Error> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "UPDATE payouts SET status = 'failed', error = $2
                WHERE status = 'pending' AND claimed_at IS NOT NULL AND claimed_at <= $1
                RETURNING id",
                &[&claimed_before, &error],
            )
            .await?;
        let mut ids = rows
            .iter()
            .map(|row| row.try_get(0))
            .collect::<Result<Vec<i64>, _>>()?;
        ids.sort();
        Ok(ids)
    }

    async fn get_payout(&self, id: i64) -> Result<Option<PayoutEntry>, Error> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM payouts WHERE id = $1", PAYOUT_COLUMNS),
                &[&id],
            )
            .await?;
        row.as_ref().map(read_payout).transpose()
    }

    async fn enqueue_payout(
        &self,
        wallet: &Pubkey,
        amount: u64,
        kind: PayoutKind,
        now: i64,
    ) -> Result<i64, Error> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO payouts (wallet, amount, kind, created_at)
                VALUES ($1, $2, $3, $4)
                RETURNING id",
                &[&wallet.to_string(), &(amount as i64), &kind, &now],
            )
            .await?;
        row.try_get(0).map_err(From::from)
    }
}
