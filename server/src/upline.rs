use std::collections::HashSet;

use solana_sdk::pubkey::Pubkey;
use types::{AncestorRecord, Branch};

use crate::{consts::MAX_UPLINE_DEPTH, error::Error, store::Store};

/// Builds the ancestor records of `wallet`, placed at `branch` under
/// `sponsor`, from the sponsor's chain up to the root.
pub async fn record_ancestry(
    store: &dyn Store,
    wallet: &Pubkey,
    sponsor: &Pubkey,
    branch: Branch,
) -> Result<Vec<AncestorRecord>, Error> {
    let chain = walk(store, sponsor).await?;
    Ok(chain
        .into_iter()
        .enumerate()
        .map(|(i, ancestor)| AncestorRecord {
            wallet: *wallet,
            ancestor,
            depth: (i + 1) as u32,
            branch,
        })
        .collect())
}

/// Collects every member whose counters go up when a member is placed under
/// `sponsor`: the sponsor itself and all of its ancestors.
pub async fn propagate_counts(store: &dyn Store, sponsor: &Pubkey) -> Result<Vec<Pubkey>, Error> {
    walk(store, sponsor).await
}

/// Follows sponsor pointers from `start` until a member without a sponsor.
/// Errors on a missing member, a cycle, or an over-long chain.
async fn walk(store: &dyn Store, start: &Pubkey) -> Result<Vec<Pubkey>, Error> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = *start;
    loop {
        if chain.len() >= MAX_UPLINE_DEPTH || !visited.insert(current) {
            log::error!("malformed upline at {} starting from {}", current, start);
            return Err(Error::BrokenUpline(start.to_string()));
        }
        let member = store
            .get_member(&current)
            .await?
            .ok_or_else(|| Error::BrokenUpline(start.to_string()))?;
        chain.push(current);
        match member.sponsor {
            Some(sponsor) => current = sponsor,
            None => return Ok(chain),
        }
    }
}
