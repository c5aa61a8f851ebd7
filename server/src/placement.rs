use std::collections::{HashSet, VecDeque};

use solana_sdk::pubkey::Pubkey;
use types::{Branch, Member};

use crate::{
    consts::{MAX_PLACEMENT_ATTEMPTS, MAX_SEARCH_NODES, MEMBERSHIP_PERIOD},
    error::Error,
    store::{CommitOutcome, PlacementCommit, Store},
    upline,
};

/// Where a new member ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub sponsor: Pubkey,
    pub branch: Branch,

    /// True when the member was placed below the requested sponsor.
    pub spillover: bool,
}

/// Places `wallet` at `branch` under `requested_sponsor`, spilling down the
/// branch when the slot is taken, and commits the member together with its
/// ancestry and the upline counter increments.
///
/// A placement that loses its slot to a concurrent registration searches
/// again from the requested sponsor.
pub async fn place(
    store: &dyn Store,
    wallet: &Pubkey,
    requested_sponsor: &Pubkey,
    branch: Branch,
    now: i64,
) -> Result<Placement, Error> {
    if store.get_member(wallet).await?.is_some() {
        log::warn!("member {} already exists", wallet);
        return Err(Error::DuplicateMember(wallet.to_string()));
    }
    for attempt in 1..=MAX_PLACEMENT_ATTEMPTS {
        let placement = locate(store, wallet, requested_sponsor, branch).await?;
        let ancestors =
            upline::record_ancestry(store, wallet, &placement.sponsor, placement.branch).await?;
        let counted = upline::propagate_counts(store, &placement.sponsor).await?;
        let commit = PlacementCommit {
            member: Member::new(
                *wallet,
                Some(placement.sponsor),
                Some(placement.branch),
                now,
                now.saturating_add(MEMBERSHIP_PERIOD),
            ),
            spillover: placement.spillover,
            ancestors,
            counted,
        };
        match store.commit_placement(&commit).await? {
            CommitOutcome::Placed => {
                if placement.spillover {
                    log::info!(
                        "spillover: placed {} under {} at {}",
                        wallet,
                        placement.sponsor,
                        placement.branch
                    );
                }
                return Ok(placement);
            }
            CommitOutcome::Duplicate => {
                return Err(Error::DuplicateMember(wallet.to_string()));
            }
            CommitOutcome::SlotTaken => {
                log::warn!(
                    "slot {} under {} taken concurrently, retrying {} ({}/{})",
                    placement.branch,
                    placement.sponsor,
                    wallet,
                    attempt,
                    MAX_PLACEMENT_ATTEMPTS
                );
            }
        }
    }
    log::error!("placement of {} kept losing slot races", wallet);
    Err(Error::PlacementExhausted(wallet.to_string()))
}

/// Finds the open slot for a new member without writing anything.
///
/// The requested sponsor's own slot wins if empty. Otherwise the search walks
/// breadth-first through the occupants of `branch`, and the first node that
/// has an empty slot and has not yet absorbed a spillover is chosen. If every
/// open node already absorbed one, the first of them is used anyway and the
/// degradation is logged. An occupied slot is never chosen.
pub async fn locate(
    store: &dyn Store,
    wallet: &Pubkey,
    requested_sponsor: &Pubkey,
    branch: Branch,
) -> Result<Placement, Error> {
    let start = store
        .get_member(requested_sponsor)
        .await?
        .ok_or_else(|| Error::SponsorNotFound(requested_sponsor.to_string()))?;
    if start.slot(branch).is_none() {
        return Ok(Placement {
            sponsor: start.wallet,
            branch,
            spillover: false,
        });
    }

    let mut visited = HashSet::from([start.wallet]);
    let mut queue = VecDeque::from([start]);
    let mut fallback: Option<Pubkey> = None;
    while let Some(node) = queue.pop_front() {
        match node.slot(branch) {
            None if node.spill_count == 0 => {
                return Ok(Placement {
                    sponsor: node.wallet,
                    branch,
                    spillover: true,
                });
            }
            None => {
                fallback.get_or_insert(node.wallet);
            }
            Some(next) => {
                if visited.len() >= MAX_SEARCH_NODES {
                    log::error!("spillover search for {} hit the node limit", wallet);
                    break;
                }
                if !visited.insert(next) {
                    continue;
                }
                match store.get_member(&next).await? {
                    Some(child) => queue.push_back(child),
                    None => log::error!("slot occupant {} of {} is missing", next, node.wallet),
                }
            }
        }
    }

    match fallback {
        Some(sponsor) => {
            log::warn!(
                "placement exhausted for {} under {} at {}, degrading to {}",
                wallet,
                requested_sponsor,
                branch,
                sponsor
            );
            Ok(Placement {
                sponsor,
                branch,
                spillover: true,
            })
        }
        None => {
            log::error!(
                "placement exhausted for {} under {} at {}, no open slot",
                wallet,
                requested_sponsor,
                branch
            );
            Err(Error::PlacementExhausted(wallet.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::*;
    use crate::memory::MemoryStore;

    async fn seeded() -> (MemoryStore, Pubkey) {
        let store = MemoryStore::new();
        let root = Pubkey::new_unique();
        store
            .insert_root(&Member::new(root, None, None, 0, MEMBERSHIP_PERIOD))
            .await
            .unwrap();
        (store, root)
    }

    async fn member(store: &MemoryStore, wallet: &Pubkey) -> Member {
        store.get_member(wallet).await.unwrap().unwrap()
    }

    /// Every branch counter equals the number of descendants recorded under
    /// that branch, and every slot holds the member that was placed there.
    async fn assert_consistent(store: &MemoryStore) {
        let members = store.members().await;
        let mut expected: HashMap<(Pubkey, Branch), u64> = HashMap::new();
        let mut descendants: HashMap<Pubkey, u64> = HashMap::new();
        for m in members.iter() {
            for record in store.ancestors_of(&m.wallet).await.unwrap() {
                *expected.entry((record.ancestor, record.branch)).or_default() += 1;
                *descendants.entry(record.ancestor).or_default() += 1;
            }
        }
        let mut occupied: HashMap<(Pubkey, Branch), Pubkey> = HashMap::new();
        for m in members.iter() {
            for branch in Branch::ALL {
                assert_eq!(
                    m.total(branch),
                    expected.get(&(m.wallet, branch)).copied().unwrap_or(0),
                    "{} {}",
                    m.wallet,
                    branch
                );
            }
            assert_eq!(
                m.total_direct_referrals,
                descendants.get(&m.wallet).copied().unwrap_or(0)
            );
            if let (Some(sponsor), Some(branch)) = (m.sponsor, m.branch) {
                assert!(
                    occupied.insert((sponsor, branch), m.wallet).is_none(),
                    "two members in slot {} of {}",
                    branch,
                    sponsor
                );
                assert_eq!(member(store, &sponsor).await.slot(branch), Some(m.wallet));
            }
        }
    }

    #[tokio::test]
    async fn direct_then_spillover() {
        let (store, root) = seeded().await;
        let a = Pubkey::new_unique();
        let placed = place(&store, &a, &root, Branch::Left, 1).await.unwrap();
        assert_eq!(
            placed,
            Placement {
                sponsor: root,
                branch: Branch::Left,
                spillover: false
            }
        );
        assert_eq!(member(&store, &a).await.sponsor, Some(root));
        assert_eq!(member(&store, &root).await.total_left, 1);

        let b = Pubkey::new_unique();
        let placed = place(&store, &b, &root, Branch::Left, 2).await.unwrap();
        assert_eq!(placed.sponsor, a);
        assert!(placed.spillover);
        let a_row = member(&store, &a).await;
        assert_eq!(a_row.left, Some(b));
        assert_eq!(a_row.spill_count, 1);
        assert_eq!(a_row.total_left, 1);
        let root_row = member(&store, &root).await;
        assert_eq!(root_row.total_left, 2);
        assert_eq!(root_row.spill_count, 0);
        assert_consistent(&store).await;
    }

    #[tokio::test]
    async fn spillover_follows_the_branch_leg() {
        let (store, root) = seeded().await;
        let wallets: Vec<Pubkey> = (0..3).map(|_| Pubkey::new_unique()).collect();
        for w in wallets.iter() {
            place(&store, w, &root, Branch::Right, 1).await.unwrap();
        }
        // root -> w0 -> w1 -> w2, each spill lands at the end of the leg
        assert_eq!(member(&store, &wallets[2]).await.sponsor, Some(wallets[1]));
        assert_eq!(member(&store, &wallets[1]).await.spill_count, 1);
        assert_eq!(member(&store, &root).await.total_right, 3);
        assert_consistent(&store).await;
    }

    #[tokio::test]
    async fn new_member_inherits_expiry_and_ancestry() {
        let (store, root) = seeded().await;
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        place(&store, &a, &root, Branch::Center, 10).await.unwrap();
        place(&store, &b, &a, Branch::Right, 20).await.unwrap();
        let b_row = member(&store, &b).await;
        assert_eq!(b_row.activated_at, 20);
        assert_eq!(b_row.expiry_at, 20 + MEMBERSHIP_PERIOD);
        let records = store.ancestors_of(&b).await.unwrap();
        assert_eq!(
            records.iter().map(|r| (r.ancestor, r.depth)).collect::<Vec<_>>(),
            vec![(a, 1), (root, 2)]
        );
        assert!(records.iter().all(|r| r.branch == Branch::Right));
        let root_row = member(&store, &root).await;
        assert_eq!(root_row.total_center, 1);
        assert_eq!(root_row.total_right, 1);
        assert_eq!(root_row.total_direct_referrals, 2);
    }

    #[tokio::test]
    async fn rejects_duplicates_and_unknown_sponsors() {
        let (store, root) = seeded().await;
        let a = Pubkey::new_unique();
        place(&store, &a, &root, Branch::Left, 1).await.unwrap();
        assert!(matches!(
            place(&store, &a, &root, Branch::Right, 2).await,
            Err(Error::DuplicateMember(_))
        ));
        assert!(matches!(
            place(&store, &root, &a, Branch::Right, 2).await,
            Err(Error::DuplicateMember(_))
        ));
        let stranger = Pubkey::new_unique();
        assert!(matches!(
            place(&store, &Pubkey::new_unique(), &stranger, Branch::Left, 2).await,
            Err(Error::SponsorNotFound(_))
        ));
        assert_eq!(store.members().await.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_search_degrades_without_overwriting() {
        let store = MemoryStore::new();
        let root = Pubkey::new_unique();
        let end = Pubkey::new_unique();
        let mut root_row = Member::new(root, None, None, 0, 100);
        root_row.left = Some(end);
        let mut end_row = Member::new(end, Some(root), Some(Branch::Left), 0, 100);
        end_row.spill_count = 1;
        store.insert_root(&root_row).await.unwrap();
        store.insert_root(&end_row).await.unwrap();

        let new = Pubkey::new_unique();
        let placed = locate(&store, &new, &root, Branch::Left).await.unwrap();
        assert_eq!(placed.sponsor, end);
        assert!(placed.spillover);
    }

    #[tokio::test]
    async fn cyclic_slots_end_in_placement_exhausted() {
        let store = MemoryStore::new();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let mut a_row = Member::new(a, None, None, 0, 100);
        a_row.center = Some(b);
        let mut b_row = Member::new(b, Some(a), Some(Branch::Center), 0, 100);
        b_row.center = Some(a);
        store.insert_root(&a_row).await.unwrap();
        store.insert_root(&b_row).await.unwrap();

        let new = Pubkey::new_unique();
        assert!(matches!(
            place(&store, &new, &a, Branch::Center, 1).await,
            Err(Error::PlacementExhausted(_))
        ));
        assert!(store.get_member(&new).await.unwrap().is_none());
        assert_eq!(member(&store, &a).await.total_center, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_never_share_a_slot() {
        let (store, root) = seeded().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..60 {
            let store = store.clone();
            let branch = Branch::ALL[i % 3];
            handles.push(tokio::spawn(async move {
                let wallet = Pubkey::new_unique();
                place(store.as_ref(), &wallet, &root, branch, i as i64).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.members().await.len(), 61);
        let root_row = member(&store, &root).await;
        assert_eq!(root_row.total_left, 20);
        assert_eq!(root_row.total_center, 20);
        assert_eq!(root_row.total_right, 20);
        assert_consistent(&store).await;
    }
}
