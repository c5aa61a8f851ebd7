/// Seconds in a day.
pub const DAY: i64 = 24 * 60 * 60;

/// Length of a membership, from activation or renewal.
pub const MEMBERSHIP_PERIOD: i64 = 365 * DAY;

/// Interval between recurring payouts of an active tier.
pub const MONTHLY_RECURRENCE: i64 = 30 * DAY;

/// Number of members evaluated per reward calculation, starting at the sponsor.
pub const MAX_REWARD_HOPS: usize = 10;

/// Payout entries executed per drain.
pub const PAYOUT_BATCH_SIZE: usize = 10;

/// Nodes visited by one spillover search before giving up.
pub const MAX_SEARCH_NODES: usize = 100_000;

/// Placement retries after losing a slot to a concurrent registration.
pub const MAX_PLACEMENT_ATTEMPTS: usize = 64;

/// Ancestors followed by one upline walk before the chain counts as broken.
pub const MAX_UPLINE_DEPTH: usize = 100_000;

/// Age in seconds after which a claimed, unrecorded payout counts as abandoned.
pub const PAYOUT_LEASE_MAX_AGE: i64 = 60 * 60;
