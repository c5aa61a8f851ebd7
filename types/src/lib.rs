use std::{fmt, str::FromStr};

use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// One of the three slots a member can occupy under its sponsor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "branch")]
pub enum Branch {
    #[postgres(name = "left")]
    Left,
    #[postgres(name = "center")]
    Center,
    #[postgres(name = "right")]
    Right,
}

impl Branch {
    pub const ALL: [Branch; 3] = [Branch::Left, Branch::Center, Branch::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Left => "left",
            Branch::Center => "center",
            Branch::Right => "right",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Branch::Left),
            "center" => Ok(Branch::Center),
            "right" => Ok(Branch::Right),
            other => Err(format!("unknown branch: {}", other)),
        }
    }
}

// Contract listeners do not agree on the casing of branch names.
fn branch_ignoring_case<'de, D>(deserializer: D) -> Result<Branch, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "member_status")]
pub enum MemberStatus {
    #[postgres(name = "active")]
    Active,
    #[postgres(name = "expired")]
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "payout_kind")]
pub enum PayoutKind {
    #[postgres(name = "achievement")]
    Achievement,
    #[postgres(name = "monthly")]
    Monthly,
}

/// Lifecycle of a queued payout. `Sent` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "payout_status")]
pub enum PayoutStatus {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "sent")]
    Sent,
    #[postgres(name = "failed")]
    Failed,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PayoutStatus::Pending)
    }
}

/// A participant of the referral network.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Member {
    /// The member's wallet.
    pub wallet: Pubkey,

    /// The member this wallet was placed under. `None` only for the root.
    pub sponsor: Option<Pubkey>,

    /// The slot this member occupies under its sponsor.
    pub branch: Option<Branch>,

    // Slot occupants.
    pub left: Option<Pubkey>,
    pub center: Option<Pubkey>,
    pub right: Option<Pubkey>,

    // Descendants inserted at each branch anywhere below this member.
    pub total_left: u64,
    pub total_center: u64,
    pub total_right: u64,

    /// Every descendant, regardless of branch.
    pub total_direct_referrals: u64,

    /// Number of times this member absorbed a spillover placement.
    pub spill_count: u64,

    pub activated_at: i64,
    pub expiry_at: i64,
    pub status: MemberStatus,
    pub rank: u32,
}

impl Member {
    pub fn new(
        wallet: Pubkey,
        sponsor: Option<Pubkey>,
        branch: Option<Branch>,
        activated_at: i64,
        expiry_at: i64,
    ) -> Self {
        Member {
            wallet,
            sponsor,
            branch,
            left: None,
            center: None,
            right: None,
            total_left: 0,
            total_center: 0,
            total_right: 0,
            total_direct_referrals: 0,
            spill_count: 0,
            activated_at,
            expiry_at,
            status: MemberStatus::Active,
            rank: 0,
        }
    }

    pub fn slot(&self, branch: Branch) -> Option<Pubkey> {
        match branch {
            Branch::Left => self.left,
            Branch::Center => self.center,
            Branch::Right => self.right,
        }
    }

    pub fn slot_mut(&mut self, branch: Branch) -> &mut Option<Pubkey> {
        match branch {
            Branch::Left => &mut self.left,
            Branch::Center => &mut self.center,
            Branch::Right => &mut self.right,
        }
    }

    pub fn total(&self, branch: Branch) -> u64 {
        match branch {
            Branch::Left => self.total_left,
            Branch::Center => self.total_center,
            Branch::Right => self.total_right,
        }
    }

    pub fn total_mut(&mut self, branch: Branch) -> &mut u64 {
        match branch {
            Branch::Left => &mut self.total_left,
            Branch::Center => &mut self.total_center,
            Branch::Right => &mut self.total_right,
        }
    }

    pub fn is_active_at(&self, now: i64) -> bool {
        now < self.expiry_at
    }
}

/// One link of a member's sponsor chain. Written once at registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AncestorRecord {
    pub wallet: Pubkey,
    pub ancestor: Pubkey,

    /// 1 is the immediate sponsor.
    pub depth: u32,

    /// The branch the member was inserted at, constant across its chain.
    pub branch: Branch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RewardState {
    pub wallet: Pubkey,
    pub tier: u32,
    pub is_active: bool,
    pub first_qualified_at: i64,
    pub last_achievement_at: i64,
    pub last_payout_at: i64,
    pub payout_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PayoutEntry {
    pub id: i64,
    pub wallet: Pubkey,

    /// Whole-token amount.
    pub amount: u64,
    pub kind: PayoutKind,
    pub status: PayoutStatus,

    /// Confirmed transaction signature, set only when sent.
    pub signature: Option<String>,

    /// Failure detail, set only when failed.
    pub error: Option<String>,
    pub created_at: i64,
    pub sent_at: Option<i64>,

    /// Lease taken by a drain worker before execution.
    pub claimed_at: Option<i64>,
}

/// The payload to send to the /members/register endpoint.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// The wallet being registered.
    pub wallet_address: String,

    /// The requested sponsor. Absent means the default root.
    pub referrer_wallet: Option<String>,

    /// The requested branch under the sponsor.
    pub position: Branch,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewPayload {
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
pub struct GetMemberPayload {
    pub wallet: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Active,
    Expired,
    NotRegistered,
}

// The response from the /members/{wallet}/status request.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatusResponse {
    pub status: RegistrationStatus,
    pub wallet_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub status: String,
    pub message: String,
    pub sponsor: String,
    pub position: Branch,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    pub message: String,
}

/// A notification from the membership contract listener.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "event")]
pub enum ChainEvent {
    MemberActivated {
        user: String,
        referrer: Option<String>,
        #[serde(deserialize_with = "branch_ignoring_case")]
        position: Branch,
    },
    MembershipRenewed {
        user: String,
    },
}
