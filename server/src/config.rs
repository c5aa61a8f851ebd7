use std::{str::FromStr, time::Duration};

use solana_sdk::pubkey::Pubkey;

use crate::error::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_REFERRAL_BASE_URL: &str = "https://billionup.ai";
const DEFAULT_PAYOUT_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_MONTHLY_INTERVAL_SECS: u64 = 60 * 60;

pub struct Config {
    /// The default sponsor and root of the network.
    pub root_wallet: Pubkey,

    pub bind_addr: String,

    /// Prefix of member referral links.
    pub referral_base_url: String,

    pub payout_interval: Duration,

    pub monthly_interval: Duration,

    /// Expected `Authorization` header on chain event posts. Event intake is
    /// refused when unset.
    pub event_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Ok(Config {
            root_wallet: root_wallet()?,
            bind_addr: var_or("BIND_ADDR", DEFAULT_BIND_ADDR),
            referral_base_url: var_or("REFERRAL_BASE_URL", DEFAULT_REFERRAL_BASE_URL),
            payout_interval: secs_or("PAYOUT_INTERVAL_SECS", DEFAULT_PAYOUT_INTERVAL_SECS)?,
            monthly_interval: secs_or("MONTHLY_INTERVAL_SECS", DEFAULT_MONTHLY_INTERVAL_SECS)?,
            event_auth_token: std::env::var("EVENT_AUTH_TOKEN").ok(),
        })
    }
}

pub fn root_wallet() -> Result<Pubkey, Error> {
    let root = std::env::var("ROOT_WALLET")?;
    Pubkey::from_str(root.trim()).map_err(From::from)
}

pub fn db_url() -> Result<String, Error> {
    std::env::var("DB_URL").map_err(From::from)
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn secs_or(name: &str, default: u64) -> Result<Duration, Error> {
    match std::env::var(name) {
        Ok(secs) => Ok(Duration::from_secs(secs.trim().parse()?)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
