use std::sync::Arc;

use clap::{Parser, Subcommand};
use ternary_server::{
    config,
    consts::{MEMBERSHIP_PERIOD, PAYOUT_LEASE_MAX_AGE},
    database::{self, PgStore},
    error::Error,
    operator::Operator,
    payout::{self, PayoutExecutor},
    rewards::{Rewards, TierTable},
    store::Store,
    utils,
};
use types::Member;

/// Operator commands against the membership database.
#[derive(Parser, Debug)]
#[command(name = "ternary-admin", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database types and tables if they do not exist.
    Migrate,

    /// Insert the ROOT_WALLET member if it does not exist.
    InitRoot,

    /// Queue a fresh copy of a failed payout.
    Requeue {
        /// Id of the failed payout.
        id: i64,
    },

    /// Fail payouts whose lease was never resolved, so they can be checked
    /// on-chain and requeued.
    ExpireLeases {
        /// Minimum lease age in seconds.
        #[arg(long, default_value_t = PAYOUT_LEASE_MAX_AGE)]
        max_age: i64,
    },

    /// Run one payout drain.
    Drain,

    /// Run one monthly payout scan.
    Monthly,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();
    let store = Arc::new(PgStore::new(database::create_pool()?));
    let now = utils::unix_timestamp();
    match args.command {
        Command::Migrate => {
            store.migrate().await?;
        }
        Command::InitRoot => {
            let root = config::root_wallet()?;
            let member = Member::new(root, None, None, now, now + MEMBERSHIP_PERIOD);
            if store.insert_root(&member).await? {
                println!("root member {} created", root);
            } else {
                println!("root member {} already exists", root);
            }
        }
        Command::Requeue { id } => {
            let new_id = payout::requeue(store.as_ref(), id, now).await?;
            println!("payout {} requeued as {}", id, new_id);
        }
        Command::ExpireLeases { max_age } => {
            let expired = payout::expire_leases(store.as_ref(), max_age, now).await?;
            for id in expired.iter() {
                println!("payout {} lease abandoned, verify on-chain before requeue", id);
            }
            println!("expired {} leases", expired.len());
        }
        Command::Drain => {
            let operator = Operator::new().await?;
            let executor = PayoutExecutor::new(store, Arc::new(operator));
            let report = executor.drain(now).await?;
            println!("sent: {}, failed: {}", report.sent, report.failed);
        }
        Command::Monthly => {
            let rewards = Rewards::new(store, TierTable::default());
            let queued = rewards.find_due_monthly_payouts(now).await?;
            println!("queued {} monthly payouts", queued);
        }
    }
    Ok(())
}
