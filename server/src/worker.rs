use std::{sync::Arc, time::Duration};

use crate::{payout::PayoutExecutor, rewards::Rewards, utils};

/// Drains the payout queue on every tick. Errors are logged and the loop
/// carries on with the next tick.
pub async fn payout_loop(executor: Arc<PayoutExecutor>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match executor.drain(utils::unix_timestamp()).await {
            Ok(report) if report.sent + report.failed > 0 => {
                log::info!(
                    "payout drain done: {} sent, {} failed",
                    report.sent,
                    report.failed
                );
            }
            Ok(_) => {}
            Err(err) => log::error!("payout drain: {:?}", err),
        }
    }
}

/// Queues monthly payouts that came due since the last tick.
pub async fn monthly_loop(rewards: Arc<Rewards>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match rewards.find_due_monthly_payouts(utils::unix_timestamp()).await {
            Ok(0) => log::debug!("no monthly payouts due"),
            Ok(n) => log::info!("queued {} monthly payouts", n),
            Err(err) => log::error!("monthly payout scan: {:?}", err),
        }
    }
}
