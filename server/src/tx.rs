use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::{Transaction, TransactionError},
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};

use crate::{error::Error, operator::Operator, payout::PaymentRail};

// The blockhash expires well before the last poll.
const CONFIRM_RETRIES: u32 = 90;
const CONFIRM_INTERVAL_SECS: u64 = 2;

#[async_trait]
impl PaymentRail for Operator {
    async fn transfer(&self, to: &Pubkey, amount: u64) -> Result<String, Error> {
        let ixs = self.transfer_ixs(to, amount)?;
        let sig = submit_and_confirm(
            &self.keypair,
            &self.rpc_client,
            &ixs,
            self.cu_limit,
            self.cu_price,
        )
        .await?;
        Ok(sig.to_string())
    }
}

impl Operator {
    /// Token transfer of `amount` whole tokens from the treasury to `to`,
    /// creating the destination token account if needed.
    fn transfer_ixs(&self, to: &Pubkey, amount: u64) -> Result<Vec<Instruction>, Error> {
        let payer = self.keypair.pubkey();
        let base_units = 10u64
            .checked_pow(self.decimals as u32)
            .and_then(|unit| amount.checked_mul(unit))
            .ok_or(Error::PayoutExecutionFailed(format!(
                "amount {} overflows at {} decimals",
                amount, self.decimals
            )))?;
        let source = get_associated_token_address(&payer, &self.mint);
        let destination = get_associated_token_address(to, &self.mint);
        let create_ix =
            create_associated_token_account_idempotent(&payer, to, &self.mint, &spl_token::id());
        let transfer_ix = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &source,
            &self.mint,
            &destination,
            &payer,
            &[],
            base_units,
            self.decimals,
        )?;
        Ok(vec![create_ix, transfer_ix])
    }
}

/// Sends the transaction once and waits for confirmation. An unconfirmed
/// transaction is an error; it is never sent again from here.
pub async fn submit_and_confirm(
    signer: &Keypair,
    rpc_client: &RpcClient,
    ixs: &[Instruction],
    cu_limit: u32,
    cu_price: u64,
) -> Result<Signature, Error> {
    let (sig, hash) = submit(signer, rpc_client, ixs, cu_limit, cu_price).await?;
    log::info!("payout transaction initiated: {}", sig);
    confirm_transaction(rpc_client, &sig, &hash).await?;
    Ok(sig)
}

pub async fn submit(
    signer: &Keypair,
    rpc_client: &RpcClient,
    ixs: &[Instruction],
    cu_limit: u32,
    cu_price: u64,
) -> Result<(Signature, Hash), Error> {
    let cu_limit_ix = ComputeBudgetInstruction::set_compute_unit_limit(cu_limit);
    let cu_price_ix = ComputeBudgetInstruction::set_compute_unit_price(cu_price);
    let final_ixs = &[cu_limit_ix, cu_price_ix];
    let final_ixs = [final_ixs, ixs].concat();
    let hash = rpc_client.get_latest_blockhash().await?;
    let mut tx = Transaction::new_with_payer(final_ixs.as_slice(), Some(&signer.pubkey()));
    tx.sign(&[signer], hash);
    let sig = rpc_client.send_transaction(&tx).await?;
    Ok((sig, hash))
}

#[derive(Debug, PartialEq, Eq)]
enum Confirmation {
    Landed,
    Rejected(String),
    Pending,

    /// Not seen and no longer able to land.
    Expired,
}

fn classify(status: Option<Result<(), TransactionError>>, blockhash_valid: bool) -> Confirmation {
    match status {
        Some(Ok(())) => Confirmation::Landed,
        Some(Err(err)) => Confirmation::Rejected(err.to_string()),
        None if blockhash_valid => Confirmation::Pending,
        None => Confirmation::Expired,
    }
}

fn unconfirmed(sig: &Signature, reason: &str) -> Error {
    Error::PayoutExecutionFailed(format!(
        "transaction {} {}, verify on-chain before requeue",
        sig, reason
    ))
}

/// Polls until the transaction lands, fails, or its blockhash expires
/// without it being seen.
async fn confirm_transaction(
    rpc_client: &RpcClient,
    sig: &Signature,
    hash: &Hash,
) -> Result<(), Error> {
    for _ in 0..CONFIRM_RETRIES {
        let status = match rpc_client
            .get_signature_status_with_commitment(sig, CommitmentConfig::confirmed())
            .await
        {
            Ok(status) => status,
            Err(err) => {
                log::warn!("signature status of {}: {:?}", sig, err);
                None
            }
        };
        let blockhash_valid = match status {
            Some(_) => true,
            None => rpc_client
                .is_blockhash_valid(hash, CommitmentConfig::processed())
                .await
                .unwrap_or_else(|err| {
                    log::warn!("blockhash validity of {}: {:?}", sig, err);
                    true
                }),
        };
        match classify(status, blockhash_valid) {
            Confirmation::Landed => return Ok(()),
            Confirmation::Rejected(err) => {
                return Err(Error::PayoutExecutionFailed(format!(
                    "transaction {} failed: {}",
                    sig, err
                )));
            }
            Confirmation::Pending => {}
            Confirmation::Expired => {
                // last look, it may have landed in the final valid slot
                tokio::time::sleep(tokio::time::Duration::from_secs(CONFIRM_INTERVAL_SECS)).await;
                return match rpc_client
                    .get_signature_status_with_commitment(sig, CommitmentConfig::confirmed())
                    .await?
                {
                    Some(Ok(())) => Ok(()),
                    Some(Err(err)) => Err(Error::PayoutExecutionFailed(format!(
                        "transaction {} failed: {}",
                        sig, err
                    ))),
                    None => Err(unconfirmed(sig, "expired unconfirmed")),
                };
            }
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(CONFIRM_INTERVAL_SECS)).await;
    }
    Err(unconfirmed(sig, "still unconfirmed"))
}
