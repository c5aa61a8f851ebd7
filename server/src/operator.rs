use std::str::FromStr;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::Keypair,
    signer::{EncodableKey, Signer},
};

use crate::error::Error;

const DEFAULT_CU_LIMIT: u32 = 200_000;
const DEFAULT_CU_PRICE: u64 = 10_000;

/// The treasury that signs and funds payouts.
pub struct Operator {
    // The treasury authority keypair.
    pub keypair: Keypair,

    // Solana RPC client.
    pub rpc_client: RpcClient,

    // The token paid out.
    pub mint: Pubkey,

    // Decimals of the payout mint.
    pub decimals: u8,

    // Compute unit limit per payout transaction.
    pub cu_limit: u32,

    // Compute unit price per payout transaction, in micro-lamports.
    pub cu_price: u64,
}

impl Operator {
    pub async fn new() -> Result<Operator, Error> {
        let keypair = Operator::keypair()?;
        let rpc_client = Operator::rpc_client()?;
        let mint = Operator::mint()?;
        let decimals = Operator::get_decimals(&rpc_client, &mint).await?;
        let operator = Operator {
            keypair,
            rpc_client,
            mint,
            decimals,
            cu_limit: Operator::cu_limit()?,
            cu_price: Operator::cu_price()?,
        };
        log::info!(
            "payout operator ready, wallet {} mint {} ({} decimals)",
            operator.keypair.pubkey(),
            operator.mint,
            operator.decimals
        );
        Ok(operator)
    }

    async fn get_decimals(rpc_client: &RpcClient, mint: &Pubkey) -> Result<u8, Error> {
        let data = rpc_client.get_account_data(mint).await?;
        let mint = spl_token::state::Mint::unpack(data.as_slice())?;
        Ok(mint.decimals)
    }

    fn keypair() -> Result<Keypair, Error> {
        let keypair_path = Operator::keypair_path()?;
        let keypair = Keypair::read_from_file(keypair_path)
            .map_err(|err| Error::Internal(err.to_string()))?;
        Ok(keypair)
    }

    fn keypair_path() -> Result<String, Error> {
        std::env::var("KEYPAIR_PATH").map_err(From::from)
    }

    fn rpc_client() -> Result<RpcClient, Error> {
        let rpc_url = Operator::rpc_url()?;
        Ok(RpcClient::new_with_commitment(
            rpc_url,
            CommitmentConfig::confirmed(),
        ))
    }

    fn rpc_url() -> Result<String, Error> {
        std::env::var("RPC_URL").map_err(From::from)
    }

    fn mint() -> Result<Pubkey, Error> {
        let mint = std::env::var("PAYOUT_MINT")?;
        Pubkey::from_str(mint.trim()).map_err(From::from)
    }

    fn cu_limit() -> Result<u32, Error> {
        match std::env::var("PAYOUT_CU_LIMIT") {
            Ok(limit) => limit.trim().parse().map_err(From::from),
            Err(_) => Ok(DEFAULT_CU_LIMIT),
        }
    }

    fn cu_price() -> Result<u64, Error> {
        match std::env::var("PAYOUT_CU_PRICE") {
            Ok(price) => price.trim().parse().map_err(From::from),
            Err(_) => Ok(DEFAULT_CU_PRICE),
        }
    }
}
