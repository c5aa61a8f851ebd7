use actix_web::{http::header::ToStrError, HttpResponse};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("tokio postgres: {0}")]
    TokioPostgres(#[from] tokio_postgres::Error),
    #[error("deadpool postgress")]
    DeadpoolPostgres(#[from] deadpool_postgres::PoolError),
    #[error("deadpool create pool")]
    DeadpoolCreatePool(#[from] deadpool_postgres::CreatePoolError),
    #[error("http header to string")]
    HttpHeader(#[from] ToStrError),
    #[error("serde json")]
    SerdeJson(#[from] serde_json::Error),
    #[error("std io")]
    StdIO(#[from] std::io::Error),
    #[error("std env")]
    StdEnv(#[from] std::env::VarError),
    #[error("std parse int")]
    StdParseInt(#[from] std::num::ParseIntError),
    #[error("solana client: {0}")]
    SolanaClient(#[from] solana_client::client_error::ClientError),
    #[error("solana pubkey")]
    SolanaPubkey(#[from] solana_sdk::pubkey::ParsePubkeyError),
    #[error("solana program")]
    SolanaProgram(#[from] solana_sdk::program_error::ProgramError),
    #[error("member already registered: {0}")]
    DuplicateMember(String),
    #[error("sponsor not found: {0}")]
    SponsorNotFound(String),
    #[error("member not found: {0}")]
    MemberNotFound(String),
    #[error("no open slot found for {0}")]
    PlacementExhausted(String),
    #[error("upline of {0} does not reach the root")]
    BrokenUpline(String),
    #[error("reward calculation failed: {0}")]
    RewardCalculationFailed(String),
    #[error("payout execution failed: {0}")]
    PayoutExecutionFailed(String),
    #[error("payout not found: {0}")]
    PayoutNotFound(i64),
    #[error("invalid tier table: {0}")]
    InvalidTierTable(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Internal(String),
}

impl From<Error> for HttpResponse {
    fn from(value: Error) -> Self {
        match value {
            Error::DuplicateMember(_) => HttpResponse::Conflict().body(value.to_string()),
            Error::SponsorNotFound(_) | Error::SolanaPubkey(_) => {
                HttpResponse::BadRequest().body(value.to_string())
            }
            Error::MemberNotFound(_) | Error::PayoutNotFound(_) => {
                HttpResponse::NotFound().body(value.to_string())
            }
            Error::Unauthorized => HttpResponse::Unauthorized().finish(),
            _ => HttpResponse::InternalServerError().finish(),
        }
    }
}
