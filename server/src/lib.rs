pub mod config;
pub mod consts;
pub mod database;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod operator;
pub mod payout;
pub mod placement;
pub mod registry;
pub mod rewards;
pub mod store;
pub mod tx;
pub mod upline;
pub mod utils;
pub mod webhook;
pub mod worker;

pub use registry::Registry;
