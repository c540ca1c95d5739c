#![no_std]

//! Shared building blocks for the receivable lending contracts: the payment
//! accrual engine, the tranche ledger, the derived loan lifecycle state and
//! the client interfaces the contracts use to talk to each other.

pub mod interfaces;
pub mod payment;
pub mod salt;
pub mod state;
pub mod tranche;
pub mod ttl;

pub use interfaces::{
    AuthorizationOracleClient, CollateralClient, LiquidityProviderClient, LoanClient,
    LoanConfig, LoanFactoryClient,
};
pub use payment::{Payment, RATE_SCALE, SECONDS_PER_YEAR};
pub use salt::loan_salt;
pub use state::LoanState;
pub use tranche::{Tranche, TrancheError, TrancheLedger};
