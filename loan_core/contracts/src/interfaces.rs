use soroban_sdk::{contractclient, contracttype, Address, BytesN, Env, Symbol, Vec};

use crate::{LoanState, Payment};

/// Parameters a loan is initialized with.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoanConfig {
    /// Funds the loan and receives the debit notifications.
    pub liquidity_provider: Address,
    /// Fungible asset principal and interest are paid in.
    pub asset: Address,
    /// Non-fungible token contract holding the receivables.
    pub collateral_asset: Address,
    pub beneficiary: Address,
    /// Trailing overdue payments that put the loan in default.
    pub default_threshold: u32,
}

#[contractclient(name = "LoanClient")]
pub trait LoanInterface {
    fn initialize(env: Env, factory: Address, config: LoanConfig);
    fn push_payments(env: Env, payments: Vec<Payment>, collateral_ids: Vec<u64>) -> i128;
    fn push_tranches(env: Env, boundaries: Vec<u32>, recipients: Vec<Address>);
    fn fund_n(env: Env, funder: Address, n: u32) -> i128;
    fn repossess(env: Env, start: u32, end: u32, receiver: Address) -> i128;
    fn upgrade(env: Env, new_wasm_hash: BytesN<32>);
    fn state(env: Env) -> LoanState;
    fn config(env: Env) -> LoanConfig;
}

/// Callback a loan issues whenever principal leaves its books through
/// repayment.
#[contractclient(name = "LiquidityProviderClient")]
pub trait LiquidityProviderInterface {
    fn on_debit(env: Env, loan: Address, principal: i128);
}

#[contractclient(name = "LoanFactoryClient")]
pub trait LoanFactoryInterface {
    fn predict_address(env: Env, deployer: Address, borrower: Address, salt: BytesN<32>) -> Address;
    fn deploy(
        env: Env,
        deployer: Address,
        borrower: Address,
        salt: BytesN<32>,
        config: LoanConfig,
    ) -> Address;
}

#[contractclient(name = "CollateralClient")]
pub trait CollateralInterface {
    fn owner_of(env: Env, token_id: u64) -> Address;
    fn transfer(env: Env, from: Address, to: Address, token_id: u64);
    fn transfer_from(env: Env, spender: Address, from: Address, to: Address, token_id: u64);
    fn burn(env: Env, from: Address, token_id: u64);
}

/// Decides whether `caller` may perform `operation` on `target`.
#[contractclient(name = "AuthorizationOracleClient")]
pub trait AuthorizationOracle {
    fn is_authorized(env: Env, caller: Address, operation: Symbol, target: Address) -> bool;
}
