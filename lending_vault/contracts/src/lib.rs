#![no_std]

use loan_core::{
    ttl, AuthorizationOracleClient, LoanClient, LoanConfig, LoanFactoryClient, Payment,
};
use soroban_sdk::{
    contract, contractimpl, contracttype, contracterror, log, symbol_short,
    token, Address, BytesN, Env, IntoVal, Symbol, Val, Vec,
};

// ============================================================================
// Types
// ============================================================================

/// Aggregate ledger. `total_lent` always equals the sum of the per-loan
/// `LentTo` entries, `total_delegated` the sum of the `DelegatedTo` entries.
#[contracttype]
#[derive(Clone, Debug, Default)]
pub struct VaultState {
    pub total_shares: i128,
    pub total_lent: i128,
    pub total_delegated: i128,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct LPPosition {
    pub shares: i128,
    pub deposit_timestamp: u64,
}

#[contracttype]
pub enum DataKey {
    Admin,
    BaseAsset,
    Factory,
    Oracle,
    VaultState,
    LPPosition(Address),
    MinDeposit,
    Paused,
    LoanCount,
    LoanAt(u32),
    LoanBorrower(Address),
    LentTo(Address),
    /// Principal pushed to a loan and not funded yet.
    Unfunded(Address),
    DelegatedTo(Address),
}

// Loan errors pass through brokered calls unchanged, so vault codes start
// at 101.
#[contracterror]
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u32)]
pub enum Error {
    NotAuthorized = 101,
    AlreadyInitialized = 102,
    InsufficientDeposit = 103,
    InsufficientShares = 104,
    InsufficientLiquidity = 105,
    ContractPaused = 106,
    ZeroAmount = 107,
    Overflow = 108,
    NotInitialized = 109,
    UnknownLoan = 110,
    DuplicateLoan = 111,
    UnexpectedLoanAddress = 112,
    LedgerUnderflow = 113,
    LoanStillActive = 114,
}

#[contract]
pub struct LendingVaultContract;

#[contractimpl]
impl LendingVaultContract {

    pub fn initialize(
        env: Env,
        admin: Address,
        base_asset: Address,
        factory: Address,
        oracle: Address,
        min_deposit: i128,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::BaseAsset, &base_asset);
        env.storage().instance().set(&DataKey::Factory, &factory);
        env.storage().instance().set(&DataKey::Oracle, &oracle);
        env.storage().instance().set(&DataKey::MinDeposit, &min_deposit);
        env.storage().instance().set(&DataKey::Paused, &false);
        env.storage().instance().set(&DataKey::VaultState, &VaultState::default());
        env.storage().instance().set(&DataKey::LoanCount, &0u32);
        ttl::bump_instance(&env);
        Ok(())
    }

    // ========================================================================
    // LP Actions
    // ========================================================================

    /// Deposit base asset, receive LP shares
    pub fn deposit(env: Env, depositor: Address, amount: i128) -> Result<i128, Error> {
        Self::require_not_paused(&env)?;
        depositor.require_auth();

        if amount <= 0 { return Err(Error::ZeroAmount); }

        let min_dep: i128 = env.storage().instance().get(&DataKey::MinDeposit).unwrap_or(0);
        if amount < min_dep { return Err(Error::InsufficientDeposit); }

        let mut state = Self::state_internal(&env)?;

        // Calculate shares
        let shares = if state.total_shares == 0 {
            amount
        } else {
            let total_assets = Self::calc_total_assets(&env, &state)?;
            if total_assets == 0 { amount }
            else { Self::mul_div(amount, state.total_shares, total_assets)? }
        };
        if shares <= 0 { return Err(Error::ZeroAmount); }

        Self::asset(&env)?.transfer(&depositor, &env.current_contract_address(), &amount);

        state.total_shares = state.total_shares.checked_add(shares).ok_or(Error::Overflow)?;
        env.storage().instance().set(&DataKey::VaultState, &state);

        let mut pos: LPPosition = env.storage().persistent()
            .get(&DataKey::LPPosition(depositor.clone()))
            .unwrap_or(LPPosition { shares: 0, deposit_timestamp: env.ledger().timestamp() });
        pos.shares = pos.shares.checked_add(shares).ok_or(Error::Overflow)?;
        Self::store(&env, &DataKey::LPPosition(depositor.clone()), &pos);
        ttl::bump_instance(&env);

        env.events().publish((symbol_short!("deposit"), depositor), (amount, shares));
        Ok(shares)
    }

    /// Withdraw by burning shares. Only idle capital can leave: what is lent
    /// or delegated backs the shares but cannot be redeemed yet.
    pub fn withdraw(env: Env, depositor: Address, shares_to_burn: i128) -> Result<i128, Error> {
        Self::require_not_paused(&env)?;
        depositor.require_auth();

        if shares_to_burn <= 0 { return Err(Error::ZeroAmount); }

        let mut pos: LPPosition = env.storage().persistent()
            .get(&DataKey::LPPosition(depositor.clone()))
            .ok_or(Error::InsufficientShares)?;
        if pos.shares < shares_to_burn { return Err(Error::InsufficientShares); }

        let mut state = Self::state_internal(&env)?;
        let total_assets = Self::calc_total_assets(&env, &state)?;
        let withdraw_amt = Self::mul_div(shares_to_burn, total_assets, state.total_shares)?;

        let asset = Self::asset(&env)?;
        if withdraw_amt > asset.balance(&env.current_contract_address()) {
            return Err(Error::InsufficientLiquidity);
        }

        state.total_shares = state.total_shares.checked_sub(shares_to_burn).ok_or(Error::Overflow)?;
        env.storage().instance().set(&DataKey::VaultState, &state);
        pos.shares = pos.shares.checked_sub(shares_to_burn).ok_or(Error::Overflow)?;
        Self::store(&env, &DataKey::LPPosition(depositor.clone()), &pos);
        ttl::bump_instance(&env);

        asset.transfer(&env.current_contract_address(), &depositor, &withdraw_amt);

        env.events().publish((symbol_short!("withdraw"), depositor), (withdraw_amt, shares_to_burn));
        Ok(withdraw_amt)
    }

    // ========================================================================
    // Loans
    // ========================================================================

    /// Deploy a loan for `borrower` at its predicted address and push its
    /// first payments. A (borrower, salt) pair can only be used once.
    pub fn request_loan(
        env: Env,
        borrower: Address,
        collateral_asset: Address,
        beneficiary: Address,
        default_threshold: u32,
        payments: Vec<Payment>,
        collateral_ids: Vec<u64>,
        salt: BytesN<32>,
    ) -> Result<Address, Error> {
        Self::require_not_paused(&env)?;
        borrower.require_auth();

        let this = env.current_contract_address();
        let factory: Address = env.storage().instance().get(&DataKey::Factory).ok_or(Error::NotInitialized)?;
        let factory = LoanFactoryClient::new(&env, &factory);

        let predicted = factory.predict_address(&this, &borrower, &salt);
        if Self::is_known(&env, &predicted) { return Err(Error::DuplicateLoan); }

        let base_asset: Address = env.storage().instance().get(&DataKey::BaseAsset).ok_or(Error::NotInitialized)?;
        let config = LoanConfig {
            liquidity_provider: this.clone(),
            asset: base_asset,
            collateral_asset,
            beneficiary,
            default_threshold,
        };
        let loan = factory.deploy(&this, &borrower, &salt, &config);
        if loan != predicted { return Err(Error::UnexpectedLoanAddress); }

        let count = Self::total_loans(env.clone());
        Self::store(&env, &DataKey::LoanBorrower(loan.clone()), &borrower);
        Self::store(&env, &DataKey::LentTo(loan.clone()), &0i128);
        Self::store(&env, &DataKey::LoanAt(count), &loan);
        env.storage().instance().set(&DataKey::LoanCount, &(count + 1));
        ttl::bump_instance(&env);

        if !payments.is_empty() {
            let principal = LoanClient::new(&env, &loan).push_payments(&payments, &collateral_ids);
            Self::add_unfunded(&env, &loan, principal)?;
        }

        env.events().publish((symbol_short!("request"), borrower), loan.clone());
        Ok(loan)
    }

    /// More payments for a loan, on behalf of the borrower who requested it.
    pub fn push_payments(
        env: Env,
        loan: Address,
        payments: Vec<Payment>,
        collateral_ids: Vec<u64>,
    ) -> Result<i128, Error> {
        Self::require_not_paused(&env)?;
        let borrower: Address = env.storage().persistent()
            .get(&DataKey::LoanBorrower(loan.clone()))
            .ok_or(Error::UnknownLoan)?;
        borrower.require_auth();

        let principal = LoanClient::new(&env, &loan).push_payments(&payments, &collateral_ids);
        Self::add_unfunded(&env, &loan, principal)?;
        ttl::bump_instance(&env);

        env.events().publish((symbol_short!("payments"), loan), principal);
        Ok(principal)
    }

    pub fn push_tranches(
        env: Env,
        manager: Address,
        loan: Address,
        boundaries: Vec<u32>,
        recipients: Vec<Address>,
    ) -> Result<(), Error> {
        Self::require_manager(&env, &manager, symbol_short!("push_trn"), &loan)?;
        Self::require_loan(&env, &loan)?;
        LoanClient::new(&env, &loan).push_tranches(&boundaries, &recipients);
        ttl::bump_instance(&env);
        Ok(())
    }

    /// Fund up to `n` payments of `loan` and book what actually left.
    pub fn fund_n(env: Env, manager: Address, loan: Address, n: u32) -> Result<i128, Error> {
        Self::require_not_paused(&env)?;
        Self::require_manager(&env, &manager, symbol_short!("fund_n"), &loan)?;
        Self::require_loan(&env, &loan)?;

        // Refresh the allowance expiry; funding can come long after the push
        let unfunded = Self::unfunded(&env, &loan);
        Self::approve_loan(&env, &loan, unfunded)?;

        let principal = LoanClient::new(&env, &loan).fund_n(&env.current_contract_address(), &n);
        Self::credit(&env, &loan, principal)?;
        let remaining = unfunded.checked_sub(principal).ok_or(Error::LedgerUnderflow)?;
        Self::store(&env, &DataKey::Unfunded(loan.clone()), &remaining);

        env.events().publish((symbol_short!("fund"), loan), (n, principal));
        Ok(principal)
    }

    pub fn repossess(
        env: Env,
        manager: Address,
        loan: Address,
        start: u32,
        end: u32,
        receiver: Address,
    ) -> Result<i128, Error> {
        Self::require_manager(&env, &manager, symbol_short!("reposs"), &loan)?;
        Self::require_loan(&env, &loan)?;

        let principal = LoanClient::new(&env, &loan).repossess(&start, &end, &receiver);
        Self::debit(&env, &loan, principal)?;

        env.events().publish((symbol_short!("reposs"), loan), (start, end, principal));
        Ok(principal)
    }

    pub fn upgrade_loan(
        env: Env,
        manager: Address,
        loan: Address,
        new_wasm_hash: BytesN<32>,
    ) -> Result<(), Error> {
        Self::require_manager(&env, &manager, symbol_short!("upgrade"), &loan)?;
        Self::require_loan(&env, &loan)?;
        LoanClient::new(&env, &loan).upgrade(&new_wasm_hash);
        ttl::bump_instance(&env);
        Ok(())
    }

    /// Revoke what is left of the allowance of a loan that can no longer be
    /// funded.
    pub fn release_allowance(env: Env, loan: Address) -> Result<(), Error> {
        Self::require_loan(&env, &loan)?;
        if !LoanClient::new(&env, &loan).state().is_terminal() {
            return Err(Error::LoanStillActive);
        }
        let released = Self::unfunded(&env, &loan);
        Self::store(&env, &DataKey::Unfunded(loan.clone()), &0i128);
        Self::approve_loan(&env, &loan, 0)?;
        env.events().publish((symbol_short!("release"), loan), released);
        Ok(())
    }

    /// Called by a loan when repaid principal leaves its books.
    pub fn on_debit(env: Env, loan: Address, principal: i128) -> Result<(), Error> {
        loan.require_auth();
        Self::require_loan(&env, &loan)?;
        if principal < 0 { return Err(Error::ZeroAmount); }
        Self::debit(&env, &loan, principal)?;
        env.events().publish((symbol_short!("debit"), loan), principal);
        Ok(())
    }

    // ========================================================================
    // Delegation
    // ========================================================================

    /// Lend idle capital to an external venue.
    pub fn ask_delegation(env: Env, manager: Address, delegate: Address, amount: i128) -> Result<(), Error> {
        Self::require_not_paused(&env)?;
        let this = env.current_contract_address();
        Self::require_manager(&env, &manager, symbol_short!("delegate"), &this)?;
        if amount <= 0 { return Err(Error::ZeroAmount); }

        let asset = Self::asset(&env)?;
        if amount > asset.balance(&this) { return Err(Error::InsufficientLiquidity); }

        let mut state = Self::state_internal(&env)?;
        let delegated = Self::delegated_to(env.clone(), delegate.clone())
            .checked_add(amount).ok_or(Error::Overflow)?;
        state.total_delegated = state.total_delegated.checked_add(amount).ok_or(Error::Overflow)?;
        Self::store(&env, &DataKey::DelegatedTo(delegate.clone()), &delegated);
        env.storage().instance().set(&DataKey::VaultState, &state);
        ttl::bump_instance(&env);

        asset.transfer(&this, &delegate, &amount);
        env.events().publish((symbol_short!("delegate"), delegate), amount);
        Ok(())
    }

    /// Delegate returns funds. Anything above what was delegated is yield.
    pub fn refund_delegation(env: Env, delegate: Address, amount: i128) -> Result<(), Error> {
        delegate.require_auth();
        if amount <= 0 { return Err(Error::ZeroAmount); }
        Self::settle_refund(&env, &delegate, amount)?;
        Self::asset(&env)?.transfer(&delegate, &env.current_contract_address(), &amount);
        env.events().publish((symbol_short!("refund"), delegate), amount);
        Ok(())
    }

    /// Pull funds back from a delegate through the allowance it granted.
    pub fn force_refund_delegation(
        env: Env,
        manager: Address,
        delegate: Address,
        amount: i128,
    ) -> Result<(), Error> {
        let this = env.current_contract_address();
        Self::require_manager(&env, &manager, symbol_short!("force_ref"), &this)?;
        if amount <= 0 { return Err(Error::ZeroAmount); }
        Self::settle_refund(&env, &delegate, amount)?;
        Self::asset(&env)?.transfer_from(&this, &delegate, &this, &amount);
        env.events().publish((symbol_short!("force_ref"), delegate), amount);
        Ok(())
    }

    // ========================================================================
    // View
    // ========================================================================

    pub fn total_assets(env: Env) -> Result<i128, Error> {
        let state = Self::state_internal(&env)?;
        Self::calc_total_assets(&env, &state)
    }

    /// Idle capital held by the vault itself.
    pub fn available(env: Env) -> Result<i128, Error> {
        Ok(Self::asset(&env)?.balance(&env.current_contract_address()))
    }

    /// Share of total assets lent out, in bps.
    pub fn utilization(env: Env) -> Result<i128, Error> {
        let state = Self::state_internal(&env)?;
        let total_assets = Self::calc_total_assets(&env, &state)?;
        if total_assets == 0 { return Ok(0); }
        Self::mul_div(state.total_lent, 10000, total_assets)
    }

    pub fn get_state(env: Env) -> Result<VaultState, Error> {
        Self::state_internal(&env)
    }

    pub fn total_lent(env: Env) -> Result<i128, Error> {
        Ok(Self::state_internal(&env)?.total_lent)
    }

    pub fn lent_to(env: Env, loan: Address) -> i128 {
        env.storage().persistent().get(&DataKey::LentTo(loan)).unwrap_or(0)
    }

    pub fn total_delegated(env: Env) -> Result<i128, Error> {
        Ok(Self::state_internal(&env)?.total_delegated)
    }

    pub fn delegated_to(env: Env, delegate: Address) -> i128 {
        env.storage().persistent().get(&DataKey::DelegatedTo(delegate)).unwrap_or(0)
    }

    pub fn is_loan(env: Env, loan: Address) -> bool {
        Self::is_known(&env, &loan)
    }

    pub fn total_loans(env: Env) -> u32 {
        env.storage().instance().get(&DataKey::LoanCount).unwrap_or(0)
    }

    /// Loans in request order.
    pub fn loan_at(env: Env, index: u32) -> Option<Address> {
        env.storage().persistent().get(&DataKey::LoanAt(index))
    }

    /// Principal pushed to `loan` that the vault has yet to fund.
    pub fn unfunded_principal(env: Env, loan: Address) -> i128 {
        Self::unfunded(&env, &loan)
    }

    pub fn loan_borrower(env: Env, loan: Address) -> Option<Address> {
        env.storage().persistent().get(&DataKey::LoanBorrower(loan))
    }

    pub fn get_lp(env: Env, depositor: Address) -> Option<LPPosition> {
        env.storage().persistent().get(&DataKey::LPPosition(depositor))
    }

    pub fn shares_value(env: Env, shares: i128) -> Result<i128, Error> {
        let state = Self::state_internal(&env)?;
        if state.total_shares == 0 { return Ok(shares); }
        Self::mul_div(shares, Self::calc_total_assets(&env, &state)?, state.total_shares)
    }

    // ========================================================================
    // Admin
    // ========================================================================

    pub fn pause(env: Env) -> Result<(), Error> {
        Self::require_admin(&env)?;
        env.storage().instance().set(&DataKey::Paused, &true);
        Ok(())
    }

    pub fn unpause(env: Env) -> Result<(), Error> {
        Self::require_admin(&env)?;
        env.storage().instance().set(&DataKey::Paused, &false);
        Ok(())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn calc_total_assets(env: &Env, state: &VaultState) -> Result<i128, Error> {
        Self::asset(env)?
            .balance(&env.current_contract_address())
            .checked_add(state.total_lent)
            .and_then(|v| v.checked_add(state.total_delegated))
            .ok_or(Error::Overflow)
    }

    fn credit(env: &Env, loan: &Address, amount: i128) -> Result<(), Error> {
        let mut state = Self::state_internal(env)?;
        let lent = Self::lent_to(env.clone(), loan.clone()).checked_add(amount).ok_or(Error::Overflow)?;
        state.total_lent = state.total_lent.checked_add(amount).ok_or(Error::Overflow)?;
        Self::store(env, &DataKey::LentTo(loan.clone()), &lent);
        env.storage().instance().set(&DataKey::VaultState, &state);
        ttl::bump_instance(env);
        Ok(())
    }

    // A loan reporting more principal than it was lent is a broken invariant,
    // never clamped.
    fn debit(env: &Env, loan: &Address, amount: i128) -> Result<(), Error> {
        let mut state = Self::state_internal(env)?;
        let lent = Self::lent_to(env.clone(), loan.clone());
        let remaining = match lent.checked_sub(amount) {
            Some(v) if v >= 0 => v,
            _ => {
                log!(env, "lent ledger underflow", loan.clone(), lent, amount);
                return Err(Error::LedgerUnderflow);
            }
        };
        state.total_lent = match state.total_lent.checked_sub(amount) {
            Some(v) if v >= 0 => v,
            _ => return Err(Error::LedgerUnderflow),
        };
        Self::store(env, &DataKey::LentTo(loan.clone()), &remaining);
        env.storage().instance().set(&DataKey::VaultState, &state);
        ttl::bump_instance(env);
        Ok(())
    }

    fn settle_refund(env: &Env, delegate: &Address, amount: i128) -> Result<(), Error> {
        let mut state = Self::state_internal(env)?;
        let delegated = Self::delegated_to(env.clone(), delegate.clone());
        let returned = core::cmp::min(amount, delegated);
        state.total_delegated = state.total_delegated.checked_sub(returned).ok_or(Error::Overflow)?;
        Self::store(env, &DataKey::DelegatedTo(delegate.clone()), &(delegated - returned));
        env.storage().instance().set(&DataKey::VaultState, &state);
        ttl::bump_instance(env);
        Ok(())
    }

    fn add_unfunded(env: &Env, loan: &Address, principal: i128) -> Result<(), Error> {
        let unfunded = Self::unfunded(env, loan).checked_add(principal).ok_or(Error::Overflow)?;
        Self::store(env, &DataKey::Unfunded(loan.clone()), &unfunded);
        Self::approve_loan(env, loan, unfunded)
    }

    // The allowance always equals the unfunded principal, so an expired
    // approval is simply granted again.
    fn approve_loan(env: &Env, loan: &Address, amount: i128) -> Result<(), Error> {
        let expiration = env.ledger().sequence()
            .checked_add(ttl::ALLOWANCE_LEDGERS)
            .ok_or(Error::Overflow)?;
        Self::asset(env)?.approve(&env.current_contract_address(), loan, &amount, &expiration);
        Ok(())
    }

    fn unfunded(env: &Env, loan: &Address) -> i128 {
        env.storage().persistent().get(&DataKey::Unfunded(loan.clone())).unwrap_or(0)
    }

    fn store<V>(env: &Env, key: &DataKey, value: &V)
    where
        V: IntoVal<Env, Val>,
    {
        env.storage().persistent().set(key, value);
        ttl::bump_persistent(env, key);
    }

    fn require_manager(env: &Env, manager: &Address, operation: Symbol, target: &Address) -> Result<(), Error> {
        manager.require_auth();
        let oracle: Address = env.storage().instance().get(&DataKey::Oracle).ok_or(Error::NotInitialized)?;
        if !AuthorizationOracleClient::new(env, &oracle).is_authorized(manager, &operation, target) {
            return Err(Error::NotAuthorized);
        }
        Ok(())
    }

    fn require_loan(env: &Env, loan: &Address) -> Result<(), Error> {
        if !Self::is_known(env, loan) { return Err(Error::UnknownLoan); }
        ttl::bump_persistent(env, &DataKey::LoanBorrower(loan.clone()));
        ttl::bump_persistent(env, &DataKey::LentTo(loan.clone()));
        Ok(())
    }

    fn is_known(env: &Env, loan: &Address) -> bool {
        env.storage().persistent().has(&DataKey::LoanBorrower(loan.clone()))
    }

    fn asset(env: &Env) -> Result<token::Client<'_>, Error> {
        let base_asset: Address = env.storage().instance().get(&DataKey::BaseAsset).ok_or(Error::NotInitialized)?;
        Ok(token::Client::new(env, &base_asset))
    }

    fn state_internal(env: &Env) -> Result<VaultState, Error> {
        env.storage().instance().get(&DataKey::VaultState).ok_or(Error::NotInitialized)
    }

    fn require_admin(env: &Env) -> Result<(), Error> {
        let admin: Address = env.storage().instance().get(&DataKey::Admin).ok_or(Error::NotInitialized)?;
        admin.require_auth();
        Ok(())
    }

    fn require_not_paused(env: &Env) -> Result<(), Error> {
        let paused: bool = env.storage().instance().get(&DataKey::Paused).unwrap_or(false);
        if paused { Err(Error::ContractPaused) } else { Ok(()) }
    }

    fn mul_div(a: i128, b: i128, c: i128) -> Result<i128, Error> {
        if c == 0 { return Err(Error::Overflow); }
        Ok(((a as u128).checked_mul(b as u128).ok_or(Error::Overflow)?
            .checked_div(c as u128).ok_or(Error::Overflow)?) as i128)
    }
}
