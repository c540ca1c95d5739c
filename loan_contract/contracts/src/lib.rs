#![no_std]

use loan_core::{
    ttl, CollateralClient, LiquidityProviderClient, LoanConfig, LoanState, Payment, Tranche,
    TrancheLedger,
};
use soroban_sdk::{
    contract, contractimpl, contracttype, contracterror, symbol_short, token, Address, BytesN,
    Env, Map, Vec,
};

// ============================================================================
// Types
// ============================================================================

/// Cursors and flags the lifecycle state is derived from.
#[contracttype]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Progress {
    /// Next payment to fund.
    pub funding_cursor: u32,
    /// Next payment to repay.
    pub payment_cursor: u32,
    pub canceled: bool,
    pub repossessed: bool,
}

#[contracttype]
pub enum DataKey {
    Factory,
    Config,
    Payments,
    CollateralIds,
    Tranches,
    Progress,
    Held(u64),
}

#[contracterror]
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    InvalidState = 3,
    InvalidBeneficiary = 4,
    InvalidThreshold = 5,
    LengthMismatch = 6,
    ZeroAmount = 7,
    PaymentAlreadyFunded = 8,
    UnorderedMaturity = 9,
    PaymentAlreadyMatured = 10,
    DuplicateCollateral = 11,
    NonIncreasingTranche = 12,
    TranchesExceedPayments = 13,
    TranchesIncomplete = 14,
    InvalidRange = 15,
    CollateralNotHeld = 16,
    Overflow = 17,
    CollateralNotFound = 18,
}

#[contract]
pub struct LoanContract;

#[contractimpl]
impl LoanContract {

    /// Called once by the factory right after deployment.
    pub fn initialize(env: Env, factory: Address, config: LoanConfig) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(Error::AlreadyInitialized);
        }
        factory.require_auth();

        if config.beneficiary == config.liquidity_provider {
            return Err(Error::InvalidBeneficiary);
        }
        if config.default_threshold == 0 {
            return Err(Error::InvalidThreshold);
        }

        env.storage().instance().set(&DataKey::Factory, &factory);
        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::Payments, &Vec::<Payment>::new(&env));
        env.storage().instance().set(&DataKey::CollateralIds, &Vec::<u64>::new(&env));
        env.storage().instance().set(&DataKey::Tranches, &TrancheLedger::new(&env));
        env.storage().instance().set(&DataKey::Progress, &Progress::default());
        ttl::bump_instance(&env);

        env.events().publish(
            (symbol_short!("init"), config.beneficiary),
            (config.liquidity_provider, config.default_threshold),
        );
        Ok(())
    }

    // ========================================================================
    // Schedule
    // ========================================================================

    /// Append payments, each backed by one receivable pulled into custody.
    /// Returns the principal added.
    pub fn push_payments(
        env: Env,
        payments: Vec<Payment>,
        collateral_ids: Vec<u64>,
    ) -> Result<i128, Error> {
        let config = Self::config_internal(&env)?;
        config.liquidity_provider.require_auth();
        Self::require_state(&env, &[LoanState::Created])?;
        if payments.len() != collateral_ids.len() { return Err(Error::LengthMismatch); }

        let mut stored = Self::payments_internal(&env);
        let mut ids = Self::collateral_ids_internal(&env);
        let mut last_maturity = stored.last().map(|p| p.matured_at()).unwrap_or(0);
        let mut batch: Map<u64, bool> = Map::new(&env);
        let mut owners: Vec<Address> = Vec::new(&env);
        let mut principal: i128 = 0;
        let this = env.current_contract_address();
        let collateral = CollateralClient::new(&env, &config.collateral_asset);

        for (payment, id) in payments.iter().zip(collateral_ids.iter()) {
            if payment.principal <= 0 { return Err(Error::ZeroAmount); }
            if payment.is_funded() { return Err(Error::PaymentAlreadyFunded); }
            // Unfunded, so this is the maturity as if funded at time zero
            let maturity = payment.matured_at();
            if maturity < last_maturity { return Err(Error::UnorderedMaturity); }
            if payment.maturity_period == 0 { return Err(Error::PaymentAlreadyMatured); }
            if batch.contains_key(id) || Self::holds(&env, id) {
                return Err(Error::DuplicateCollateral);
            }
            let owner = match collateral.try_owner_of(&id) {
                Ok(Ok(owner)) => owner,
                _ => return Err(Error::CollateralNotFound),
            };

            owners.push_back(owner);
            batch.set(id, true);
            principal = principal.checked_add(payment.principal).ok_or(Error::Overflow)?;
            last_maturity = maturity;
            stored.push_back(payment);
            ids.push_back(id);
        }

        env.storage().instance().set(&DataKey::Payments, &stored);
        env.storage().instance().set(&DataKey::CollateralIds, &ids);
        for id in collateral_ids.iter() {
            env.storage().persistent().set(&DataKey::Held(id), &true);
            ttl::bump_persistent(&env, &DataKey::Held(id));
        }
        ttl::bump_instance(&env);

        for (id, owner) in collateral_ids.iter().zip(owners.iter()) {
            if owner != this {
                collateral.transfer_from(&this, &owner, &this, &id);
            }
        }

        env.events().publish((symbol_short!("payments"), this), (payments.len(), principal));
        Ok(principal)
    }

    pub fn push_tranches(
        env: Env,
        boundaries: Vec<u32>,
        recipients: Vec<Address>,
    ) -> Result<(), Error> {
        let config = Self::config_internal(&env)?;
        config.liquidity_provider.require_auth();
        Self::require_state(&env, &[LoanState::Created])?;
        if boundaries.len() != recipients.len() { return Err(Error::LengthMismatch); }

        let mut tranches = Self::tranches_internal(&env);
        for (boundary, recipient) in boundaries.iter().zip(recipients.iter()) {
            tranches.push(boundary, recipient).map_err(|_| Error::NonIncreasingTranche)?;
        }
        if tranches.last_boundary() > Self::payments_internal(&env).len() {
            return Err(Error::TranchesExceedPayments);
        }

        env.storage().instance().set(&DataKey::Tranches, &tranches);
        ttl::bump_instance(&env);
        env.events().publish(
            (symbol_short!("tranches"), env.current_contract_address()),
            (boundaries.len(), tranches.last_boundary()),
        );
        Ok(())
    }

    // ========================================================================
    // Funding
    // ========================================================================

    /// Fund up to `n` more payments, pulling their principal from `funder`
    /// to the beneficiary. Returns the principal moved.
    pub fn fund_n(env: Env, funder: Address, n: u32) -> Result<i128, Error> {
        let config = Self::config_internal(&env)?;
        funder.require_auth();
        Self::require_state(&env, &[LoanState::Created, LoanState::Funding])?;
        if n == 0 { return Err(Error::ZeroAmount); }

        let mut payments = Self::payments_internal(&env);
        let total = payments.len();
        let tranches = Self::tranches_internal(&env);
        if tranches.is_empty() || tranches.last_boundary() != total {
            return Err(Error::TranchesIncomplete);
        }

        let mut progress = Self::progress_internal(&env);
        let start = progress.funding_cursor;
        let end = start + core::cmp::min(n, total - start);
        let now = env.ledger().timestamp();

        let mut principal: i128 = 0;
        for i in start..end {
            let mut payment = payments.get_unchecked(i);
            payment.funded_at = now;
            principal = principal.checked_add(payment.principal).ok_or(Error::Overflow)?;
            payments.set(i, payment);
        }

        progress.funding_cursor = end;
        env.storage().instance().set(&DataKey::Payments, &payments);
        env.storage().instance().set(&DataKey::Progress, &progress);
        ttl::bump_instance(&env);
        Self::bump_held(&env, &Self::collateral_ids_internal(&env), progress.payment_cursor, total);

        let this = env.current_contract_address();
        token::Client::new(&env, &config.asset)
            .transfer_from(&this, &funder, &config.beneficiary, &principal);

        env.events().publish((symbol_short!("fund"), funder), (start, end, principal));
        Ok(principal)
    }

    /// Give collateral of unfunded payments back to the beneficiary. The
    /// first withdrawal cancels the loan.
    pub fn withdraw_payment_collateral(env: Env, start: u32, end: u32) -> Result<(), Error> {
        let config = Self::config_internal(&env)?;
        config.beneficiary.require_auth();
        let state = Self::require_state(&env, &[LoanState::Created, LoanState::Canceled])?;

        let ids = Self::collateral_ids_internal(&env);
        Self::require_range(start, end, ids.len())?;
        Self::require_held(&env, &ids, start, end)?;

        if state == LoanState::Created {
            let mut progress = Self::progress_internal(&env);
            progress.canceled = true;
            env.storage().instance().set(&DataKey::Progress, &progress);
        }
        Self::release_held(&env, &ids, start, end);
        ttl::bump_instance(&env);

        let this = env.current_contract_address();
        let collateral = CollateralClient::new(&env, &config.collateral_asset);
        for i in start..end {
            collateral.transfer(&this, &config.beneficiary, &ids.get_unchecked(i));
        }

        env.events().publish((symbol_short!("withdraw"), config.beneficiary), (start, end));
        Ok(())
    }

    // ========================================================================
    // Repayment
    // ========================================================================

    pub fn repay_current(env: Env, payer: Address, receiver: Option<Address>) -> Result<i128, Error> {
        Self::repay_n(env, payer, 0, receiver)
    }

    /// Repay the current payment and up to `n` more. Each tranche crossed
    /// receives principal plus interest of its own payments in one transfer.
    /// Released collateral goes to `receiver`, or is burned without one.
    /// Returns the total paid.
    pub fn repay_n(
        env: Env,
        payer: Address,
        n: u32,
        receiver: Option<Address>,
    ) -> Result<i128, Error> {
        let config = Self::config_internal(&env)?;
        payer.require_auth();
        Self::require_state(&env, &[LoanState::Ongoing, LoanState::Defaulted])?;

        let payments = Self::payments_internal(&env);
        let ids = Self::collateral_ids_internal(&env);
        let tranches = Self::tranches_internal(&env);
        let mut progress = Self::progress_internal(&env);

        // Unfunded payments of a loan defaulted mid-funding are never repaid
        let start = progress.payment_cursor;
        let end = start + core::cmp::min(n.saturating_add(1), progress.funding_cursor - start);
        if end == start { return Err(Error::InvalidState); }
        let now = env.ledger().timestamp();

        let mut transfers: Vec<(Address, i128)> = Vec::new(&env);
        let mut principal: i128 = 0;
        let mut paid: i128 = 0;
        let mut cursor = start;
        let mut index = tranches.active_index(start).ok_or(Error::TranchesIncomplete)?;
        while cursor < end {
            let tranche = tranches.at(index).ok_or(Error::TranchesIncomplete)?;
            let segment_end = core::cmp::min(end, tranche.boundary);
            let mut amount: i128 = 0;
            for i in cursor..segment_end {
                let payment = payments.get_unchecked(i);
                let due = payment.amount_due(now).ok_or(Error::Overflow)?;
                amount = amount.checked_add(due).ok_or(Error::Overflow)?;
                principal = principal.checked_add(payment.principal).ok_or(Error::Overflow)?;
            }
            if amount > 0 {
                transfers.push_back((tranche.recipient, amount));
                paid = paid.checked_add(amount).ok_or(Error::Overflow)?;
            }
            cursor = segment_end;
            index += 1;
        }

        progress.payment_cursor = end;
        env.storage().instance().set(&DataKey::Progress, &progress);
        Self::release_held(&env, &ids, start, end);
        Self::bump_held(&env, &ids, end, ids.len());
        ttl::bump_instance(&env);

        let this = env.current_contract_address();
        let asset = token::Client::new(&env, &config.asset);
        for (recipient, amount) in transfers.iter() {
            asset.transfer(&payer, &recipient, &amount);
        }
        let collateral = CollateralClient::new(&env, &config.collateral_asset);
        for i in start..end {
            let id = ids.get_unchecked(i);
            match &receiver {
                Some(to) => collateral.transfer(&this, to, &id),
                None => collateral.burn(&this, &id),
            }
        }
        LiquidityProviderClient::new(&env, &config.liquidity_provider).on_debit(&this, &principal);

        env.events().publish((symbol_short!("repay"), payer), (start, end, paid, principal));
        Ok(paid)
    }

    // ========================================================================
    // Default
    // ========================================================================

    /// Hand the collateral of a defaulted range over to `receiver`. Returns
    /// the funded principal written off; the liquidity provider settles its
    /// own books with it.
    pub fn repossess(env: Env, start: u32, end: u32, receiver: Address) -> Result<i128, Error> {
        let config = Self::config_internal(&env)?;
        config.liquidity_provider.require_auth();
        let state = Self::require_state(&env, &[LoanState::Defaulted, LoanState::Repossessed])?;

        let payments = Self::payments_internal(&env);
        let ids = Self::collateral_ids_internal(&env);
        let mut progress = Self::progress_internal(&env);
        Self::require_range(start, end, payments.len())?;
        if start < progress.payment_cursor { return Err(Error::InvalidRange); }
        Self::require_held(&env, &ids, start, end)?;

        let mut principal: i128 = 0;
        for i in start..end {
            let payment = payments.get_unchecked(i);
            if payment.is_funded() {
                principal = principal.checked_add(payment.principal).ok_or(Error::Overflow)?;
            }
        }

        if state == LoanState::Defaulted {
            progress.repossessed = true;
            env.storage().instance().set(&DataKey::Progress, &progress);
        }
        Self::release_held(&env, &ids, start, end);
        ttl::bump_instance(&env);

        let this = env.current_contract_address();
        let collateral = CollateralClient::new(&env, &config.collateral_asset);
        for i in start..end {
            collateral.transfer(&this, &receiver, &ids.get_unchecked(i));
        }

        env.events().publish((symbol_short!("reposs"), receiver), (start, end, principal));
        Ok(principal)
    }

    pub fn upgrade(env: Env, new_wasm_hash: BytesN<32>) -> Result<(), Error> {
        let config = Self::config_internal(&env)?;
        config.liquidity_provider.require_auth();
        env.deployer().update_current_contract_wasm(new_wasm_hash);
        Ok(())
    }

    // ========================================================================
    // View
    // ========================================================================

    pub fn state(env: Env) -> LoanState {
        Self::state_internal(&env)
    }

    pub fn config(env: Env) -> Result<LoanConfig, Error> {
        Self::config_internal(&env)
    }

    pub fn factory(env: Env) -> Option<Address> {
        env.storage().instance().get(&DataKey::Factory)
    }

    pub fn total_payments(env: Env) -> u32 {
        Self::payments_internal(&env).len()
    }

    pub fn payment(env: Env, index: u32) -> Result<Payment, Error> {
        Self::payments_internal(&env).get(index).ok_or(Error::InvalidRange)
    }

    pub fn payments(env: Env, start: u32, end: u32) -> Result<Vec<Payment>, Error> {
        let payments = Self::payments_internal(&env);
        Self::require_range(start, end, payments.len())?;
        Ok(payments.slice(start..end))
    }

    pub fn collateral_id(env: Env, index: u32) -> Result<u64, Error> {
        Self::collateral_ids_internal(&env).get(index).ok_or(Error::InvalidRange)
    }

    pub fn holds_collateral(env: Env, token_id: u64) -> bool {
        Self::holds(&env, token_id)
    }

    pub fn current_payment_index(env: Env) -> u32 {
        Self::progress_internal(&env).payment_cursor
    }

    pub fn current_funding_index(env: Env) -> u32 {
        Self::progress_internal(&env).funding_cursor
    }

    pub fn total_tranches(env: Env) -> u32 {
        Self::tranches_internal(&env).len()
    }

    pub fn tranche(env: Env, index: u32) -> Result<Tranche, Error> {
        Self::tranches_internal(&env).at(index).ok_or(Error::InvalidRange)
    }

    /// Tranche the next repayment is routed to.
    pub fn current_tranche(env: Env) -> Option<Tranche> {
        let tranches = Self::tranches_internal(&env);
        let cursor = Self::progress_internal(&env).payment_cursor;
        tranches.active_index(cursor).and_then(|i| tranches.at(i))
    }

    pub fn accrued_interest(env: Env, index: u32) -> Result<i128, Error> {
        let payment = Self::payments_internal(&env).get(index).ok_or(Error::InvalidRange)?;
        payment.accrued_interest(env.ledger().timestamp()).ok_or(Error::Overflow)
    }

    /// Principal plus interest owed right now on funded, unpaid payments.
    pub fn outstanding(env: Env) -> Result<i128, Error> {
        let payments = Self::payments_internal(&env);
        let progress = Self::progress_internal(&env);
        let now = env.ledger().timestamp();
        let mut total: i128 = 0;
        for i in progress.payment_cursor..progress.funding_cursor {
            let due = payments.get_unchecked(i).amount_due(now).ok_or(Error::Overflow)?;
            total = total.checked_add(due).ok_or(Error::Overflow)?;
        }
        Ok(total)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn state_internal(env: &Env) -> LoanState {
        let payments = Self::payments_internal(env);
        let progress = Self::progress_internal(env);
        let threshold = env.storage().instance()
            .get::<_, LoanConfig>(&DataKey::Config)
            .map(|c| c.default_threshold)
            .unwrap_or(0);
        let total = payments.len();

        if progress.repossessed {
            LoanState::Repossessed
        } else if total == 0 {
            LoanState::Created
        } else if progress.payment_cursor == total {
            LoanState::Paid
        } else if progress.canceled {
            LoanState::Canceled
        } else if Self::defaulted(env, &payments, progress.payment_cursor, threshold) {
            LoanState::Defaulted
        } else if progress.funding_cursor == 0 {
            LoanState::Created
        } else if progress.funding_cursor == total {
            LoanState::Ongoing
        } else {
            LoanState::Funding
        }
    }

    // Default needs the `threshold` payments starting at `current` to all be
    // past their own default timestamps.
    fn defaulted(env: &Env, payments: &Vec<Payment>, current: u32, threshold: u32) -> bool {
        if threshold == 0 { return false; }
        let window_end = match current.checked_add(threshold) {
            Some(end) if end <= payments.len() => end,
            _ => return false,
        };
        let now = env.ledger().timestamp();
        (current..window_end).all(|i| payments.get_unchecked(i).defaulted(now))
    }

    fn require_state(env: &Env, allowed: &[LoanState]) -> Result<LoanState, Error> {
        let state = Self::state_internal(env);
        if state.is_any(allowed) { Ok(state) } else { Err(Error::InvalidState) }
    }

    fn require_range(start: u32, end: u32, len: u32) -> Result<(), Error> {
        if start >= end || end > len { Err(Error::InvalidRange) } else { Ok(()) }
    }

    fn require_held(env: &Env, ids: &Vec<u64>, start: u32, end: u32) -> Result<(), Error> {
        for i in start..end {
            if !Self::holds(env, ids.get_unchecked(i)) { return Err(Error::CollateralNotHeld); }
        }
        Ok(())
    }

    fn release_held(env: &Env, ids: &Vec<u64>, start: u32, end: u32) {
        for i in start..end {
            env.storage().persistent().remove(&DataKey::Held(ids.get_unchecked(i)));
        }
    }

    fn bump_held(env: &Env, ids: &Vec<u64>, start: u32, end: u32) {
        for i in start..end {
            ttl::bump_persistent(env, &DataKey::Held(ids.get_unchecked(i)));
        }
    }

    fn holds(env: &Env, token_id: u64) -> bool {
        env.storage().persistent().has(&DataKey::Held(token_id))
    }

    fn config_internal(env: &Env) -> Result<LoanConfig, Error> {
        env.storage().instance().get(&DataKey::Config).ok_or(Error::NotInitialized)
    }

    fn payments_internal(env: &Env) -> Vec<Payment> {
        env.storage().instance().get(&DataKey::Payments).unwrap_or(Vec::new(env))
    }

    fn collateral_ids_internal(env: &Env) -> Vec<u64> {
        env.storage().instance().get(&DataKey::CollateralIds).unwrap_or(Vec::new(env))
    }

    fn tranches_internal(env: &Env) -> TrancheLedger {
        env.storage().instance().get(&DataKey::Tranches).unwrap_or(TrancheLedger::new(env))
    }

    fn progress_internal(env: &Env) -> Progress {
        env.storage().instance().get(&DataKey::Progress).unwrap_or_default()
    }
}
