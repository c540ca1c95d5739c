use soroban_sdk::{Env, IntoVal, Val};

pub const DAY_IN_LEDGERS: u32 = 17280;

// Loans sit untouched for a whole maturity period, so everything they and
// the vault keep has to outlive the longest gap between repayments.
pub const BUMP_AMOUNT: u32 = 120 * DAY_IN_LEDGERS;
pub const LIFETIME_THRESHOLD: u32 = BUMP_AMOUNT - 7 * DAY_IN_LEDGERS;

/// Allowances granted to loans expire this many ledgers after they are set.
pub const ALLOWANCE_LEDGERS: u32 = 30 * DAY_IN_LEDGERS;

pub fn bump_instance(env: &Env) {
    env.storage().instance().extend_ttl(LIFETIME_THRESHOLD, BUMP_AMOUNT);
}

/// Extend a persistent entry if it exists.
pub fn bump_persistent<K>(env: &Env, key: &K)
where
    K: IntoVal<Env, Val>,
{
    if env.storage().persistent().has(key) {
        env.storage().persistent().extend_ttl(key, LIFETIME_THRESHOLD, BUMP_AMOUNT);
    }
}
