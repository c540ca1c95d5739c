use soroban_sdk::contracttype;

pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Rates carry four decimal digits: 1_200 is 12.00% a year.
pub const RATE_SCALE: u64 = 10_000;

/// A single scheduled payment of a loan.
///
/// Everything but `funded_at` is fixed when the payment is pushed. A zero
/// `funded_at` marks a payment that has not been funded yet; such a payment
/// never matures, never defaults and accrues no interest.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Payment {
    pub principal: i128,
    pub funded_at: u64,
    /// Seconds after funding until the principal is due.
    pub maturity_period: u64,
    /// Seconds after maturity until the payment is in default.
    pub grace_period: u64,
    pub interest_rate: u32,
    /// Applies only to the time elapsed after maturity.
    pub premium_rate: u32,
}

impl Payment {
    pub fn is_funded(&self) -> bool {
        self.funded_at != 0
    }

    pub fn matured_at(&self) -> u64 {
        self.funded_at.saturating_add(self.maturity_period)
    }

    pub fn matured(&self, at: u64) -> bool {
        self.is_funded() && self.matured_at() <= at
    }

    pub fn defaulted_at(&self) -> u64 {
        self.matured_at().saturating_add(self.grace_period)
    }

    pub fn defaulted(&self, at: u64) -> bool {
        self.is_funded() && self.defaulted_at() <= at
    }

    /// Interest at the regular rate, capped at the maturity timestamp.
    pub fn regular_accrued_interest(&self, at: u64) -> Option<i128> {
        if !self.is_funded() || at < self.funded_at {
            return Some(0);
        }
        let until = core::cmp::min(at, self.matured_at());
        accrue(self.principal, self.interest_rate, until - self.funded_at)
    }

    /// Interest at the premium rate for the time elapsed past maturity.
    pub fn premium_accrued_interest(&self, at: u64) -> Option<i128> {
        if !self.matured(at) {
            return Some(0);
        }
        accrue(self.principal, self.premium_rate, at - self.matured_at())
    }

    pub fn accrued_interest(&self, at: u64) -> Option<i128> {
        self.regular_accrued_interest(at)?
            .checked_add(self.premium_accrued_interest(at)?)
    }

    /// Principal plus everything accrued at `at`.
    pub fn amount_due(&self, at: u64) -> Option<i128> {
        self.principal.checked_add(self.accrued_interest(at)?)
    }
}

// principal * rate * elapsed / (SECONDS_PER_YEAR * RATE_SCALE), floored
fn accrue(principal: i128, rate: u32, elapsed: u64) -> Option<i128> {
    if principal <= 0 || rate == 0 || elapsed == 0 {
        return Some(0);
    }
    let scaled = (principal as u128).checked_mul(rate as u128)?;
    let denominator = (SECONDS_PER_YEAR as u128) * (RATE_SCALE as u128);
    let interest = mul_div(scaled, elapsed as u128, denominator)?;
    i128::try_from(interest).ok()
}

/// `a * b / denominator` rounded down, without truncating the product first.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    let quotient = a / denominator;
    let remainder = a % denominator;
    quotient
        .checked_mul(b)?
        .checked_add(remainder.checked_mul(b)? / denominator)
}

#[cfg(test)]
mod test {
    use super::*;

    const DAY: u64 = 24 * 60 * 60;

    fn funded(principal: i128, funded_at: u64) -> Payment {
        Payment {
            principal,
            funded_at,
            maturity_period: 30 * DAY,
            grace_period: 10 * DAY,
            interest_rate: 1_200,
            premium_rate: 2_400,
        }
    }

    #[test]
    fn test_timestamps() {
        let p = funded(100, 1_000);
        assert_eq!(p.matured_at(), 1_000 + 30 * DAY);
        assert_eq!(p.defaulted_at(), 1_000 + 40 * DAY);
        assert!(!p.matured(1_000 + 30 * DAY - 1));
        assert!(p.matured(1_000 + 30 * DAY));
        assert!(!p.defaulted(1_000 + 40 * DAY - 1));
        assert!(p.defaulted(1_000 + 40 * DAY));
    }

    #[test]
    fn test_unfunded_never_matures() {
        let p = funded(100, 0);
        assert!(!p.matured(u64::MAX));
        assert!(!p.defaulted(u64::MAX));
        assert_eq!(p.accrued_interest(u64::MAX), Some(0));
    }

    #[test]
    fn test_regular_interest_halfway() {
        let p = funded(1_000_000_000, 1_000);
        let at = 1_000 + 15 * DAY;
        // 1e9 * 1200 * 1_296_000 / (31_536_000 * 10_000)
        assert_eq!(p.regular_accrued_interest(at), Some(4_931_506));
        assert_eq!(p.premium_accrued_interest(at), Some(0));
    }

    #[test]
    fn test_regular_interest_capped_at_maturity() {
        let p = funded(1_000_000_000, 1_000);
        let at_maturity = p.regular_accrued_interest(p.matured_at());
        let long_after = p.regular_accrued_interest(p.matured_at() + 365 * DAY);
        assert_eq!(at_maturity, Some(9_863_013));
        assert_eq!(at_maturity, long_after);
    }

    #[test]
    fn test_premium_after_maturity() {
        let p = funded(1_000_000_000, 1_000);
        let at = p.matured_at() + 5 * DAY;
        // 1e9 * 2400 * 432_000 / (31_536_000 * 10_000)
        assert_eq!(p.premium_accrued_interest(at), Some(3_287_671));
        assert_eq!(p.accrued_interest(at), Some(9_863_013 + 3_287_671));
        assert_eq!(p.amount_due(at), Some(1_000_000_000 + 9_863_013 + 3_287_671));
    }

    #[test]
    fn test_before_funding_accrues_nothing() {
        let p = funded(1_000_000_000, 5_000);
        assert_eq!(p.regular_accrued_interest(4_999), Some(0));
    }

    #[test]
    fn test_small_amounts_floor_to_zero() {
        let p = funded(100, 1_000);
        // 100 * 1200 * 60 / 315_360_000_000 < 1
        assert_eq!(p.accrued_interest(1_060), Some(0));
    }

    #[test]
    fn test_large_principal_does_not_truncate() {
        let p = funded(i128::MAX / 10_000, 1_000);
        assert!(p.accrued_interest(1_000 + 30 * DAY).is_some());
        let q = funded(i128::MAX, 1_000);
        assert_eq!(q.accrued_interest(1_000 + 30 * DAY), None);
    }

    #[test]
    fn test_mul_div() {
        assert_eq!(mul_div(10, 10, 3), Some(33));
        assert_eq!(mul_div(u128::MAX, 1, 1), Some(u128::MAX));
        assert_eq!(mul_div(u128::MAX, 2, 1), None);
        assert_eq!(mul_div(1, 1, 0), None);
    }
}
