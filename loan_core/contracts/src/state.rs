use soroban_sdk::contracttype;

/// Lifecycle state of a loan. Never stored: the loan derives it from its
/// cursors, flags and payment timestamps.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoanState {
    Created = 0,
    Funding = 1,
    Ongoing = 2,
    Defaulted = 3,
    Paid = 4,
    Canceled = 5,
    Repossessed = 6,
}

impl LoanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoanState::Paid | LoanState::Canceled | LoanState::Repossessed)
    }

    pub fn is_any(self, allowed: &[LoanState]) -> bool {
        allowed.contains(&self)
    }
}
