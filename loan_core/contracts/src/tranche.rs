use soroban_sdk::{contracttype, Address, Env, Vec};

/// Payments below `boundary` (and at or above the previous tranche's
/// boundary) pay out to `recipient`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tranche {
    pub boundary: u32,
    pub recipient: Address,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrancheError {
    NonIncreasingBoundary,
}

/// Append-only list of tranches ordered by strictly increasing boundary.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrancheLedger {
    pub entries: Vec<Tranche>,
}

impl TrancheLedger {
    pub fn new(env: &Env) -> Self {
        Self { entries: Vec::new(env) }
    }

    pub fn len(&self) -> u32 {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Zero while no tranche has been pushed.
    pub fn last_boundary(&self) -> u32 {
        self.entries.last().map(|t| t.boundary).unwrap_or(0)
    }

    pub fn push(&mut self, boundary: u32, recipient: Address) -> Result<(), TrancheError> {
        if boundary <= self.last_boundary() {
            return Err(TrancheError::NonIncreasingBoundary);
        }
        self.entries.push_back(Tranche { boundary, recipient });
        Ok(())
    }

    pub fn at(&self, index: u32) -> Option<Tranche> {
        self.entries.get(index)
    }

    /// Index of the tranche owning `payment_index`: the first one whose
    /// boundary is above it.
    pub fn active_index(&self, payment_index: u32) -> Option<u32> {
        let (mut low, mut high) = (0u32, self.entries.len());
        while low < high {
            let mid = low + (high - low) / 2;
            if self.entries.get_unchecked(mid).boundary > payment_index {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        if low < self.entries.len() {
            Some(low)
        } else {
            None
        }
    }
}
