#![no_std]

use soroban_sdk::{
    contract, contractimpl, contracttype, contracterror, symbol_short,
    Address, BytesN, Env, String, Vec,
};

// ============================================================================
// Data Types
// ============================================================================

/// A tokenized receivable. The verifier endorses the document behind
/// `document_hash` off-chain; here the hash only has to be unique.
#[contracttype]
#[derive(Clone, Debug)]
pub struct Receivable {
    pub id: u64,
    pub owner: Address,
    pub original_creditor: Address,
    pub document_hash: BytesN<32>,
    pub face_value: i128,
    pub currency: Address,
    pub issuance_date: u64,
    pub maturity_date: u64,
    pub proof_hash: BytesN<32>,
    pub metadata_uri: String,
}

#[contracttype]
pub enum DataKey {
    Admin,
    Verifier,
    NextId,
    Receivable(u64),
    Approved(u64),
    Document(BytesN<32>),
    OwnerReceivables(Address),
    TotalMinted,
    TotalActive,
    Paused,
}

const DAY_IN_LEDGERS: u32 = 17280;
const BUMP_AMOUNT: u32 = 120 * DAY_IN_LEDGERS;
const LIFETIME_THRESHOLD: u32 = BUMP_AMOUNT - 7 * DAY_IN_LEDGERS;

// Codes start at 201 so they stay distinct when surfaced through a loan.
#[contracterror]
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u32)]
pub enum Error {
    NotAuthorized = 201,
    ReceivableNotFound = 202,
    InvalidMaturityDate = 203,
    InvalidFaceValue = 204,
    AlreadyInitialized = 205,
    ContractPaused = 206,
    NotOwner = 207,
    NotApproved = 208,
    DuplicateDocument = 209,
}

#[contract]
pub struct ReceivableTokenContract;

#[contractimpl]
impl ReceivableTokenContract {

    pub fn initialize(
        env: Env,
        admin: Address,
        verifier: Address,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Verifier, &verifier);
        env.storage().instance().set(&DataKey::NextId, &1u64);
        env.storage().instance().set(&DataKey::TotalMinted, &0u64);
        env.storage().instance().set(&DataKey::TotalActive, &0u64);
        env.storage().instance().set(&DataKey::Paused, &false);
        Self::bump_instance(&env);
        Ok(())
    }

    /// Mint a receivable endorsed by the verifier authority
    pub fn mint(
        env: Env,
        creditor: Address,
        document_hash: BytesN<32>,
        face_value: i128,
        currency: Address,
        maturity_date: u64,
        proof_hash: BytesN<32>,
        metadata_uri: String,
    ) -> Result<u64, Error> {
        Self::require_not_paused(&env)?;

        let verifier: Address = env.storage().instance().get(&DataKey::Verifier).ok_or(Error::NotAuthorized)?;
        verifier.require_auth();
        creditor.require_auth();

        if face_value <= 0 {
            return Err(Error::InvalidFaceValue);
        }
        if maturity_date <= env.ledger().timestamp() {
            return Err(Error::InvalidMaturityDate);
        }
        if env.storage().persistent().has(&DataKey::Document(document_hash.clone())) {
            return Err(Error::DuplicateDocument);
        }

        let id: u64 = env.storage().instance().get(&DataKey::NextId).unwrap_or(1);
        env.storage().instance().set(&DataKey::NextId, &(id + 1));

        let receivable = Receivable {
            id,
            owner: creditor.clone(),
            original_creditor: creditor.clone(),
            document_hash: document_hash.clone(),
            face_value,
            currency,
            issuance_date: env.ledger().timestamp(),
            maturity_date,
            proof_hash,
            metadata_uri,
        };

        env.storage().persistent().set(&DataKey::Receivable(id), &receivable);
        env.storage().persistent().set(&DataKey::Document(document_hash.clone()), &id);
        Self::bump(&env, &DataKey::Receivable(id));
        Self::bump(&env, &DataKey::Document(document_hash));

        let mut list: Vec<u64> = env.storage().persistent()
            .get(&DataKey::OwnerReceivables(creditor.clone()))
            .unwrap_or(Vec::new(&env));
        list.push_back(id);
        env.storage().persistent().set(&DataKey::OwnerReceivables(creditor.clone()), &list);
        Self::bump(&env, &DataKey::OwnerReceivables(creditor.clone()));

        let total: u64 = env.storage().instance().get(&DataKey::TotalMinted).unwrap_or(0);
        env.storage().instance().set(&DataKey::TotalMinted, &(total + 1));
        let active: u64 = env.storage().instance().get(&DataKey::TotalActive).unwrap_or(0);
        env.storage().instance().set(&DataKey::TotalActive, &(active + 1));
        Self::bump_instance(&env);

        env.events().publish((symbol_short!("mint"), creditor), (id, face_value));
        Ok(id)
    }

    pub fn owner_of(env: Env, token_id: u64) -> Result<Address, Error> {
        Ok(Self::get_internal(&env, token_id)?.owner)
    }

    /// Let `spender` move one receivable on the owner's behalf
    pub fn approve(env: Env, owner: Address, spender: Address, token_id: u64) -> Result<(), Error> {
        owner.require_auth();
        let recv = Self::get_internal(&env, token_id)?;
        if recv.owner != owner { return Err(Error::NotOwner); }
        env.storage().persistent().set(&DataKey::Approved(token_id), &spender);
        Self::bump(&env, &DataKey::Approved(token_id));
        env.events().publish((symbol_short!("approve"), owner), (spender, token_id));
        Ok(())
    }

    pub fn get_approved(env: Env, token_id: u64) -> Option<Address> {
        env.storage().persistent().get(&DataKey::Approved(token_id))
    }

    pub fn transfer(env: Env, from: Address, to: Address, token_id: u64) -> Result<(), Error> {
        Self::require_not_paused(&env)?;
        from.require_auth();

        let recv = Self::get_internal(&env, token_id)?;
        if recv.owner != from { return Err(Error::NotOwner); }
        Self::move_internal(&env, recv, &to);
        env.events().publish((symbol_short!("transfer"), from, to), token_id);
        Ok(())
    }

    pub fn transfer_from(
        env: Env,
        spender: Address,
        from: Address,
        to: Address,
        token_id: u64,
    ) -> Result<(), Error> {
        Self::require_not_paused(&env)?;
        spender.require_auth();

        let recv = Self::get_internal(&env, token_id)?;
        if recv.owner != from { return Err(Error::NotOwner); }
        if spender != from {
            let approved: Option<Address> = env.storage().persistent().get(&DataKey::Approved(token_id));
            if approved != Some(spender) { return Err(Error::NotApproved); }
        }
        Self::move_internal(&env, recv, &to);
        env.events().publish((symbol_short!("transfer"), from, to), token_id);
        Ok(())
    }

    /// Destroy a receivable. Its document hash stays taken.
    pub fn burn(env: Env, from: Address, token_id: u64) -> Result<(), Error> {
        from.require_auth();

        let recv = Self::get_internal(&env, token_id)?;
        if recv.owner != from { return Err(Error::NotOwner); }

        Self::remove_from_owner(&env, &from, token_id);
        env.storage().persistent().remove(&DataKey::Receivable(token_id));
        env.storage().persistent().remove(&DataKey::Approved(token_id));

        let active: u64 = env.storage().instance().get(&DataKey::TotalActive).unwrap_or(0);
        env.storage().instance().set(&DataKey::TotalActive, &active.saturating_sub(1));

        env.events().publish((symbol_short!("burn"), from), token_id);
        Ok(())
    }

    // ---- View ----
    pub fn get_recv(env: Env, token_id: u64) -> Result<Receivable, Error> {
        Self::get_internal(&env, token_id)
    }

    pub fn get_owner(env: Env, owner: Address) -> Vec<u64> {
        env.storage().persistent()
            .get(&DataKey::OwnerReceivables(owner))
            .unwrap_or(Vec::new(&env))
    }

    pub fn total_minted(env: Env) -> u64 {
        env.storage().instance().get(&DataKey::TotalMinted).unwrap_or(0)
    }

    pub fn total_active(env: Env) -> u64 {
        env.storage().instance().get(&DataKey::TotalActive).unwrap_or(0)
    }

    // ---- Admin ----
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

    // ---- Internal ----
    fn get_internal(env: &Env, id: u64) -> Result<Receivable, Error> {
        env.storage().persistent().get(&DataKey::Receivable(id)).ok_or(Error::ReceivableNotFound)
    }

    fn move_internal(env: &Env, mut recv: Receivable, to: &Address) {
        Self::remove_from_owner(env, &recv.owner, recv.id);

        let mut to_list: Vec<u64> = env.storage().persistent()
            .get(&DataKey::OwnerReceivables(to.clone()))
            .unwrap_or(Vec::new(env));
        to_list.push_back(recv.id);
        env.storage().persistent().set(&DataKey::OwnerReceivables(to.clone()), &to_list);
        Self::bump(env, &DataKey::OwnerReceivables(to.clone()));

        env.storage().persistent().remove(&DataKey::Approved(recv.id));
        recv.owner = to.clone();
        env.storage().persistent().set(&DataKey::Receivable(recv.id), &recv);
        Self::bump(env, &DataKey::Receivable(recv.id));
        Self::bump_instance(env);
    }

    fn remove_from_owner(env: &Env, owner: &Address, id: u64) {
        let list: Vec<u64> = env.storage().persistent()
            .get(&DataKey::OwnerReceivables(owner.clone()))
            .unwrap_or(Vec::new(env));
        let mut kept = Vec::new(env);
        for rid in list.iter() {
            if rid != id { kept.push_back(rid); }
        }
        env.storage().persistent().set(&DataKey::OwnerReceivables(owner.clone()), &kept);
    }

    fn bump(env: &Env, key: &DataKey) {
        env.storage().persistent().extend_ttl(key, LIFETIME_THRESHOLD, BUMP_AMOUNT);
    }

    fn bump_instance(env: &Env) {
        env.storage().instance().extend_ttl(LIFETIME_THRESHOLD, BUMP_AMOUNT);
    }

    fn require_admin(env: &Env) -> Result<(), Error> {
        let admin: Address = env.storage().instance().get(&DataKey::Admin).ok_or(Error::NotAuthorized)?;
        admin.require_auth();
        Ok(())
    }

    fn require_not_paused(env: &Env) -> Result<(), Error> {
        let paused: bool = env.storage().instance().get(&DataKey::Paused).unwrap_or(false);
        if paused { Err(Error::ContractPaused) } else { Ok(()) }
    }
}
