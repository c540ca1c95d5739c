#![no_std]

use loan_core::{loan_salt, ttl, LoanClient, LoanConfig};
use soroban_sdk::{
    contract, contractimpl, contracttype, contracterror, symbol_short, Address, BytesN, Env,
};

#[contracttype]
pub enum DataKey {
    Admin,
    LoanWasm,
    Deployed(Address),
    TotalDeployed,
}

#[contracterror]
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 301,
    NotInitialized = 302,
    WasmNotSet = 303,
}

/// Deploys loans at addresses callers can compute in advance.
#[contract]
pub struct LoanFactoryContract;

#[contractimpl]
impl LoanFactoryContract {

    pub fn initialize(env: Env, admin: Address, loan_wasm: BytesN<32>) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();
        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::LoanWasm, &loan_wasm);
        env.storage().instance().set(&DataKey::TotalDeployed, &0u64);
        ttl::bump_instance(&env);
        Ok(())
    }

    /// Swap the wasm new loans are deployed from. Existing loans are untouched.
    pub fn set_loan_wasm(env: Env, loan_wasm: BytesN<32>) -> Result<(), Error> {
        let admin: Address = env.storage().instance().get(&DataKey::Admin).ok_or(Error::NotInitialized)?;
        admin.require_auth();
        env.storage().instance().set(&DataKey::LoanWasm, &loan_wasm);
        ttl::bump_instance(&env);
        env.events().publish((symbol_short!("wasm"), admin), loan_wasm);
        Ok(())
    }

    pub fn predict_address(env: Env, deployer: Address, borrower: Address, salt: BytesN<32>) -> Address {
        env.deployer()
            .with_current_contract(loan_salt(&env, &deployer, &borrower, &salt))
            .deployed_address()
    }

    /// Deploy the loan for (deployer, borrower, salt) unless this factory
    /// already did, then initialize it with `config`.
    pub fn deploy(
        env: Env,
        deployer: Address,
        borrower: Address,
        salt: BytesN<32>,
        config: LoanConfig,
    ) -> Result<Address, Error> {
        deployer.require_auth();

        let derived = loan_salt(&env, &deployer, &borrower, &salt);
        let predicted = env.deployer().with_current_contract(derived.clone()).deployed_address();

        let loan = if Self::is_deployed(env.clone(), predicted.clone()) {
            predicted
        } else {
            let wasm: BytesN<32> = env.storage().instance().get(&DataKey::LoanWasm).ok_or(Error::WasmNotSet)?;
            let loan = env.deployer().with_current_contract(derived).deploy_v2(wasm, ());
            env.storage().persistent().set(&DataKey::Deployed(loan.clone()), &true);
            ttl::bump_persistent(&env, &DataKey::Deployed(loan.clone()));
            let total: u64 = env.storage().instance().get(&DataKey::TotalDeployed).unwrap_or(0);
            env.storage().instance().set(&DataKey::TotalDeployed, &(total + 1));
            loan
        };
        ttl::bump_instance(&env);

        LoanClient::new(&env, &loan).initialize(&env.current_contract_address(), &config);

        env.events().publish((symbol_short!("deploy"), borrower), (deployer, loan.clone()));
        Ok(loan)
    }

    pub fn is_deployed(env: Env, loan: Address) -> bool {
        env.storage().persistent().has(&DataKey::Deployed(loan))
    }

    pub fn total_deployed(env: Env) -> u64 {
        env.storage().instance().get(&DataKey::TotalDeployed).unwrap_or(0)
    }

    pub fn loan_wasm(env: Env) -> Option<BytesN<32>> {
        env.storage().instance().get(&DataKey::LoanWasm)
    }
}

// ============================================================================
// Tests
// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use loan_contract::{Error as LoanError, LoanContract, LoanContractClient};
    use soroban_sdk::testutils::Address as _;
    use soroban_sdk::InvokeError;

    fn setup() -> (Env, LoanFactoryContractClient<'static>, Address) {
        let env = Env::default();
        env.mock_all_auths();

        let contract_id = env.register(LoanFactoryContract, ());
        let client = LoanFactoryContractClient::new(&env, &contract_id);
        let admin = Address::generate(&env);
        client.initialize(&admin, &BytesN::from_array(&env, &[7u8; 32]));

        let client = unsafe { core::mem::transmute(client) };
        (env, client, admin)
    }

    #[test]
    fn test_initialize_once() {
        let (env, client, admin) = setup();
        assert_eq!(client.loan_wasm(), Some(BytesN::from_array(&env, &[7u8; 32])));
        assert_eq!(client.total_deployed(), 0);
        assert_eq!(
            client.try_initialize(&admin, &BytesN::from_array(&env, &[8u8; 32])),
            Err(Ok(Error::AlreadyInitialized))
        );
    }

    #[test]
    fn test_set_loan_wasm() {
        let (env, client, _) = setup();
        client.set_loan_wasm(&BytesN::from_array(&env, &[9u8; 32]));
        assert_eq!(client.loan_wasm(), Some(BytesN::from_array(&env, &[9u8; 32])));
    }

    #[test]
    fn test_predicted_address_is_deterministic() {
        let (env, client, _) = setup();
        let vault = Address::generate(&env);
        let borrower = Address::generate(&env);
        let salt = BytesN::from_array(&env, &[1u8; 32]);

        let first = client.predict_address(&vault, &borrower, &salt);
        assert_eq!(first, client.predict_address(&vault, &borrower, &salt));
        assert!(!client.is_deployed(&first));
    }

    #[test]
    fn test_predicted_addresses_differ_per_request() {
        let (env, client, _) = setup();
        let vault = Address::generate(&env);
        let alice = Address::generate(&env);
        let bob = Address::generate(&env);
        let one = BytesN::from_array(&env, &[1u8; 32]);
        let two = BytesN::from_array(&env, &[2u8; 32]);

        let base = client.predict_address(&vault, &alice, &one);
        assert_ne!(base, client.predict_address(&vault, &alice, &two));
        assert_ne!(base, client.predict_address(&vault, &bob, &one));
        assert_ne!(base, client.predict_address(&Address::generate(&env), &alice, &one));
    }

    #[test]
    fn test_deploy_initializes_already_deployed_loan() {
        let (env, client, _) = setup();
        let vault = Address::generate(&env);
        let borrower = Address::generate(&env);
        let salt = BytesN::from_array(&env, &[3u8; 32]);
        let predicted = client.predict_address(&vault, &borrower, &salt);

        // Stand in for a previous deploy at the predicted address
        env.register_at(&predicted, LoanContract, ());
        env.as_contract(&client.address, || {
            env.storage().persistent().set(&DataKey::Deployed(predicted.clone()), &true);
        });

        let config = LoanConfig {
            liquidity_provider: vault.clone(),
            asset: Address::generate(&env),
            collateral_asset: Address::generate(&env),
            beneficiary: borrower.clone(),
            default_threshold: 2,
        };
        assert_eq!(client.deploy(&vault, &borrower, &salt, &config), predicted);
        assert!(client.is_deployed(&predicted));
        assert_eq!(client.total_deployed(), 0);

        let loan = LoanContractClient::new(&env, &predicted);
        assert_eq!(loan.factory(), Some(client.address.clone()));
        assert_eq!(loan.config(), config);

        assert_eq!(
            client.try_deploy(&vault, &borrower, &salt, &config),
            Err(Err(InvokeError::Contract(LoanError::AlreadyInitialized as u32)))
        );
    }
}
