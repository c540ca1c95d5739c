use soroban_sdk::{xdr::ToXdr, Address, Bytes, BytesN, Env};

/// Deployment salt of the loan `deployer` creates for `borrower`.
///
/// The same (deployer, borrower, salt) always lands on the same contract
/// address, so a borrower can approve collateral transfers to a loan before
/// it exists, and a repeated request is detected before anything is deployed.
pub fn loan_salt(env: &Env, deployer: &Address, borrower: &Address, salt: &BytesN<32>) -> BytesN<32> {
    let mut payload = Bytes::new(env);
    payload.append(&deployer.clone().to_xdr(env));
    payload.append(&borrower.clone().to_xdr(env));
    let salt: Bytes = salt.clone().into();
    payload.append(&salt);
    env.crypto().sha256(&payload).to_bytes()
}
