use crate::claim::address::Address;
use crate::token::SessionToken;
use alloy_primitives::{B256, U256, eip191_hash_message};

pub use alloy_primitives::keccak256;

pub type Hash256 = B256;

/// Token base units per click (18 decimals)
pub const UNITS_PER_CLICK: u128 = 1_000_000_000_000_000_000;

/// Length of the packed claim encoding: address + bytes32 + uint256 + address
pub const PACKED_CLAIM_LEN: usize = 20 + 32 + 32 + 20;

/// `clicks * 10^18` as a `uint256`
pub fn amount_for_clicks(clicks: u64) -> U256 {
    U256::from(clicks) * U256::from(UNITS_PER_CLICK)
}

/// Tightly packed `(address recipient, bytes32 uid, uint256 amount, address contract)`.
///
/// The field order and widths are what the token contract hashes in
/// `hashClaim`; changing either produces signatures it cannot verify.
pub fn encode_packed(
    recipient: &Address,
    token: &SessionToken,
    amount: U256,
    contract: &Address,
) -> [u8; PACKED_CLAIM_LEN] {
    let mut out = [0u8; PACKED_CLAIM_LEN];
    out[0..20].copy_from_slice(recipient.as_slice());
    out[20..52].copy_from_slice(token.as_bytes());
    out[52..84].copy_from_slice(&amount.to_be_bytes::<32>());
    out[84..104].copy_from_slice(contract.as_slice());
    out
}

/// Claim digest over the packed encoding
pub fn digest(recipient: &Address, token: &SessionToken, amount: U256, contract: &Address) -> Hash256 {
    keccak256(encode_packed(recipient, token, amount, contract))
}

/// Hash of `"\x19Ethereum Signed Message:\n32" || hash`, the value actually signed
pub fn prefix(hash: &Hash256) -> Hash256 {
    eip191_hash_message(hash)
}
