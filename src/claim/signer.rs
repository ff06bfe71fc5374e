use crate::claim::address::Address;
use crate::claim::digest::{self, Hash256};
use crate::claim::error::KeyError;
use crate::token::SessionToken;
use alloy_primitives::U256;
use k256::PublicKey;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use std::fmt;
use zeroize::Zeroizing;

pub const SIGNATURE_BYTES: usize = 65;
pub const SECRET_KEY_BYTES: usize = 32;

/// Recoverable ECDSA signature with `v` normalized into {27, 28}
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    /// `r || s || v`
    pub fn to_bytes(&self) -> [u8; SIGNATURE_BYTES] {
        let mut out = [0u8; SIGNATURE_BYTES];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SIGNATURE_BYTES {
            return Err(KeyError::Signing(format!(
                "signature must be {SIGNATURE_BYTES} bytes, got {}",
                bytes.len()
            )));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, v: bytes[64] })
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// A claim ready to hand to the redeeming contract
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SignedClaim {
    pub recipient: Address,
    pub token: SessionToken,
    pub clicks: u64,
    pub amount: U256,
    pub contract: Address,
    pub digest: Hash256,
    pub signature: Signature,
}

impl SignedClaim {
    pub fn digest_hex(&self) -> String {
        format!("0x{}", hex::encode(self.digest))
    }
}

/// The service's single long-lived signing key.
///
/// Signing is RFC 6979 deterministic, so the same claim always yields the
/// same signature.
#[derive(Clone)]
pub struct ClaimSigner {
    key: SigningKey,
    address: Address,
}

impl ClaimSigner {
    /// Exactly 32 big-endian bytes
    pub fn from_bytes(secret: &[u8]) -> Result<Self, KeyError> {
        if secret.len() != SECRET_KEY_BYTES {
            return Err(KeyError::InvalidKey);
        }
        let key = SigningKey::from_slice(secret).map_err(|_| KeyError::InvalidKey)?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    /// Parse a hex private key, `0x` prefix optional
    pub fn from_hex(secret: &str) -> Result<Self, KeyError> {
        let digits = secret.trim();
        let digits = digits.strip_prefix("0x").unwrap_or(digits);
        let bytes = Zeroizing::new(hex::decode(digits).map_err(|_| KeyError::InvalidKey)?);
        Self::from_bytes(&bytes)
    }

    /// Fresh random key, used when creating a new keystore
    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::thread_rng());
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Raw key material. Callers must zeroize the result.
    pub(crate) fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key.to_bytes().into())
    }

    /// Sign an already prefixed 32-byte hash
    pub fn sign_hash(&self, prefixed: &Hash256) -> Result<Signature, KeyError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prefixed.as_slice())
            .map_err(|error| KeyError::Signing(error.to_string()))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(Signature {
            r,
            s,
            v: 27 + recovery_id.to_byte(),
        })
    }

    /// Build and sign the claim for `clicks` accumulated on `token`
    pub fn sign_claim(
        &self,
        recipient: Address,
        token: SessionToken,
        clicks: u64,
        contract: Address,
    ) -> Result<SignedClaim, KeyError> {
        let amount = digest::amount_for_clicks(clicks);
        let claim_digest = digest::digest(&recipient, &token, amount, &contract);
        let signature = self.sign_hash(&digest::prefix(&claim_digest))?;

        Ok(SignedClaim {
            recipient,
            token,
            clicks,
            amount,
            contract,
            digest: claim_digest,
            signature,
        })
    }
}

impl fmt::Debug for ClaimSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn address_of(key: &VerifyingKey) -> Address {
    let point = PublicKey::from(key).to_encoded_point(false);
    // Skip the 0x04 uncompressed tag
    Address::from_raw_public_key(&point.as_bytes()[1..])
}

/// Address whose key produced `signature` over `prefixed`
pub fn recover(prefixed: &Hash256, signature: &Signature) -> Result<Address, KeyError> {
    let recovery_byte = match signature.v {
        27 | 28 => signature.v - 27,
        0 | 1 => signature.v,
        v => return Err(KeyError::Signing(format!("invalid recovery id {v}"))),
    };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| KeyError::Signing("invalid recovery id".to_string()))?;

    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);
    let ecdsa_signature =
        EcdsaSignature::from_slice(&rs).map_err(|error| KeyError::Signing(error.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(prefixed.as_slice(), &ecdsa_signature, recovery_id)
        .map_err(|error| KeyError::Signing(error.to_string()))?;
    Ok(address_of(&key))
}
