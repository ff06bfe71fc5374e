use rand::RngCore;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of random bytes in a session token
pub const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error, Eq, PartialEq)]
#[error("Invalid session token")]
pub struct InvalidToken;

/// Opaque 32-byte identifier that accumulates clicks for one eventual claim.
///
/// Accepted on input as 64 hex characters with an optional `0x` prefix,
/// always rendered as 64 lowercase hex characters without prefix.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SessionToken([u8; TOKEN_BYTES]);

impl SessionToken {
    /// Mint a fresh token from the thread-local CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; TOKEN_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Whether `s` is a well-formed token: 64 hex digits after an optional `0x`
pub fn is_valid_token(s: &str) -> bool {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    digits.len() == TOKEN_BYTES * 2 && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

impl FromStr for SessionToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_valid_token(s) {
            return Err(InvalidToken);
        }

        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; TOKEN_BYTES];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| InvalidToken)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Tokens end up in logs; keep the debug form identical to the wire form.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self.to_hex())
    }
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
