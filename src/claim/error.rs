use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum AddressError {
    #[error("Address must be 40 hex characters, got {0}")]
    InvalidLength(usize),

    #[error("Address contains non-hex characters")]
    InvalidHex,

    #[error("Mixed-case address fails EIP-55 checksum")]
    BadChecksum,
}

/// Failures while obtaining or using the signing key
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Signing key not available: {0}")]
    Unavailable(String),

    #[error("Invalid private key")]
    InvalidKey,

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Failed to decrypt keystore (wrong passphrase?)")]
    Decrypt,

    #[error("Keystore address {stored} does not match decrypted key {actual}")]
    AddressMismatch { stored: String, actual: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
