pub mod address;
pub mod digest;
pub mod error;
pub mod keystore;
pub mod signer;

// Re-export public types and functions
pub use address::{Address, parse_address};
pub use digest::{Hash256, UNITS_PER_CLICK, amount_for_clicks, encode_packed, keccak256, prefix};
pub use error::{AddressError, KeyError};
pub use keystore::{
    EnvKeyProvider, KeyProvider, Keystore, KeystoreKeyProvider, Passphrase, StaticKeyProvider,
};
pub use signer::{ClaimSigner, Signature, SignedClaim, recover};
