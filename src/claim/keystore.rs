//! Where the signing key comes from.
//!
//! The key is unlocked exactly once at startup through a [`KeyProvider`].
//! Passphrases and raw keys are read out-of-band (environment or an
//! interactive prompt) and never reach a log macro.

use crate::claim::address::parse_address;
use crate::claim::error::KeyError;
use crate::claim::signer::ClaimSigner;
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const KEYSTORE_VERSION: u32 = 1;
pub const KDF_PBKDF2_SHA256: &str = "pbkdf2-sha256";
pub const DEFAULT_ITERATIONS: u32 = 262_144;

pub const PASSPHRASE_ENV: &str = "ENCRYPTION_PASSPHRASE";
pub const PRIVATE_KEY_ENV: &str = "SIGNER_PRIVATE_KEY";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Produces the service's signer once at startup
pub trait KeyProvider: Send + Sync {
    fn unlock(&self) -> Result<ClaimSigner, KeyError>;
}

/// Raw key held in memory
pub struct StaticKeyProvider {
    secret: Zeroizing<Vec<u8>>,
}

impl StaticKeyProvider {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn unlock(&self) -> Result<ClaimSigner, KeyError> {
        ClaimSigner::from_bytes(&self.secret)
    }
}

/// Hex private key taken from an environment variable
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new(PRIVATE_KEY_ENV)
    }
}

impl KeyProvider for EnvKeyProvider {
    fn unlock(&self) -> Result<ClaimSigner, KeyError> {
        let secret = Zeroizing::new(std::env::var(&self.var).map_err(|_| {
            KeyError::Unavailable(format!("environment variable {} is not set", self.var))
        })?);
        let signer = ClaimSigner::from_hex(&secret)?;
        debug!(address = %signer.address(), var = %self.var, "Signing key loaded from environment");
        Ok(signer)
    }
}

/// How a keystore passphrase is obtained
pub enum Passphrase {
    /// Read from the named environment variable, prompting when it is unset
    EnvOrPrompt(String),
    Fixed(Zeroizing<String>),
}

impl Passphrase {
    pub fn fixed(passphrase: &str) -> Self {
        Self::Fixed(Zeroizing::new(passphrase.to_string()))
    }

    fn read(&self) -> Result<Zeroizing<String>, KeyError> {
        let passphrase = match self {
            Passphrase::Fixed(passphrase) => passphrase.clone(),
            Passphrase::EnvOrPrompt(var) => match std::env::var(var) {
                Ok(passphrase) => Zeroizing::new(passphrase),
                Err(_) => Zeroizing::new(rpassword::prompt_password("Keystore passphrase: ")?),
            },
        };

        if passphrase.is_empty() {
            return Err(KeyError::Unavailable("empty keystore passphrase".to_string()));
        }
        Ok(passphrase)
    }
}

impl Default for Passphrase {
    fn default() -> Self {
        Self::EnvOrPrompt(PASSPHRASE_ENV.to_string())
    }
}

/// Encrypted keystore file on disk
pub struct KeystoreKeyProvider {
    path: PathBuf,
    passphrase: Passphrase,
    generate: bool,
    iterations: u32,
}

impl KeystoreKeyProvider {
    pub fn new(path: impl Into<PathBuf>, passphrase: Passphrase) -> Self {
        Self {
            path: path.into(),
            passphrase,
            generate: false,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Create the keystore with a fresh key when the file does not exist
    pub fn generate_if_missing(mut self, generate: bool) -> Self {
        self.generate = generate;
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }
}

impl KeyProvider for KeystoreKeyProvider {
    fn unlock(&self) -> Result<ClaimSigner, KeyError> {
        if !self.path.exists() {
            if !self.generate {
                return Err(KeyError::Unavailable(format!(
                    "keystore {} not found",
                    self.path.display()
                )));
            }

            let passphrase = self.passphrase.read()?;
            let signer = ClaimSigner::random();
            Keystore::encrypt(&signer, &passphrase, self.iterations)?.save(&self.path)?;
            info!(
                address = %signer.address(),
                path = %self.path.display(),
                "Generated new signing key"
            );
            return Ok(signer);
        }

        let keystore = Keystore::load(&self.path)?;
        let passphrase = self.passphrase.read()?;
        let signer = keystore.decrypt(&passphrase)?;
        info!(
            address = %signer.address(),
            path = %self.path.display(),
            "Keystore unlocked"
        );
        Ok(signer)
    }
}

/// JSON keystore, version 1.
///
/// The 32-byte key is sealed with AES-256-GCM under a PBKDF2-HMAC-SHA256
/// derived key; the checksummed address is the associated data.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Keystore {
    pub version: u32,
    pub address: String,
    pub kdf: String,
    pub iterations: u32,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl Keystore {
    pub fn encrypt(signer: &ClaimSigner, passphrase: &str, iterations: u32) -> Result<Self, KeyError> {
        if iterations == 0 {
            return Err(KeyError::Keystore("iterations must be positive".to_string()));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let address = signer.address().to_checksum(None);
        let derived = derive_key(passphrase, &salt, iterations);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived[..]));
        let secret = signer.secret_bytes();

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &secret[..],
                    aad: address.as_bytes(),
                },
            )
            .map_err(|_| KeyError::Keystore("encryption failed".to_string()))?;

        Ok(Self {
            version: KEYSTORE_VERSION,
            address,
            kdf: KDF_PBKDF2_SHA256.to_string(),
            iterations,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    pub fn decrypt(&self, passphrase: &str) -> Result<ClaimSigner, KeyError> {
        if self.version != KEYSTORE_VERSION {
            return Err(KeyError::Keystore(format!(
                "unsupported keystore version {}",
                self.version
            )));
        }
        if self.kdf != KDF_PBKDF2_SHA256 {
            return Err(KeyError::Keystore(format!("unsupported kdf {}", self.kdf)));
        }
        if self.iterations == 0 {
            return Err(KeyError::Keystore("iterations must be positive".to_string()));
        }

        let stored = parse_address(&self.address)
            .map_err(|error| KeyError::Keystore(format!("bad address: {error}")))?;
        let salt = decode_field("salt", &self.salt, Some(SALT_LEN))?;
        let nonce = decode_field("nonce", &self.nonce, Some(NONCE_LEN))?;
        let ciphertext = decode_field("ciphertext", &self.ciphertext, None)?;

        let derived = derive_key(passphrase, &salt, self.iterations);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived[..]));
        let secret = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &ciphertext,
                        aad: self.address.as_bytes(),
                    },
                )
                .map_err(|_| KeyError::Decrypt)?,
        );

        let signer = ClaimSigner::from_bytes(&secret)?;
        if signer.address() != stored {
            return Err(KeyError::AddressMismatch {
                stored: stored.to_checksum(None),
                actual: signer.address().to_checksum(None),
            });
        }
        Ok(signer)
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|error| KeyError::Keystore(format!("{}: {error}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|error| KeyError::Keystore(error.to_string()))?;
        std::fs::write(path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn decode_field(name: &str, value: &str, len: Option<usize>) -> Result<Vec<u8>, KeyError> {
    let bytes =
        hex::decode(value).map_err(|_| KeyError::Keystore(format!("{name} is not valid hex")))?;
    match len {
        Some(len) if bytes.len() != len => Err(KeyError::Keystore(format!(
            "{name} must be {len} bytes, got {}",
            bytes.len()
        ))),
        _ => Ok(bytes),
    }
}
