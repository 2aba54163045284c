//! Key material for validator identities, vote accounts and funded wallets
//!
//! Key pairs are ed25519, matching what the Solana tooling expects. The
//! public key is rendered in base58 and the secret is serialized as the JSON
//! byte array used by `solana-keygen` keypair files, which is what the
//! validator reads from disk.
//!
//! # Security Model
//!
//! - Secrets are generated from the OS CSPRNG and zeroized on drop
//! - `Debug` never prints secret material
//! - The public key is always re-derived from the secret, never trusted as input

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{SigningKey, VerifyingKey, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Supported key algorithms
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// Ed25519, used for every Solana account key
    #[default]
    Ed25519,
    /// secp256k1; recognized so it can be rejected with a clear error
    Secp256k1,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
            Self::Secp256k1 => write!(f, "secp256k1"),
        }
    }
}

/// A base58-encoded 32-byte public key
///
/// The default is the all-zero key, which is the system program id.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| Error::validation(format!("invalid base58 public key {s:?}: {e}")))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::validation(format!(
                "public key {s:?} decodes to {} bytes, expected {PUBLIC_KEY_LENGTH}",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serialized secret material: a JSON array of the 64 keypair bytes
///
/// This is the file format `agave-validator --identity` consumes.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBlob(Zeroizing<String>);

impl Serialize for SecretBlob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for SecretBlob {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretBlob::new)
    }
}

impl SecretBlob {
    /// Wrap an already-serialized blob
    pub fn new(json: impl Into<String>) -> Self {
        Self(Zeroizing::new(json.into()))
    }

    /// The JSON text, for writing to a key file
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBlob([REDACTED])")
    }
}

/// A named ed25519 key pair
pub struct KeyPair {
    name: String,
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source
    pub fn generate(name: impl Into<String>, algorithm: KeyAlgorithm) -> Result<Self> {
        let name = name.into();
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                let signing_key = SigningKey::generate(&mut OsRng);
                Ok(Self { name, signing_key })
            }
            other => Err(Error::generation(format!(
                "unsupported key algorithm {other} for {name}"
            ))),
        }
    }

    /// Rebuild a key pair from its serialized secret blob
    ///
    /// The public half stored in the blob must match the one derived from
    /// the secret half.
    pub fn from_secret_blob(name: impl Into<String>, blob: &SecretBlob) -> Result<Self> {
        let name = name.into();
        let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
            serde_json::from_str(blob.expose())
                .map_err(|e| Error::generation(format!("{name}: secret blob is not a byte array: {e}")))?,
        );
        let bytes: &[u8; KEYPAIR_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            Error::generation(format!(
                "{name}: secret blob has {} bytes, expected {KEYPAIR_LENGTH}",
                bytes.len()
            ))
        })?;
        let signing_key = SigningKey::from_keypair_bytes(bytes)
            .map_err(|e| Error::generation(format!("{name}: inconsistent keypair bytes: {e}")))?;
        Ok(Self { name, signing_key })
    }

    /// Name this key pair was declared under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The verification key, derived from the secret
    pub fn public_key(&self) -> PublicKey {
        let verifying: VerifyingKey = self.signing_key.verifying_key();
        PublicKey(verifying.to_bytes())
    }

    /// Raw 64-byte keypair (secret || public)
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEYPAIR_LENGTH]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    /// Encode the secret material as a `solana-keygen` JSON byte array
    pub fn serialize(&self) -> SecretBlob {
        let bytes = self.to_bytes();
        let parts: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
        SecretBlob::new(format!("[{}]", parts.join(",")))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("public_key", &self.public_key())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
