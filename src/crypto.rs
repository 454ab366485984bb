use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a signature envelope: verifying key followed by the signature.
pub const SIGNATURE_ENVELOPE_LEN: usize = 32 + 64;

/// A principal's identity: the raw ed25519 verifying key.
///
/// The all-zero address is the null principal and never holds authority.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| format!("Invalid address hex: {}", e))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "Address must be 32 bytes".to_string())?;
        Ok(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.to_hex()[..16])
    }
}

impl FromStr for Address {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

// Hex in JSON/TOML, raw bytes in bincode.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Address::from_hex(&s).map_err(D::Error::custom)
        } else {
            Ok(Address(<[u8; 32]>::deserialize(deserializer)?))
        }
    }
}

pub struct KeyPair {
    pub signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new Ed25519 keypair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        KeyPair {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Restore a keypair from its 32-byte secret, hex encoded
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, String> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|e| format!("Invalid secret hex: {}", e))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "Secret key must be 32 bytes".to_string())?;
        Ok(KeyPair {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    pub fn address(&self) -> Address {
        Address(self.signing_key.verifying_key().to_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Sign a message and wrap it in an envelope carrying the signer's key
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        let mut envelope = Vec::with_capacity(SIGNATURE_ENVELOPE_LEN);
        envelope.extend_from_slice(self.signing_key.verifying_key().as_bytes());
        envelope.extend_from_slice(&signature.to_bytes());
        envelope
    }
}

/// Recover the signer of `message` from a signature envelope.
///
/// Returns `None` for malformed envelopes or signatures that do not verify.
pub fn recover_signer(message: &[u8], envelope: &[u8]) -> Option<Address> {
    if envelope.len() != SIGNATURE_ENVELOPE_LEN {
        return None;
    }
    let key_bytes: [u8; 32] = envelope[..32].try_into().ok()?;
    let sig_bytes: [u8; 64] = envelope[32..].try_into().ok()?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes).ok()?;
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify_strict(message, &signature).ok()?;

    Some(Address(key_bytes))
}

/// The key an envelope claims to be signed by, without verifying anything
pub fn envelope_signer(envelope: &[u8]) -> Option<Address> {
    if envelope.len() != SIGNATURE_ENVELOPE_LEN {
        return None;
    }
    let key_bytes: [u8; 32] = envelope[..32].try_into().ok()?;
    Some(Address(key_bytes))
}

/// Check that `envelope` is a valid signature over `message` by `expected`
pub fn verify_signed_by(message: &[u8], envelope: &[u8], expected: &Address) -> bool {
    recover_signer(message, envelope).as_ref() == Some(expected)
}
