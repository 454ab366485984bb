//! Operations submitted against accounts and their canonical hash.

use crate::crypto::Address;
use crate::encoding::CanonicalSerialize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

pub type Hash32 = [u8; 32];

const USER_OP_TAG: &str = "CUSTODY_USER_OP_V1";

/// 4-byte function selector identifying the entry point a call targets
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    /// First four bytes of sha256(name), e.g. `Selector::from_name("transfer")`
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        Selector([digest[0], digest[1], digest[2], digest[3]])
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Selector {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| format!("Invalid selector hex: {}", e))?;
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| "Selector must be 4 bytes".to_string())?;
        Ok(Selector(arr))
    }
}

/// The call an operation wants performed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub selector: Selector,
    pub data: Vec<u8>,
}

impl Call {
    pub fn new(target: Address, selector: Selector, data: Vec<u8>) -> Self {
        Self { target, selector, data }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: u64,
    pub call: Call,
    /// Empty when the account defers to its aggregator
    pub signature: Vec<u8>,
}

impl UserOperation {
    pub fn new(sender: Address, nonce: u64, call: Call) -> Self {
        Self {
            sender,
            nonce,
            call,
            signature: Vec::new(),
        }
    }

    /// Hash over everything but the signature field
    pub fn hash(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update(USER_OP_TAG.to_bytes());
        hasher.update(self.to_bytes());
        hasher.finalize().into()
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }
}

// The signature is intentionally absent from the canonical form.
impl CanonicalSerialize for UserOperation {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.sender.canonical_serialize(writer)?;
        self.nonce.canonical_serialize(writer)?;
        self.call.target.canonical_serialize(writer)?;
        self.call.selector.0.canonical_serialize(writer)?;
        self.call.data.canonical_serialize(writer)
    }
}
