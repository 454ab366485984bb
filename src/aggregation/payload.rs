//! Canonical signing payload and the aggregated signature blob

use crate::crypto::Address;
use crate::encoding::{CanonicalDeserialize, CanonicalSerialize};
use crate::error::{CustodyError, CustodyResult};
use crate::operation::{Hash32, UserOperation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

pub const MASTER_AGGREGATION_TAG: &str = "CUSTODY_MASTER_AGGREGATION_V1";
pub const SESSION_AGGREGATION_TAG: &str = "CUSTODY_SESSION_AGGREGATION_V1";

/// Who signs the batch on the master's behalf
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregationMode {
    Master,
    SessionKey(Address),
}

impl AggregationMode {
    pub fn tag(&self) -> &'static str {
        match self {
            AggregationMode::Master => MASTER_AGGREGATION_TAG,
            AggregationMode::SessionKey(_) => SESSION_AGGREGATION_TAG,
        }
    }
}

/// Everything the batch hash is bound to besides the operations themselves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Domain {
    pub chain_id: u64,
    pub aggregator_id: Address,
}

/// What the master (or session key) must sign
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigningPayload {
    pub hash: Hash32,
    pub nonce: u64,
}

/// Domain-separated hash over an ordered batch. Reordering the batch changes
/// the hash.
pub fn batch_hash(
    domain: &Domain,
    mode: &AggregationMode,
    master: &Address,
    nonce: u64,
    batch: &[UserOperation],
) -> Hash32 {
    let op_hashes: Vec<Hash32> = batch.iter().map(UserOperation::hash).collect();

    let mut hasher = Sha256::new();
    hasher.update(mode.tag().to_bytes());
    hasher.update(master.to_bytes());
    if let AggregationMode::SessionKey(key) = mode {
        hasher.update(key.to_bytes());
    }
    hasher.update(nonce.to_bytes());
    hasher.update(domain.chain_id.to_bytes());
    hasher.update(domain.aggregator_id.to_bytes());
    hasher.update(op_hashes.to_bytes());
    hasher.finalize().into()
}

/// Wire form: `master(32) || nonce(u64 LE) || len(u32 LE) || signature`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AggregatedBlob {
    pub master: Address,
    pub nonce: u64,
    pub signature: Vec<u8>,
}

impl AggregatedBlob {
    pub fn encode(&self) -> Vec<u8> {
        self.to_bytes()
    }

    pub fn decode(bytes: &[u8]) -> CustodyResult<Self> {
        Self::from_bytes(bytes).map_err(|e| CustodyError::MalformedBlob(e.to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    pub fn from_hex(s: &str) -> CustodyResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| CustodyError::MalformedBlob(e.to_string()))?;
        Self::decode(&bytes)
    }
}

impl CanonicalSerialize for AggregatedBlob {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.master.canonical_serialize(writer)?;
        self.nonce.canonical_serialize(writer)?;
        self.signature.canonical_serialize(writer)
    }
}

impl CanonicalDeserialize for AggregatedBlob {
    fn canonical_deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            master: Address::canonical_deserialize(reader)?,
            nonce: u64::canonical_deserialize(reader)?,
            signature: Vec::<u8>::canonical_deserialize(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::operation::{Call, Selector};

    fn domain() -> Domain {
        Domain {
            chain_id: 7,
            aggregator_id: KeyPair::generate().address(),
        }
    }

    fn op(sender: Address, nonce: u64) -> UserOperation {
        UserOperation::new(
            sender,
            nonce,
            Call::new(Address([9u8; 32]), Selector::from_name("transfer"), vec![]),
        )
    }

    #[test]
    fn test_blob_round_trip_exact() {
        let blob = AggregatedBlob {
            master: KeyPair::generate().address(),
            nonce: 42,
            signature: vec![1, 2, 3, 4],
        };
        let bytes = blob.encode();
        assert_eq!(bytes.len(), 32 + 8 + 4 + 4);
        assert_eq!(&bytes[..32], blob.master.as_bytes());
        assert_eq!(&bytes[32..40], &42u64.to_le_bytes());

        let decoded = AggregatedBlob::decode(&bytes).unwrap();
        assert_eq!(decoded, blob);
        assert_eq!(decoded.encode(), bytes);
        assert_eq!(AggregatedBlob::from_hex(&blob.to_hex()).unwrap(), blob);
    }

    #[test]
    fn test_blob_rejects_garbage() {
        assert!(matches!(
            AggregatedBlob::decode(&[0u8; 10]),
            Err(CustodyError::MalformedBlob(_))
        ));
        let mut bytes = AggregatedBlob {
            master: Address([1u8; 32]),
            nonce: 0,
            signature: vec![5],
        }
        .encode();
        bytes.push(0);
        assert!(AggregatedBlob::decode(&bytes).is_err());
        assert!(AggregatedBlob::from_hex("zz").is_err());
    }

    #[test]
    fn test_batch_hash_binds_every_field() {
        let d = domain();
        let master = KeyPair::generate().address();
        let (w1, w2) = (KeyPair::generate().address(), KeyPair::generate().address());
        let batch = vec![op(w1, 0), op(w2, 0)];
        let base = batch_hash(&d, &AggregationMode::Master, &master, 0, &batch);

        // Order
        let reversed: Vec<UserOperation> = batch.iter().rev().cloned().collect();
        assert_ne!(base, batch_hash(&d, &AggregationMode::Master, &master, 0, &reversed));
        // Nonce
        assert_ne!(base, batch_hash(&d, &AggregationMode::Master, &master, 1, &batch));
        // Chain
        let other_chain = Domain { chain_id: 8, ..d };
        assert_ne!(base, batch_hash(&other_chain, &AggregationMode::Master, &master, 0, &batch));
        // Aggregator
        let other_agg = Domain { aggregator_id: KeyPair::generate().address(), ..d };
        assert_ne!(base, batch_hash(&other_agg, &AggregationMode::Master, &master, 0, &batch));
        // Mode tag
        let session = AggregationMode::SessionKey(KeyPair::generate().address());
        assert_ne!(base, batch_hash(&d, &session, &master, 0, &batch));
        // Operation signatures do not matter
        let signed: Vec<UserOperation> = batch.iter().cloned().map(|o| o.with_signature(vec![1; 96])).collect();
        assert_eq!(base, batch_hash(&d, &AggregationMode::Master, &master, 0, &signed));
    }
}
