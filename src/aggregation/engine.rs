//! Aggregation Engine
//!
//! Builds the payload a master signs for a whole batch, packs the resulting
//! signature into a blob, and validates that blob when the execution engine
//! calls back. The master's nonce is consumed only by a successful `validate`.

use super::gas::{calculate_gas_savings, GasEstimate};
use super::payload::{batch_hash, AggregatedBlob, AggregationMode, Domain, SigningPayload};
use super::registry::MasterRegistry;
use crate::account::{AccountStore, SignatureValidation};
use crate::clock::Timestamp;
use crate::crypto::{envelope_signer, recover_signer, Address};
use crate::error::{CustodyError, CustodyResult};
use crate::operation::{Hash32, UserOperation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AggregationConfig {
    pub chain_id: u64,
    /// Identity of this aggregator, bound into every batch hash
    pub aggregator_id: Address,
    pub max_batch_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            aggregator_id: Address::ZERO,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// How one operation of a validated batch was authorized
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OperationAuthorization {
    pub sender: Address,
    pub op_hash: Hash32,
    pub authorized_by: SignatureValidation,
}

/// Result of a successful `validate`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BatchAuthorization {
    pub master: Address,
    pub mode: AggregationMode,
    /// The nonce the batch consumed
    pub nonce: u64,
    pub operations: Vec<OperationAuthorization>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AggregationEngine {
    config: AggregationConfig,
    registry: MasterRegistry,
}

impl AggregationEngine {
    pub fn new(config: AggregationConfig, registry_owner: Address) -> Self {
        Self {
            config,
            registry: MasterRegistry::new(registry_owner),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn registry(&self) -> &MasterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MasterRegistry {
        &mut self.registry
    }

    pub fn domain(&self) -> Domain {
        Domain {
            chain_id: self.config.chain_id,
            aggregator_id: self.config.aggregator_id,
        }
    }

    fn check_batch_size(&self, len: usize) -> CustodyResult<()> {
        if len == 0 {
            return Err(CustodyError::EmptyBatch);
        }
        if len > self.config.max_batch_size {
            return Err(CustodyError::BatchTooLarge {
                size: len,
                max: self.config.max_batch_size,
            });
        }
        Ok(())
    }

    /// Every sender must be controlled by `master`
    fn check_senders(&self, batch: &[UserOperation], master: &Address) -> CustodyResult<()> {
        for op in batch {
            match self.registry.resolve_master(&op.sender) {
                None => return Err(CustodyError::SenderUncontrolled(op.sender)),
                Some(found) if found != *master => {
                    return Err(CustodyError::MixedMasters {
                        expected: *master,
                        found,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Payload for the master to sign at its current nonce
    pub fn build_signing_payload(&self, batch: &[UserOperation], master: &Address) -> CustodyResult<SigningPayload> {
        self.build_payload(batch, master, AggregationMode::Master)
    }

    /// Payload for a session key to sign on the master's behalf
    pub fn build_session_signing_payload(
        &self,
        batch: &[UserOperation],
        master: &Address,
        session_key: &Address,
    ) -> CustodyResult<SigningPayload> {
        self.build_payload(batch, master, AggregationMode::SessionKey(*session_key))
    }

    fn build_payload(
        &self,
        batch: &[UserOperation],
        master: &Address,
        mode: AggregationMode,
    ) -> CustodyResult<SigningPayload> {
        self.check_batch_size(batch.len())?;
        let nonce = self.registry.nonce(master);
        let hash = batch_hash(&self.domain(), &mode, master, nonce, batch);
        Ok(SigningPayload { hash, nonce })
    }

    /// Pack a signature into a blob. Never touches the nonce.
    pub fn create_aggregated_signature(
        &self,
        batch: &[UserOperation],
        master: &Address,
        master_signature: Vec<u8>,
    ) -> CustodyResult<AggregatedBlob> {
        self.check_batch_size(batch.len())?;
        self.check_senders(batch, master)?;

        let blob = AggregatedBlob {
            master: *master,
            nonce: self.registry.nonce(master),
            signature: master_signature,
        };
        debug!(%master, nonce = blob.nonce, ops = batch.len(), "Aggregated signature created");
        Ok(blob)
    }

    /// Validate a blob against a batch. On success the master's nonce moves
    /// forward by exactly one; any failure leaves it untouched.
    pub fn validate(
        &mut self,
        accounts: &AccountStore,
        batch: &[UserOperation],
        blob: &[u8],
        now: Timestamp,
    ) -> CustodyResult<BatchAuthorization> {
        let result = self.validate_inner(accounts, batch, blob, now);
        if let Err(e) = &result {
            warn!(error = %e, ops = batch.len(), "Aggregated batch rejected");
        }
        result
    }

    fn validate_inner(
        &mut self,
        accounts: &AccountStore,
        batch: &[UserOperation],
        blob: &[u8],
        now: Timestamp,
    ) -> CustodyResult<BatchAuthorization> {
        // 1. Decode
        let blob = AggregatedBlob::decode(blob)?;
        let master = blob.master;

        // 2. Master and batch shape
        self.registry.require_authorized(&master)?;
        self.check_batch_size(batch.len())?;

        // 3. Recompute the hash at the blob's nonce
        let claimed = envelope_signer(&blob.signature).ok_or(CustodyError::InvalidSignature)?;
        let mode = if claimed == master {
            AggregationMode::Master
        } else {
            AggregationMode::SessionKey(claimed)
        };
        let hash = batch_hash(&self.domain(), &mode, &master, blob.nonce, batch);

        // 4. Exact nonce
        let current = self.registry.nonce(&master);
        if blob.nonce != current {
            return Err(CustodyError::NonceMismatch {
                master,
                expected: current,
                got: blob.nonce,
            });
        }

        // 5. Signature
        if recover_signer(&hash, &blob.signature) != Some(claimed) {
            return Err(CustodyError::InvalidSignature);
        }

        // 6. Senders
        self.check_senders(batch, &master)?;
        if let AggregationMode::SessionKey(key) = mode {
            for op in batch {
                let account = accounts.require(&op.sender)?;
                if !account.can_execute(&key, &op.call.target, &op.call.selector, now) {
                    return Err(CustodyError::SessionKeyNotPermitted {
                        account: op.sender,
                        key,
                    });
                }
            }
        }

        // 7. Consume
        self.registry.consume_nonce(&master, blob.nonce)?;

        let authorized_by = match mode {
            AggregationMode::Master => SignatureValidation::Master(master),
            AggregationMode::SessionKey(key) => SignatureValidation::SessionKey(key),
        };
        let operations = batch
            .iter()
            .map(|op| OperationAuthorization {
                sender: op.sender,
                op_hash: op.hash(),
                authorized_by,
            })
            .collect();

        info!(%master, nonce = blob.nonce, ops = batch.len(), ?mode, "Aggregated batch validated");
        Ok(BatchAuthorization {
            master,
            mode,
            nonce: blob.nonce,
            operations,
        })
    }

    pub fn calculate_gas_savings(&self, operation_count: u64) -> GasEstimate {
        calculate_gas_savings(operation_count)
    }
}
