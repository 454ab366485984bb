//! Per-account principal hierarchy: owner, master signer, session keys, aggregator

use super::session::{SessionKeyEntry, SessionPermissions};
use crate::clock::Timestamp;
use crate::crypto::{recover_signer, Address};
use crate::error::{CustodyError, CustodyResult};
use crate::operation::{Call, Hash32, Selector, UserOperation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Which principal authorized an operation
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureValidation {
    Owner(Address),
    Master(Address),
    SessionKey(Address),
    /// Empty signature; the configured aggregator vouches for the operation
    DeferToAggregator(Address),
    Rejected,
}

impl SignatureValidation {
    pub fn is_authorized(&self) -> bool {
        !matches!(self, SignatureValidation::Rejected)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Account {
    pub address: Address,
    owner: Option<Address>,
    master_signer: Option<Address>,
    aggregator: Option<Address>,
    session_keys: HashMap<Address, SessionKeyEntry>,
}

impl Account {
    /// An account record that still needs `initialize`
    pub fn new(address: Address) -> Self {
        Self {
            address,
            owner: None,
            master_signer: None,
            aggregator: None,
            session_keys: HashMap::new(),
        }
    }

    pub fn initialize(&mut self, owner: Address, master_signer: Option<Address>) -> CustodyResult<()> {
        if self.owner.is_some() {
            return Err(CustodyError::AlreadyInitialized);
        }
        if owner.is_zero() || master_signer.map_or(false, |m| m.is_zero()) {
            return Err(CustodyError::InvalidPrincipal);
        }

        self.owner = Some(owner);
        self.master_signer = master_signer;
        info!(account = %self.address, %owner, master = ?master_signer, "Account initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner(&self) -> Option<Address> {
        self.owner
    }

    pub fn master_signer(&self) -> Option<Address> {
        self.master_signer
    }

    /// Derived from the stored master so the two can never disagree
    pub fn master_signer_enabled(&self) -> bool {
        self.master_signer.is_some()
    }

    pub fn aggregator(&self) -> Option<Address> {
        self.aggregator
    }

    fn require_initialized(&self) -> CustodyResult<Address> {
        self.owner.ok_or(CustodyError::NotInitialized)
    }

    /// Owner, the account itself, or its enabled master signer
    fn can_manage_keys(&self, caller: &Address, owner: &Address) -> bool {
        caller == owner || *caller == self.address || self.master_signer.as_ref() == Some(caller)
    }

    /// Replace (or clear) the master signer. Only the current master or the
    /// account acting on its own behalf may do this.
    pub fn set_master_signer(&mut self, caller: Address, new_master: Option<Address>) -> CustodyResult<()> {
        self.require_initialized()?;
        if caller != self.address && self.master_signer != Some(caller) {
            return Err(CustodyError::NotMasterSigner(caller));
        }
        if new_master.map_or(false, |m| m.is_zero()) {
            return Err(CustodyError::InvalidPrincipal);
        }

        let previous = self.master_signer;
        self.master_signer = new_master;
        info!(account = %self.address, ?previous, current = ?new_master, "Master signer changed");
        Ok(())
    }

    pub fn set_aggregator(&mut self, caller: Address, aggregator: Option<Address>) -> CustodyResult<()> {
        let owner = self.require_initialized()?;
        if caller != owner && caller != self.address {
            return Err(CustodyError::NotOwner(caller));
        }
        if aggregator.map_or(false, |a| a.is_zero()) {
            return Err(CustodyError::InvalidPrincipal);
        }

        self.aggregator = aggregator;
        info!(account = %self.address, ?aggregator, "Aggregator changed");
        Ok(())
    }

    pub fn add_session_key(
        &mut self,
        caller: Address,
        key: Address,
        valid_after: Timestamp,
        valid_until: Timestamp,
        permissions: SessionPermissions,
        now: Timestamp,
    ) -> CustodyResult<()> {
        let owner = self.require_initialized()?;
        if !self.can_manage_keys(&caller, &owner) {
            return Err(CustodyError::NotOwner(caller));
        }
        if key.is_zero() {
            return Err(CustodyError::InvalidPrincipal);
        }
        if self.session_keys.get(&key).map_or(false, |e| e.is_live(now)) {
            return Err(CustodyError::SessionKeyExists(key));
        }
        if valid_until <= valid_after {
            return Err(CustodyError::InvalidValidityWindow { valid_after, valid_until });
        }
        if valid_until < now {
            return Err(CustodyError::WindowExpired { valid_until, now });
        }

        // Expired or revoked entries are replaced outright
        self.session_keys
            .insert(key, SessionKeyEntry::new(valid_after, valid_until, permissions));
        info!(account = %self.address, %key, valid_after, valid_until, "Session key added");
        Ok(())
    }

    pub fn revoke_session_key(&mut self, caller: Address, key: Address, now: Timestamp) -> CustodyResult<()> {
        let owner = self.require_initialized()?;
        if !self.can_manage_keys(&caller, &owner) {
            return Err(CustodyError::NotOwner(caller));
        }

        match self.session_keys.get_mut(&key) {
            Some(entry) if entry.is_live(now) => {
                entry.revoked = true;
                info!(account = %self.address, %key, "Session key revoked");
                Ok(())
            }
            _ => Err(CustodyError::SessionKeyNotActive(key)),
        }
    }

    pub fn session_key(&self, key: &Address) -> Option<&SessionKeyEntry> {
        self.session_keys.get(key)
    }

    /// Keys usable right now, sorted for stable output
    pub fn active_session_keys(&self, now: Timestamp) -> Vec<Address> {
        let mut keys: Vec<Address> = self
            .session_keys
            .iter()
            .filter(|(_, e)| e.is_usable(now))
            .map(|(k, _)| *k)
            .collect();
        keys.sort();
        keys
    }

    pub fn can_execute(&self, key: &Address, target: &Address, selector: &Selector, now: Timestamp) -> bool {
        self.session_keys
            .get(key)
            .map_or(false, |e| e.can_execute(target, selector, now))
    }

    /// Decide which principal, if any, produced `signature` over `op_hash`.
    ///
    /// Order: aggregator deferral, owner, master signer, session key.
    pub fn validate_signature(
        &self,
        op_hash: &Hash32,
        signature: &[u8],
        call: &Call,
        now: Timestamp,
    ) -> SignatureValidation {
        if signature.is_empty() {
            return match self.aggregator {
                Some(aggregator) => SignatureValidation::DeferToAggregator(aggregator),
                None => SignatureValidation::Rejected,
            };
        }

        let signer = match recover_signer(op_hash, signature) {
            Some(s) => s,
            None => {
                debug!(account = %self.address, "Signature did not verify");
                return SignatureValidation::Rejected;
            }
        };

        if self.owner == Some(signer) {
            return SignatureValidation::Owner(signer);
        }
        if self.master_signer == Some(signer) {
            return SignatureValidation::Master(signer);
        }
        if self.can_execute(&signer, &call.target, &call.selector, now) {
            return SignatureValidation::SessionKey(signer);
        }

        debug!(account = %self.address, %signer, "Signer holds no authority");
        SignatureValidation::Rejected
    }

    /// Validate an operation addressed to this account using its own signature field
    pub fn validate_user_op(&self, op: &UserOperation, now: Timestamp) -> SignatureValidation {
        if op.sender != self.address {
            return SignatureValidation::Rejected;
        }
        self.validate_signature(&op.hash(), &op.signature, &op.call, now)
    }
}
