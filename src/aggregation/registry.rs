//! Master Registry
//!
//! Tracks which masters are authorized, which accounts each master controls,
//! and the per-master replay nonce. Lookup goes through explicit indexes
//! (authorized set + reverse account map), never a scan.

use crate::crypto::Address;
use crate::error::{CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MasterEntry {
    pub authorized: bool,
    pub controlled_accounts: BTreeSet<Address>,
    /// Only ever moves forward by one, on a successful batch validation
    pub nonce: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MasterRegistry {
    owner: Address,
    masters: HashMap<Address, MasterEntry>,
    /// Iterable list of authorized masters, compacted with swap-and-pop
    authorized_list: Vec<Address>,
    /// Position of each authorized master in `authorized_list`
    list_index: HashMap<Address, usize>,
    /// Reverse index: account -> controlling master
    account_master: HashMap<Address, Address>,
}

impl MasterRegistry {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            masters: HashMap::new(),
            authorized_list: Vec::new(),
            list_index: HashMap::new(),
            account_master: HashMap::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_owner(&self, caller: &Address) -> bool {
        self.owner == *caller
    }

    fn require_owner(&self, caller: &Address) -> CustodyResult<()> {
        if self.is_owner(caller) {
            Ok(())
        } else {
            Err(CustodyError::NotRegistryOwner(*caller))
        }
    }

    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> CustodyResult<()> {
        self.require_owner(&caller)?;
        if new_owner.is_zero() {
            return Err(CustodyError::InvalidPrincipal);
        }
        info!(previous = %self.owner, current = %new_owner, "Registry ownership transferred");
        self.owner = new_owner;
        Ok(())
    }

    /// Authorize or deauthorize a master. Deauthorizing keeps the master's
    /// nonce and controlled set so a later re-authorization cannot replay.
    pub fn set_master_authorization(&mut self, caller: Address, master: Address, enabled: bool) -> CustodyResult<()> {
        self.require_owner(&caller)?;
        if master.is_zero() {
            return Err(CustodyError::InvalidPrincipal);
        }

        let entry = self.masters.entry(master).or_default();
        if entry.authorized == enabled {
            debug!(%master, enabled, "Master authorization unchanged");
            return Ok(());
        }
        entry.authorized = enabled;

        if enabled {
            self.list_index.insert(master, self.authorized_list.len());
            self.authorized_list.push(master);
        } else if let Some(idx) = self.list_index.remove(&master) {
            self.authorized_list.swap_remove(idx);
            if let Some(moved) = self.authorized_list.get(idx) {
                self.list_index.insert(*moved, idx);
            }
        }

        info!(%master, enabled, authorized = self.authorized_list.len(), "Master authorization set");
        Ok(())
    }

    pub fn is_authorized_master(&self, master: &Address) -> bool {
        self.masters.get(master).map_or(false, |e| e.authorized)
    }

    pub fn require_authorized(&self, master: &Address) -> CustodyResult<()> {
        if self.is_authorized_master(master) {
            Ok(())
        } else {
            Err(CustodyError::MasterNotAuthorized(*master))
        }
    }

    /// Authorized masters. Positions are not stable across removals.
    pub fn authorized_masters(&self) -> &[Address] {
        &self.authorized_list
    }

    fn require_owner_or_master(&self, caller: &Address, master: &Address) -> CustodyResult<()> {
        if self.is_owner(caller) || caller == master {
            Ok(())
        } else {
            Err(CustodyError::NotMasterCaller {
                caller: *caller,
                master: *master,
            })
        }
    }

    /// Check one wallet assignment against current state without applying it
    fn check_wallet_change(&self, master: &Address, account: &Address, enabled: bool) -> CustodyResult<()> {
        if account.is_zero() {
            return Err(CustodyError::InvalidPrincipal);
        }
        match (enabled, self.account_master.get(account)) {
            (true, Some(current)) if current != master => Err(CustodyError::WalletControlledByOther {
                account: *account,
                master: *current,
            }),
            (false, current) if current != Some(master) => Err(CustodyError::WalletNotControlled {
                account: *account,
                master: *master,
            }),
            _ => Ok(()),
        }
    }

    fn apply_wallet_change(&mut self, master: Address, account: Address, enabled: bool) {
        let entry = self.masters.entry(master).or_default();
        if enabled {
            entry.controlled_accounts.insert(account);
            self.account_master.insert(account, master);
        } else {
            entry.controlled_accounts.remove(&account);
            self.account_master.remove(&account);
        }
    }

    pub fn set_wallet_authorization(
        &mut self,
        caller: Address,
        master: Address,
        account: Address,
        enabled: bool,
    ) -> CustodyResult<()> {
        self.require_owner_or_master(&caller, &master)?;
        if enabled {
            self.require_authorized(&master)?;
        }
        self.check_wallet_change(&master, &account, enabled)?;

        self.apply_wallet_change(master, account, enabled);
        info!(%master, %account, enabled, "Wallet authorization set");
        Ok(())
    }

    /// All-or-nothing: every account is checked before any is changed.
    /// Returns the distinct accounts that were changed, sorted.
    pub fn batch_set_wallet_authorization(
        &mut self,
        caller: Address,
        master: Address,
        accounts: &[Address],
        enabled: bool,
    ) -> CustodyResult<Vec<Address>> {
        self.require_owner_or_master(&caller, &master)?;
        if accounts.is_empty() {
            return Err(CustodyError::EmptyBatch);
        }
        if enabled {
            self.require_authorized(&master)?;
        }

        let mut seen = BTreeSet::new();
        for account in accounts {
            self.check_wallet_change(&master, account, enabled)?;
            if !seen.insert(*account) {
                warn!(%account, "Duplicate account in wallet batch");
            }
        }

        for account in seen.iter() {
            self.apply_wallet_change(master, *account, enabled);
        }
        info!(%master, count = seen.len(), enabled, "Wallet authorization batch applied");
        Ok(seen.into_iter().collect())
    }

    /// The master controlling `account`, if any
    pub fn resolve_master(&self, account: &Address) -> Option<Address> {
        self.account_master.get(account).copied()
    }

    pub fn controlled_accounts(&self, master: &Address) -> Vec<Address> {
        self.masters
            .get(master)
            .map(|e| e.controlled_accounts.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn nonce(&self, master: &Address) -> u64 {
        self.masters.get(master).map_or(0, |e| e.nonce)
    }

    pub fn master(&self, master: &Address) -> Option<&MasterEntry> {
        self.masters.get(master)
    }

    /// Compare-and-increment. The nonce moves only if it still equals
    /// `expected`; returns the new nonce.
    pub(crate) fn consume_nonce(&mut self, master: &Address, expected: u64) -> CustodyResult<u64> {
        let entry = self
            .masters
            .get_mut(master)
            .ok_or(CustodyError::MasterNotAuthorized(*master))?;
        if entry.nonce != expected {
            return Err(CustodyError::NonceMismatch {
                master: *master,
                expected: entry.nonce,
                got: expected,
            });
        }
        entry.nonce += 1;
        Ok(entry.nonce)
    }
}
