//! Account storage and management

use super::types::Account;
use crate::crypto::Address;
use crate::error::{CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Account store for managing all accounts
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountStore {
    accounts: HashMap<Address, Account>,
}

impl AccountStore {
    /// Create a new empty account store
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    /// Create and initialize an account in one step, as deployment tooling does
    pub fn create_account(
        &mut self,
        address: Address,
        owner: Address,
        master_signer: Option<Address>,
    ) -> CustodyResult<&Account> {
        if address.is_zero() {
            return Err(CustodyError::InvalidPrincipal);
        }
        if self.accounts.contains_key(&address) {
            return Err(CustodyError::AccountExists(address));
        }

        let mut account = Account::new(address);
        account.initialize(owner, master_signer)?;
        Ok(self.accounts.entry(address).or_insert(account))
    }

    /// Get account by address
    pub fn get(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Get mutable account by address
    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Account> {
        self.accounts.get_mut(address)
    }

    pub fn require(&self, address: &Address) -> CustodyResult<&Account> {
        self.accounts
            .get(address)
            .ok_or(CustodyError::AccountNotFound(*address))
    }

    pub fn require_mut(&mut self, address: &Address) -> CustodyResult<&mut Account> {
        self.accounts
            .get_mut(address)
            .ok_or(CustodyError::AccountNotFound(*address))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// All account addresses, sorted
    pub fn addresses(&self) -> Vec<Address> {
        let mut addrs: Vec<Address> = self.accounts.keys().copied().collect();
        addrs.sort();
        addrs
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
