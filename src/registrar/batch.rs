//! Batch Registrar
//!
//! Fans session-key changes out across every account a master administers.
//! A failure on one account is logged and skipped; the returned count tells
//! the caller how many accounts actually changed.

use super::template::TemplateCatalog;
use crate::account::{AccountStore, SessionPermissions};
use crate::aggregation::MasterRegistry;
use crate::clock::Timestamp;
use crate::crypto::Address;
use crate::error::{CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// One item of `batch_add_session_keys`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionKeyGrant {
    pub account: Address,
    pub session_key: Address,
    pub valid_after: Timestamp,
    pub valid_until: Timestamp,
    pub permissions: SessionPermissions,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BatchRegistrar {
    catalog: TemplateCatalog,
    registered: HashMap<Address, BTreeSet<Address>>,
}

impl BatchRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut TemplateCatalog {
        &mut self.catalog
    }

    pub fn registered_accounts(&self, master: &Address) -> Vec<Address> {
        self.registered
            .get(master)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, master: &Address, account: &Address) -> bool {
        self.registered.get(master).map_or(false, |set| set.contains(account))
    }

    /// Registration must mirror real control: the account's own master
    /// signer has to be `master`.
    fn check_registration(
        registry: &MasterRegistry,
        accounts: &AccountStore,
        caller: &Address,
        master: &Address,
        account: &Address,
    ) -> CustodyResult<()> {
        if !registry.is_owner(caller) && caller != master {
            return Err(CustodyError::NotMasterCaller {
                caller: *caller,
                master: *master,
            });
        }
        registry.require_authorized(master)?;

        let recorded = accounts.require(account)?.master_signer();
        if recorded != Some(*master) {
            return Err(CustodyError::MasterMismatch {
                account: *account,
                expected: *master,
                recorded,
            });
        }
        Ok(())
    }

    pub fn register_account(
        &mut self,
        registry: &MasterRegistry,
        accounts: &AccountStore,
        caller: Address,
        master: Address,
        account: Address,
    ) -> CustodyResult<()> {
        Self::check_registration(registry, accounts, &caller, &master, &account)?;
        if !self.registered.entry(master).or_default().insert(account) {
            return Err(CustodyError::AccountAlreadyRegistered { account, master });
        }
        info!(%master, %account, "Account registered");
        Ok(())
    }

    pub fn unregister_account(
        &mut self,
        registry: &MasterRegistry,
        accounts: &AccountStore,
        caller: Address,
        master: Address,
        account: Address,
    ) -> CustodyResult<()> {
        Self::check_registration(registry, accounts, &caller, &master, &account)?;
        let removed = self
            .registered
            .get_mut(&master)
            .map_or(false, |set| set.remove(&account));
        if !removed {
            return Err(CustodyError::AccountNotRegistered { account, master });
        }
        info!(%master, %account, "Account unregistered");
        Ok(())
    }

    fn require_acting_master(registry: &MasterRegistry, caller: &Address, master: &Address) -> CustodyResult<()> {
        if caller != master {
            return Err(CustodyError::NotMasterCaller {
                caller: *caller,
                master: *master,
            });
        }
        registry.require_authorized(master)
    }

    /// Add `session_key` to every account registered under `master`, using
    /// the template's permissions and its default duration (or the override).
    pub fn add_session_key_with_template(
        &self,
        registry: &MasterRegistry,
        accounts: &mut AccountStore,
        caller: Address,
        master: Address,
        session_key: Address,
        template_name: &str,
        duration_override: Option<u64>,
        now: Timestamp,
    ) -> CustodyResult<usize> {
        Self::require_acting_master(registry, &caller, &master)?;
        if session_key.is_zero() {
            return Err(CustodyError::InvalidPrincipal);
        }
        let template = self.catalog.require_active(template_name)?;
        let duration = duration_override.unwrap_or(template.default_duration);
        if duration == 0 {
            return Err(CustodyError::InvalidDuration);
        }
        let valid_until = now.saturating_add(duration);

        let targets = self.registered_accounts(&master);
        let mut updated = 0;
        for address in &targets {
            let result = accounts.require_mut(address).and_then(|account| {
                account.add_session_key(master, session_key, now, valid_until, template.permissions.clone(), now)
            });
            match result {
                Ok(()) => updated += 1,
                Err(e) => debug!(account = %address, error = %e, "Skipping account"),
            }
        }

        info!(
            %master,
            %session_key,
            template = template_name,
            updated,
            total = targets.len(),
            "Template session key provisioned"
        );
        Ok(updated)
    }

    /// Apply each grant whose account is registered under the calling master.
    /// Returns the indices of the grants that took effect, in input order.
    pub fn batch_add_session_keys(
        &self,
        registry: &MasterRegistry,
        accounts: &mut AccountStore,
        caller: Address,
        grants: &[SessionKeyGrant],
        now: Timestamp,
    ) -> CustodyResult<Vec<usize>> {
        if grants.is_empty() {
            return Err(CustodyError::EmptyBatch);
        }
        registry.require_authorized(&caller)?;

        let mut applied = Vec::new();
        for (idx, grant) in grants.iter().enumerate() {
            if !self.is_registered(&caller, &grant.account) {
                debug!(account = %grant.account, "Skipping unregistered account");
                continue;
            }
            let result = accounts.require_mut(&grant.account).and_then(|account| {
                account.add_session_key(
                    caller,
                    grant.session_key,
                    grant.valid_after,
                    grant.valid_until,
                    grant.permissions.clone(),
                    now,
                )
            });
            match result {
                Ok(()) => applied.push(idx),
                Err(e) => debug!(account = %grant.account, error = %e, "Skipping grant"),
            }
        }

        info!(master = %caller, updated = applied.len(), total = grants.len(), "Session key batch applied");
        Ok(applied)
    }

    /// Revoke `session_key` on every account registered under `master`
    pub fn batch_revoke_session_key(
        &self,
        registry: &MasterRegistry,
        accounts: &mut AccountStore,
        caller: Address,
        master: Address,
        session_key: Address,
        now: Timestamp,
    ) -> CustodyResult<usize> {
        Self::require_acting_master(registry, &caller, &master)?;

        let targets = self.registered_accounts(&master);
        let mut revoked = 0;
        for address in &targets {
            let result = accounts
                .require_mut(address)
                .and_then(|account| account.revoke_session_key(master, session_key, now));
            match result {
                Ok(()) => revoked += 1,
                Err(e) => debug!(account = %address, error = %e, "Skipping account"),
            }
        }

        info!(%master, %session_key, revoked, total = targets.len(), "Session key batch revoked");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::operation::Selector;

    const NOW: Timestamp = 1_700_000_000;

    struct Fixture {
        registry: MasterRegistry,
        accounts: AccountStore,
        registrar: BatchRegistrar,
        owner: Address,
        master: Address,
        wallets: Vec<Address>,
    }

    fn fixture(wallet_count: usize) -> Fixture {
        let owner = KeyPair::generate().address();
        let master = KeyPair::generate().address();
        let mut registry = MasterRegistry::new(owner);
        registry.set_master_authorization(owner, master, true).unwrap();

        let mut accounts = AccountStore::new();
        let mut registrar = BatchRegistrar::new();
        let mut wallets = Vec::new();
        for _ in 0..wallet_count {
            let wallet = KeyPair::generate().address();
            accounts
                .create_account(wallet, KeyPair::generate().address(), Some(master))
                .unwrap();
            registrar
                .register_account(&registry, &accounts, master, master, wallet)
                .unwrap();
            wallets.push(wallet);
        }

        let perms = SessionPermissions::scoped([(KeyPair::generate().address(), Selector::from_name("swap"))]);
        registrar
            .catalog_mut()
            .create_template(&registry, owner, "TRADING", 3600, perms)
            .unwrap();

        Fixture {
            registry,
            accounts,
            registrar,
            owner,
            master,
            wallets,
        }
    }

    #[test]
    fn test_template_fan_out_skips_existing_key() {
        let mut f = fixture(3);
        let key = KeyPair::generate().address();

        // One account already holds the key
        f.accounts
            .get_mut(&f.wallets[1])
            .unwrap()
            .add_session_key(f.master, key, NOW, NOW + 60, SessionPermissions::AllowAll, NOW)
            .unwrap();

        let updated = f
            .registrar
            .add_session_key_with_template(&f.registry, &mut f.accounts, f.master, f.master, key, "TRADING", None, NOW)
            .unwrap();
        assert_eq!(updated, 2);

        let entry = f.accounts.get(&f.wallets[0]).unwrap().session_key(&key).unwrap();
        assert_eq!(entry.valid_after, NOW);
        assert_eq!(entry.valid_until, NOW + 3600);
    }

    #[test]
    fn test_template_duration_override() {
        let mut f = fixture(1);
        let key = KeyPair::generate().address();
        f.registrar
            .add_session_key_with_template(&f.registry, &mut f.accounts, f.master, f.master, key, "TRADING", Some(60), NOW)
            .unwrap();
        let entry = f.accounts.get(&f.wallets[0]).unwrap().session_key(&key).unwrap();
        assert_eq!(entry.valid_until, NOW + 60);

        assert_eq!(
            f.registrar.add_session_key_with_template(
                &f.registry, &mut f.accounts, f.master, f.master, key, "TRADING", Some(0), NOW
            ),
            Err(CustodyError::InvalidDuration)
        );
    }

    #[test]
    fn test_template_fan_out_requires_setup() {
        let mut f = fixture(1);
        let key = KeyPair::generate().address();
        assert_eq!(
            f.registrar.add_session_key_with_template(
                &f.registry, &mut f.accounts, f.master, f.master, key, "MISSING", None, NOW
            ),
            Err(CustodyError::TemplateNotFound("MISSING".to_string()))
        );
        let stranger = KeyPair::generate().address();
        assert_eq!(
            f.registrar.add_session_key_with_template(
                &f.registry, &mut f.accounts, stranger, f.master, key, "TRADING", None, NOW
            ),
            Err(CustodyError::NotMasterCaller { caller: stranger, master: f.master })
        );

        f.registry.set_master_authorization(f.owner, f.master, false).unwrap();
        assert_eq!(
            f.registrar.add_session_key_with_template(
                &f.registry, &mut f.accounts, f.master, f.master, key, "TRADING", None, NOW
            ),
            Err(CustodyError::MasterNotAuthorized(f.master))
        );
    }

    #[test]
    fn test_registration_mirrors_account_master() {
        let mut f = fixture(1);

        // Account whose master signer is someone else
        let other = KeyPair::generate().address();
        let wallet = KeyPair::generate().address();
        f.accounts
            .create_account(wallet, KeyPair::generate().address(), Some(other))
            .unwrap();
        assert_eq!(
            f.registrar.register_account(&f.registry, &f.accounts, f.master, f.master, wallet),
            Err(CustodyError::MasterMismatch { account: wallet, expected: f.master, recorded: Some(other) })
        );

        assert_eq!(
            f.registrar
                .register_account(&f.registry, &f.accounts, f.master, f.master, f.wallets[0]),
            Err(CustodyError::AccountAlreadyRegistered { account: f.wallets[0], master: f.master })
        );

        let missing = KeyPair::generate().address();
        assert_eq!(
            f.registrar.register_account(&f.registry, &f.accounts, f.owner, f.master, missing),
            Err(CustodyError::AccountNotFound(missing))
        );

        f.registrar
            .unregister_account(&f.registry, &f.accounts, f.owner, f.master, f.wallets[0])
            .unwrap();
        assert!(f.registrar.registered_accounts(&f.master).is_empty());
        assert_eq!(
            f.registrar
                .unregister_account(&f.registry, &f.accounts, f.owner, f.master, f.wallets[0]),
            Err(CustodyError::AccountNotRegistered { account: f.wallets[0], master: f.master })
        );
    }

    #[test]
    fn test_batch_add_skips_but_rejects_empty() {
        let mut f = fixture(2);
        let key = KeyPair::generate().address();
        assert_eq!(
            f.registrar.batch_add_session_keys(&f.registry, &mut f.accounts, f.master, &[], NOW),
            Err(CustodyError::EmptyBatch)
        );

        let grant = |account: Address, valid_until: Timestamp| SessionKeyGrant {
            account,
            session_key: key,
            valid_after: NOW,
            valid_until,
            permissions: SessionPermissions::AllowAll,
        };
        let unregistered = KeyPair::generate().address();
        let grants = vec![
            grant(f.wallets[0], NOW + 100),
            grant(f.wallets[1], NOW - 1), // expired window
            grant(unregistered, NOW + 100),
        ];
        let applied = f
            .registrar
            .batch_add_session_keys(&f.registry, &mut f.accounts, f.master, &grants, NOW)
            .unwrap();
        assert_eq!(applied, vec![0]);

        // All skipped is an empty result, not an error
        let applied = f
            .registrar
            .batch_add_session_keys(&f.registry, &mut f.accounts, f.master, &grants[..1], NOW)
            .unwrap();
        assert!(applied.is_empty());

        // A repeated grant inside one batch only lands once
        let other = KeyPair::generate().address();
        let repeated = vec![
            SessionKeyGrant { session_key: other, ..grant(f.wallets[1], NOW + 100) },
            SessionKeyGrant { session_key: other, ..grant(f.wallets[1], NOW + 100) },
        ];
        let applied = f
            .registrar
            .batch_add_session_keys(&f.registry, &mut f.accounts, f.master, &repeated, NOW)
            .unwrap();
        assert_eq!(applied, vec![0]);
    }

    #[test]
    fn test_batch_revoke_counts_only_live_keys() {
        let mut f = fixture(3);
        let key = KeyPair::generate().address();
        let provisioned = f
            .registrar
            .add_session_key_with_template(&f.registry, &mut f.accounts, f.master, f.master, key, "TRADING", None, NOW)
            .unwrap();
        assert_eq!(provisioned, 3);

        f.accounts
            .get_mut(&f.wallets[2])
            .unwrap()
            .revoke_session_key(f.master, key, NOW)
            .unwrap();

        let revoked = f
            .registrar
            .batch_revoke_session_key(&f.registry, &mut f.accounts, f.master, f.master, key, NOW)
            .unwrap();
        assert_eq!(revoked, 2);

        let revoked = f
            .registrar
            .batch_revoke_session_key(&f.registry, &mut f.accounts, f.master, f.master, key, NOW)
            .unwrap();
        assert_eq!(revoked, 0);
    }
}
