//! Custody state: accounts, master registry, aggregation and the template
//! registrar behind one façade, plus a thread-safe handle.

use crate::account::{Account, AccountStore, SessionPermissions, SignatureValidation};
use crate::aggregation::{
    AggregatedBlob, AggregationConfig, AggregationEngine, BatchAuthorization, GasEstimate, MasterRegistry,
    SigningPayload,
};
use crate::clock::{Clock, Timestamp};
use crate::crypto::Address;
use crate::error::{CustodyError, CustodyResult};
use crate::events::{AuthEvent, EventLog};
use crate::operation::{Selector, UserOperation};
use crate::registrar::{BatchRegistrar, SessionKeyGrant, Template};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CustodyState {
    accounts: AccountStore,
    engine: AggregationEngine,
    registrar: BatchRegistrar,
    events: EventLog,
}

impl CustodyState {
    pub fn new(config: AggregationConfig, registry_owner: Address, event_capacity: usize) -> Self {
        Self {
            accounts: AccountStore::new(),
            engine: AggregationEngine::new(config, registry_owner),
            registrar: BatchRegistrar::new(),
            events: EventLog::new(event_capacity),
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn registry(&self) -> &MasterRegistry {
        self.engine.registry()
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    pub fn registrar(&self) -> &BatchRegistrar {
        &self.registrar
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    // --- Accounts ---

    pub fn create_account(
        &mut self,
        address: Address,
        owner: Address,
        master: Option<Address>,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.accounts.create_account(address, owner, master)?;
        self.events.record(now, AuthEvent::AccountCreated { account: address, owner, master });
        Ok(())
    }

    pub fn account(&self, address: &Address) -> CustodyResult<&Account> {
        self.accounts.require(address)
    }

    pub fn set_master_signer(
        &mut self,
        account: Address,
        caller: Address,
        master: Option<Address>,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.accounts.require_mut(&account)?.set_master_signer(caller, master)?;
        self.events.record(now, AuthEvent::MasterSignerChanged { account, master });
        Ok(())
    }

    pub fn set_aggregator(
        &mut self,
        account: Address,
        caller: Address,
        aggregator: Option<Address>,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.accounts.require_mut(&account)?.set_aggregator(caller, aggregator)?;
        self.events.record(now, AuthEvent::AggregatorChanged { account, aggregator });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_session_key(
        &mut self,
        account: Address,
        caller: Address,
        key: Address,
        valid_after: Timestamp,
        valid_until: Timestamp,
        permissions: SessionPermissions,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.accounts
            .require_mut(&account)?
            .add_session_key(caller, key, valid_after, valid_until, permissions, now)?;
        self.events.record(now, AuthEvent::SessionKeyAdded { account, key, valid_until });
        Ok(())
    }

    pub fn revoke_session_key(
        &mut self,
        account: Address,
        caller: Address,
        key: Address,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.accounts.require_mut(&account)?.revoke_session_key(caller, key, now)?;
        self.events.record(now, AuthEvent::SessionKeyRevoked { account, key });
        Ok(())
    }

    pub fn can_execute(
        &self,
        account: &Address,
        key: &Address,
        target: &Address,
        selector: &Selector,
        now: Timestamp,
    ) -> bool {
        self.accounts
            .get(account)
            .map_or(false, |a| a.can_execute(key, target, selector, now))
    }

    /// Single-operation validation against the sender's own principals
    pub fn validate_signature(&self, op: &UserOperation, now: Timestamp) -> CustodyResult<SignatureValidation> {
        Ok(self.accounts.require(&op.sender)?.validate_user_op(op, now))
    }

    // --- Master registry ---

    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address, now: Timestamp) -> CustodyResult<()> {
        let previous = self.engine.registry().owner();
        self.engine.registry_mut().transfer_ownership(caller, new_owner)?;
        self.events
            .record(now, AuthEvent::RegistryOwnershipTransferred { previous, current: new_owner });
        Ok(())
    }

    pub fn set_master_authorization(
        &mut self,
        caller: Address,
        master: Address,
        enabled: bool,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.engine
            .registry_mut()
            .set_master_authorization(caller, master, enabled)?;
        self.events.record(now, AuthEvent::MasterAuthorizationSet { master, enabled });
        Ok(())
    }

    pub fn set_wallet_authorization(
        &mut self,
        caller: Address,
        master: Address,
        account: Address,
        enabled: bool,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.engine
            .registry_mut()
            .set_wallet_authorization(caller, master, account, enabled)?;
        self.events
            .record(now, AuthEvent::WalletAuthorizationSet { master, account, enabled });
        Ok(())
    }

    pub fn batch_set_wallet_authorization(
        &mut self,
        caller: Address,
        master: Address,
        accounts: &[Address],
        enabled: bool,
        now: Timestamp,
    ) -> CustodyResult<()> {
        let applied = self
            .engine
            .registry_mut()
            .batch_set_wallet_authorization(caller, master, accounts, enabled)?;
        for account in applied {
            self.events
                .record(now, AuthEvent::WalletAuthorizationSet { master, account, enabled });
        }
        Ok(())
    }

    pub fn resolve_master(&self, account: &Address) -> Option<Address> {
        self.engine.registry().resolve_master(account)
    }

    // --- Aggregation ---

    pub fn build_signing_payload(&self, batch: &[UserOperation], master: &Address) -> CustodyResult<SigningPayload> {
        self.engine.build_signing_payload(batch, master)
    }

    pub fn build_session_signing_payload(
        &self,
        batch: &[UserOperation],
        master: &Address,
        session_key: &Address,
    ) -> CustodyResult<SigningPayload> {
        self.engine.build_session_signing_payload(batch, master, session_key)
    }

    pub fn create_aggregated_signature(
        &self,
        batch: &[UserOperation],
        master: &Address,
        master_signature: Vec<u8>,
    ) -> CustodyResult<AggregatedBlob> {
        self.engine.create_aggregated_signature(batch, master, master_signature)
    }

    /// Nonce check, signature check and nonce consumption happen under the
    /// same `&mut self` borrow.
    pub fn validate(
        &mut self,
        batch: &[UserOperation],
        blob: &[u8],
        now: Timestamp,
    ) -> CustodyResult<BatchAuthorization> {
        let auth = self.engine.validate(&self.accounts, batch, blob, now)?;
        self.events.record(
            now,
            AuthEvent::BatchValidated {
                master: auth.master,
                nonce: auth.nonce,
                operations: auth.operations.len(),
                mode: auth.mode,
            },
        );
        Ok(auth)
    }

    pub fn calculate_gas_savings(&self, operation_count: u64) -> GasEstimate {
        self.engine.calculate_gas_savings(operation_count)
    }

    // --- Templates & batch registrar ---

    pub fn create_template(
        &mut self,
        caller: Address,
        name: &str,
        duration: u64,
        permissions: SessionPermissions,
        now: Timestamp,
    ) -> CustodyResult<Template> {
        let template = self
            .registrar
            .catalog_mut()
            .create_template(self.engine.registry(), caller, name, duration, permissions)?
            .clone();
        self.events
            .record(now, AuthEvent::TemplateCreated { name: template.name.clone() });
        Ok(template)
    }

    pub fn set_template_active(&mut self, caller: Address, name: &str, active: bool, now: Timestamp) -> CustodyResult<()> {
        self.registrar
            .catalog_mut()
            .set_template_active(self.engine.registry(), caller, name, active)?;
        self.events.record(
            now,
            AuthEvent::TemplateActivationSet { name: name.to_string(), active },
        );
        Ok(())
    }

    pub fn register_account(&mut self, caller: Address, master: Address, account: Address, now: Timestamp) -> CustodyResult<()> {
        self.registrar
            .register_account(self.engine.registry(), &self.accounts, caller, master, account)?;
        self.events.record(now, AuthEvent::AccountRegistered { master, account });
        Ok(())
    }

    pub fn unregister_account(
        &mut self,
        caller: Address,
        master: Address,
        account: Address,
        now: Timestamp,
    ) -> CustodyResult<()> {
        self.registrar
            .unregister_account(self.engine.registry(), &self.accounts, caller, master, account)?;
        self.events.record(now, AuthEvent::AccountUnregistered { master, account });
        Ok(())
    }

    pub fn add_session_key_with_template(
        &mut self,
        caller: Address,
        master: Address,
        session_key: Address,
        template_name: &str,
        duration_override: Option<u64>,
        now: Timestamp,
    ) -> CustodyResult<usize> {
        let updated = self.registrar.add_session_key_with_template(
            self.engine.registry(),
            &mut self.accounts,
            caller,
            master,
            session_key,
            template_name,
            duration_override,
            now,
        )?;
        let total = self.registrar.registered_accounts(&master).len();
        self.events.record(
            now,
            AuthEvent::SessionKeysProvisioned { master, key: session_key, updated, total },
        );
        Ok(updated)
    }

    pub fn batch_add_session_keys(
        &mut self,
        caller: Address,
        grants: &[SessionKeyGrant],
        now: Timestamp,
    ) -> CustodyResult<usize> {
        let applied = self.registrar.batch_add_session_keys(
            self.engine.registry(),
            &mut self.accounts,
            caller,
            grants,
            now,
        )?;
        for grant in applied.iter().filter_map(|&idx| grants.get(idx)) {
            self.events.record(
                now,
                AuthEvent::SessionKeyAdded {
                    account: grant.account,
                    key: grant.session_key,
                    valid_until: grant.valid_until,
                },
            );
        }
        Ok(applied.len())
    }

    pub fn batch_revoke_session_key(
        &mut self,
        caller: Address,
        master: Address,
        session_key: Address,
        now: Timestamp,
    ) -> CustodyResult<usize> {
        let revoked = self.registrar.batch_revoke_session_key(
            self.engine.registry(),
            &mut self.accounts,
            caller,
            master,
            session_key,
            now,
        )?;
        let total = self.registrar.registered_accounts(&master).len();
        self.events.record(
            now,
            AuthEvent::SessionKeysRevoked { master, key: session_key, revoked, total },
        );
        Ok(revoked)
    }
}

/// Shared handle. Every call runs under one lock acquisition, which makes
/// each operation a serializable transaction.
#[derive(Clone)]
pub struct Custodian {
    state: Arc<Mutex<CustodyState>>,
    clock: Arc<dyn Clock>,
}

impl Custodian {
    pub fn new(state: CustodyState, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run `f` against the state with the current time
    pub fn transact<R, F>(&self, f: F) -> CustodyResult<R>
    where
        F: FnOnce(&mut CustodyState, Timestamp) -> CustodyResult<R>,
    {
        let now = self.clock.now();
        let mut state = self
            .state
            .lock()
            .map_err(|_| CustodyError::Internal("custody state lock poisoned".to_string()))?;
        f(&mut state, now)
    }

    /// Execution-engine callback
    pub fn validate(&self, batch: &[UserOperation], blob: &[u8]) -> CustodyResult<BatchAuthorization> {
        self.transact(|state, now| state.validate(batch, blob, now))
    }

    pub fn snapshot(&self) -> CustodyResult<CustodyState> {
        self.transact(|state, _| Ok(state.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::crypto::KeyPair;
    use crate::error::ErrorKind;
    use crate::events::DEFAULT_EVENT_CAPACITY;
    use crate::operation::Call;
    use std::thread;

    const NOW: Timestamp = 1_700_000_000;

    fn state(owner: &KeyPair) -> CustodyState {
        let config = AggregationConfig {
            chain_id: 31337,
            aggregator_id: KeyPair::generate().address(),
            max_batch_size: 16,
        };
        CustodyState::new(config, owner.address(), DEFAULT_EVENT_CAPACITY)
    }

    fn op(sender: Address, nonce: u64) -> UserOperation {
        UserOperation::new(
            sender,
            nonce,
            Call::new(Address([7u8; 32]), Selector::from_name("transfer"), vec![]),
        )
    }

    /// Master M controlling W1, W2, registered with the registrar as well
    fn master_with_wallets(state: &mut CustodyState, owner: &KeyPair, count: usize) -> (KeyPair, Vec<Address>) {
        let master = KeyPair::generate();
        state
            .set_master_authorization(owner.address(), master.address(), true, NOW)
            .unwrap();
        let mut wallets = Vec::new();
        for _ in 0..count {
            let wallet = KeyPair::generate().address();
            state
                .create_account(wallet, KeyPair::generate().address(), Some(master.address()), NOW)
                .unwrap();
            state
                .set_wallet_authorization(master.address(), master.address(), wallet, true, NOW)
                .unwrap();
            state
                .register_account(master.address(), master.address(), wallet, NOW)
                .unwrap();
            wallets.push(wallet);
        }
        (master, wallets)
    }

    #[test]
    fn test_scenario_owner_only_account() {
        let registry_owner = KeyPair::generate();
        let mut state = state(&registry_owner);
        let owner = KeyPair::generate();
        let account = KeyPair::generate().address();
        state.create_account(account, owner.address(), None, NOW).unwrap();
        assert!(!state.account(&account).unwrap().master_signer_enabled());

        let operation = op(account, 0);
        let hash = operation.hash();
        let signed = operation.clone().with_signature(owner.sign(&hash));
        assert_eq!(
            state.validate_signature(&signed, NOW).unwrap(),
            SignatureValidation::Owner(owner.address())
        );
        let forged = operation.with_signature(KeyPair::generate().sign(&hash));
        assert_eq!(state.validate_signature(&forged, NOW).unwrap(), SignatureValidation::Rejected);
    }

    #[test]
    fn test_scenario_master_batch_and_replay() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let (master, wallets) = master_with_wallets(&mut state, &owner, 2);

        let batch = vec![op(wallets[0], 0), op(wallets[1], 0)];
        let payload = state.build_signing_payload(&batch, &master.address()).unwrap();
        assert_eq!(payload.nonce, 0);
        let blob = state
            .create_aggregated_signature(&batch, &master.address(), master.sign(&payload.hash))
            .unwrap()
            .encode();

        state.validate(&batch, &blob, NOW).unwrap();
        assert_eq!(state.registry().nonce(&master.address()), 1);

        let err = state.validate(&batch, &blob, NOW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReplayRejected);
        assert_eq!(state.registry().nonce(&master.address()), 1);
    }

    #[test]
    fn test_scenario_expired_window_rejected_at_creation() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let account_owner = KeyPair::generate();
        let account = KeyPair::generate().address();
        state
            .create_account(account, account_owner.address(), None, NOW)
            .unwrap();

        let err = state
            .add_session_key(
                account,
                account_owner.address(),
                KeyPair::generate().address(),
                NOW - 3600,
                NOW - 1800,
                SessionPermissions::AllowAll,
                NOW,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateError);
    }

    #[test]
    fn test_scenario_template_partial_success() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let (master, wallets) = master_with_wallets(&mut state, &owner, 3);
        let perms = SessionPermissions::scoped([(Address([7u8; 32]), Selector::from_name("transfer"))]);
        state
            .create_template(owner.address(), "TRADING", 3600, perms, NOW)
            .unwrap();

        let key = KeyPair::generate().address();
        state
            .add_session_key(wallets[2], master.address(), key, NOW, NOW + 600, SessionPermissions::AllowAll, NOW)
            .unwrap();

        let updated = state
            .add_session_key_with_template(master.address(), master.address(), key, "TRADING", None, NOW)
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(
            state.events().recent(1)[0].event,
            AuthEvent::SessionKeysProvisioned { master: master.address(), key, updated: 2, total: 3 }
        );
    }

    #[test]
    fn test_scenario_gas_savings() {
        let owner = KeyPair::generate();
        let state = state(&owner);
        assert_eq!(state.calculate_gas_savings(1).savings, 0);
        assert!(state.calculate_gas_savings(3).savings > state.calculate_gas_savings(2).savings);
    }

    #[test]
    fn test_session_key_signed_batch_through_custody() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let (master, wallets) = master_with_wallets(&mut state, &owner, 2);
        let perms = SessionPermissions::scoped([(Address([7u8; 32]), Selector::from_name("transfer"))]);
        state
            .create_template(owner.address(), "TRADING", 3600, perms, NOW)
            .unwrap();
        let session = KeyPair::generate();
        state
            .add_session_key_with_template(master.address(), master.address(), session.address(), "TRADING", None, NOW)
            .unwrap();

        let batch = vec![op(wallets[0], 0), op(wallets[1], 0)];
        let payload = state
            .build_session_signing_payload(&batch, &master.address(), &session.address())
            .unwrap();
        let blob = state
            .create_aggregated_signature(&batch, &master.address(), session.sign(&payload.hash))
            .unwrap()
            .encode();
        let auth = state.validate(&batch, &blob, NOW + 60).unwrap();
        assert!(auth
            .operations
            .iter()
            .all(|o| o.authorized_by == SignatureValidation::SessionKey(session.address())));

        // After a bulk revoke the key can no longer sign the next batch
        let revoked = state
            .batch_revoke_session_key(master.address(), master.address(), session.address(), NOW + 60)
            .unwrap();
        assert_eq!(revoked, 2);
        let payload = state
            .build_session_signing_payload(&batch, &master.address(), &session.address())
            .unwrap();
        let blob = state
            .create_aggregated_signature(&batch, &master.address(), session.sign(&payload.hash))
            .unwrap()
            .encode();
        assert!(state.validate(&batch, &blob, NOW + 61).is_err());
        assert_eq!(state.registry().nonce(&master.address()), 1);
    }

    #[test]
    fn test_master_signer_invariant_after_mutations() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let (master, wallets) = master_with_wallets(&mut state, &owner, 1);
        let wallet = wallets[0];
        let check = |s: &CustodyState| {
            let a = s.account(&wallet).unwrap();
            assert_eq!(a.master_signer_enabled(), a.master_signer().is_some());
        };

        check(&state);
        state.set_master_signer(wallet, master.address(), None, NOW).unwrap();
        check(&state);
        assert!(state.set_master_signer(wallet, master.address(), None, NOW).is_err());
        check(&state);
        state
            .set_master_signer(wallet, wallet, Some(master.address()), NOW)
            .unwrap();
        check(&state);
    }

    #[test]
    fn test_concurrent_validation_consumes_nonce_once() {
        let owner = KeyPair::generate();
        let mut inner = state(&owner);
        let (master, wallets) = master_with_wallets(&mut inner, &owner, 2);
        let batch = vec![op(wallets[0], 0), op(wallets[1], 0)];
        let payload = inner.build_signing_payload(&batch, &master.address()).unwrap();
        let blob = inner
            .create_aggregated_signature(&batch, &master.address(), master.sign(&payload.hash))
            .unwrap()
            .encode();

        let custodian = Custodian::new(inner, Arc::new(FixedClock::new(NOW)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let custodian = custodian.clone();
                let batch = batch.clone();
                let blob = blob.clone();
                thread::spawn(move || custodian.validate(&batch, &blob).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        let snapshot = custodian.snapshot().unwrap();
        assert_eq!(snapshot.registry().nonce(&master.address()), 1);
    }

    #[test]
    fn test_rejections_record_no_events() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let before = state.events().len();
        let stranger = KeyPair::generate().address();
        assert!(state
            .set_master_authorization(stranger, stranger, true, NOW)
            .is_err());
        assert!(state
            .create_template(stranger, "TRADING", 60, SessionPermissions::AllowAll, NOW)
            .is_err());
        assert_eq!(state.events().len(), before);
    }

    fn count_events(state: &CustodyState, pred: impl Fn(&AuthEvent) -> bool) -> usize {
        state
            .events()
            .recent(usize::MAX)
            .into_iter()
            .filter(|r| pred(&r.event))
            .count()
    }

    #[test]
    fn test_batch_grants_log_only_applied_keys() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let (master, wallets) = master_with_wallets(&mut state, &owner, 1);
        let key = KeyPair::generate().address();
        let grant = SessionKeyGrant {
            account: wallets[0],
            session_key: key,
            valid_after: NOW,
            valid_until: NOW + 600,
            permissions: SessionPermissions::AllowAll,
        };
        let stray = SessionKeyGrant {
            account: KeyPair::generate().address(),
            ..grant.clone()
        };
        let is_added = |e: &AuthEvent| matches!(e, AuthEvent::SessionKeyAdded { .. });

        let updated = state
            .batch_add_session_keys(master.address(), &[grant.clone(), grant.clone(), stray], NOW)
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(count_events(&state, is_added), 1);

        // Resubmitting changes nothing and logs nothing
        let updated = state
            .batch_add_session_keys(master.address(), &[grant], NOW)
            .unwrap();
        assert_eq!(updated, 0);
        assert_eq!(count_events(&state, is_added), 1);
    }

    #[test]
    fn test_repeated_wallets_log_one_change_each() {
        let owner = KeyPair::generate();
        let mut state = state(&owner);
        let master = KeyPair::generate().address();
        state.set_master_authorization(owner.address(), master, true, NOW).unwrap();
        let wallet = KeyPair::generate().address();

        state
            .batch_set_wallet_authorization(owner.address(), master, &[wallet, wallet, wallet], true, NOW)
            .unwrap();
        assert_eq!(state.registry().controlled_accounts(&master), vec![wallet]);
        assert_eq!(
            count_events(&state, |e| matches!(e, AuthEvent::WalletAuthorizationSet { .. })),
            1
        );
    }
}
