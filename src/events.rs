//! Audit journal of authorization state changes

use crate::aggregation::AggregationMode;
use crate::clock::Timestamp;
use crate::crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    AccountCreated { account: Address, owner: Address, master: Option<Address> },
    MasterSignerChanged { account: Address, master: Option<Address> },
    AggregatorChanged { account: Address, aggregator: Option<Address> },
    SessionKeyAdded { account: Address, key: Address, valid_until: Timestamp },
    SessionKeyRevoked { account: Address, key: Address },
    RegistryOwnershipTransferred { previous: Address, current: Address },
    MasterAuthorizationSet { master: Address, enabled: bool },
    WalletAuthorizationSet { master: Address, account: Address, enabled: bool },
    BatchValidated { master: Address, nonce: u64, operations: usize, mode: AggregationMode },
    TemplateCreated { name: String },
    TemplateActivationSet { name: String, active: bool },
    AccountRegistered { master: Address, account: Address },
    AccountUnregistered { master: Address, account: Address },
    /// Fan-out result; `updated < total` signals partial success
    SessionKeysProvisioned { master: Address, key: Address, updated: usize, total: usize },
    SessionKeysRevoked { master: Address, key: Address, revoked: usize, total: usize },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub seq: u64,
    pub at: Timestamp,
    pub event: AuthEvent,
}

/// Bounded journal; the oldest record is dropped first
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventLog {
    records: VecDeque<EventRecord>,
    capacity: usize,
    next_seq: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    pub fn record(&mut self, at: Timestamp, event: AuthEvent) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(EventRecord { seq, at, event });
        seq
    }

    /// Most recent `limit` records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<&EventRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_journal() {
        let mut log = EventLog::new(2);
        for i in 0..3 {
            log.record(i, AuthEvent::TemplateCreated { name: format!("T{}", i) });
        }
        assert_eq!(log.len(), 2);
        let recent = log.recent(10);
        assert_eq!(recent[0].seq, 1);
        assert_eq!(recent[1].seq, 2);
        assert_eq!(log.recent(1)[0].event, AuthEvent::TemplateCreated { name: "T2".into() });
    }
}
