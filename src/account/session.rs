//! Session keys: time-bounded, scope-limited principals delegated by the owner

use crate::clock::Timestamp;
use crate::crypto::Address;
use crate::operation::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One (target, selector) pair a session key may call
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallScope {
    pub target: Address,
    pub selector: Selector,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum SessionPermissions {
    /// Any target, any selector
    AllowAll,
    Scoped(BTreeSet<CallScope>),
}

impl SessionPermissions {
    pub fn scoped<I: IntoIterator<Item = (Address, Selector)>>(pairs: I) -> Self {
        SessionPermissions::Scoped(
            pairs
                .into_iter()
                .map(|(target, selector)| CallScope { target, selector })
                .collect(),
        )
    }

    pub fn covers(&self, target: &Address, selector: &Selector) -> bool {
        match self {
            SessionPermissions::AllowAll => true,
            SessionPermissions::Scoped(scopes) => scopes.contains(&CallScope {
                target: *target,
                selector: *selector,
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionKeyEntry {
    pub valid_after: Timestamp,
    pub valid_until: Timestamp,
    pub permissions: SessionPermissions,
    pub revoked: bool,
}

impl SessionKeyEntry {
    pub fn new(valid_after: Timestamp, valid_until: Timestamp, permissions: SessionPermissions) -> Self {
        Self {
            valid_after,
            valid_until,
            permissions,
            revoked: false,
        }
    }

    /// Not revoked and not yet past its window. A key whose window has not
    /// opened yet is still live.
    pub fn is_live(&self, now: Timestamp) -> bool {
        !self.revoked && now <= self.valid_until
    }

    /// Inside `[valid_after, valid_until]` and not revoked
    pub fn is_usable(&self, now: Timestamp) -> bool {
        !self.revoked && self.valid_after <= now && now <= self.valid_until
    }

    pub fn can_execute(&self, target: &Address, selector: &Selector, now: Timestamp) -> bool {
        self.is_usable(now) && self.permissions.covers(target, selector)
    }
}
