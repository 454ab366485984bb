//! Account principal hierarchy
//!
//! Each account holds:
//! - an immutable owner
//! - an optional master signer with account-wide authority
//! - time-bounded, scope-limited session keys
//! - an optional aggregator that vouches for unsigned operations

pub mod session;
pub mod store;
pub mod types;

pub use session::{CallScope, SessionKeyEntry, SessionPermissions};
pub use store::AccountStore;
pub use types::{Account, SignatureValidation};
